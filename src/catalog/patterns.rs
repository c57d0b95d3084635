//! File selection patterns: literals, `*`/`?` wildcards, and
//! directory prefixes ending in a path separator.

use regex::{Regex, RegexBuilder};

use crate::TapeError;

fn is_separator(ch: char) -> bool {
    ch == '/' || ch == '\\'
}

/// Compile one pattern into an anchored, case-insensitive regex.
/// `*` matches any run, `?` one character, separators match
/// themselves, everything else is literal. A trailing separator turns
/// the pattern into a directory prefix (`dir/` behaves like
/// `dir/*.*`).
pub fn pattern_to_regex(pattern: &str) -> Result<Regex, TapeError> {
    let mut expanded = pattern.to_string();
    if expanded.chars().next_back().map(is_separator).unwrap_or(false) {
        expanded.push_str("*.*");
    }

    let mut expression = String::with_capacity(expanded.len() * 2 + 2);
    expression.push('^');
    for ch in expanded.chars() {
        match ch {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            '\\' => expression.push_str("\\\\"),
            '/' => expression.push('/'),
            ch if ch.is_ascii_alphanumeric() => expression.push(ch),
            ch => {
                // escape everything else; regex metacharacters are a
                // subset and the rest is unaffected
                expression.push_str(&regex::escape(&ch.to_string()));
            }
        }
    }
    expression.push('$');

    RegexBuilder::new(&expression)
        .case_insensitive(true)
        .build()
        .map_err(|err| TapeError::invalid_data(format!("bad pattern '{pattern}': {err}")))
}

/// A compiled pattern list. `None` selects every file, an empty list
/// selects nothing, otherwise the union of all matches.
pub struct FilePatternSet {
    patterns: Option<Vec<Regex>>,
}

impl FilePatternSet {
    pub fn all() -> Self {
        Self { patterns: None }
    }

    pub fn parse(patterns: Option<&[String]>) -> Result<Self, TapeError> {
        let patterns = match patterns {
            None => None,
            Some(list) => Some(
                list.iter()
                    .map(|pattern| pattern_to_regex(pattern))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.patterns {
            None => true,
            Some(list) => list.iter().any(|regex| regex.is_match(path)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        pattern_to_regex(pattern).unwrap().is_match(path)
    }

    #[test]
    fn literal_patterns_are_case_insensitive() {
        assert!(matches("/data/Report.TXT", "/data/report.txt"));
        assert!(!matches("/data/report.txt", "/data/report.txt.bak"));
    }

    #[test]
    fn wildcards() {
        assert!(matches("/data/*.txt", "/data/report.txt"));
        assert!(matches("/data/repor?.txt", "/data/report.txt"));
        assert!(!matches("/data/*.txt", "/data/report.bin"));
        // separator characters are not special for '*'
        assert!(matches("/data/*", "/data/sub/report.txt"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(matches("/data/a+b(1).txt", "/data/a+b(1).txt"));
        assert!(!matches("/data/a+b(1).txt", "/data/aab(1).txt"));
    }

    #[test]
    fn directory_prefix() {
        assert!(matches("/data/", "/data/report.txt"));
        assert!(!matches("/data/", "/elsewhere/report.txt"));
    }

    #[test]
    fn pattern_set_semantics() {
        let all = FilePatternSet::all();
        assert!(all.matches("/anything"));

        let none = FilePatternSet::parse(Some(&[])).unwrap();
        assert!(!none.matches("/anything"));

        let union = FilePatternSet::parse(Some(&[
            "*.txt".to_string(),
            "*.bin".to_string(),
        ]))
        .unwrap();
        assert!(union.matches("notes.txt"));
        assert!(union.matches("image.BIN"));
        assert!(!union.matches("image.jpg"));
    }
}
