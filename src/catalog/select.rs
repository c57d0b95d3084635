//! File selection over the catalog: which entries of which sets a
//! read pass has to visit, and the up-to-date check for incremental
//! backups.

use std::collections::HashSet;

use super::{FilePatternSet, Toc};

/// Files chosen from one set, identified by their position in the
/// set's file list (ascending, which is also tape order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSelection {
    /// 0-based set position in the catalog
    pub set_pos: usize,
    pub file_indices: Vec<usize>,
}

/// Find the base of the incremental chain under the current set: the
/// most recent non-incremental set, extended by one more set when the
/// base itself continues a set from the previous volume.
fn incremental_base(toc: &Toc) -> Option<usize> {
    let current = toc.current_pos()?;
    let mut base = current;
    while base > 0 && toc.set_at(base)?.is_incremental() {
        base -= 1;
    }
    if base > 0 && toc.set_at(base)?.continued_from_previous() {
        base -= 1;
    }
    Some(base)
}

/// Compute the selections for a read pass, newest set first.
///
/// Non-incremental passes only look at the current set. Incremental
/// passes walk from the current set down to the chain base and drop
/// every file whose path (case-insensitive) was already selected from
/// a newer set, so each file appears at most once, at its newest
/// occurrence.
pub fn select_files(
    toc: &Toc,
    patterns: &FilePatternSet,
    incremental: bool,
) -> Vec<SetSelection> {
    let Some(current) = toc.current_pos() else {
        return Vec::new();
    };
    let base = if incremental {
        incremental_base(toc).unwrap_or(current)
    } else {
        current
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut selections = Vec::with_capacity(current - base + 1);

    for set_pos in (base..=current).rev() {
        let set = match toc.set_at(set_pos) {
            Some(set) => set,
            None => continue,
        };
        let mut file_indices = Vec::new();
        for (index, info) in set.files().iter().enumerate() {
            if !patterns.matches(info.path()) {
                continue;
            }
            let key = info.path().to_ascii_lowercase();
            if seen.insert(key) {
                file_indices.push(index);
            }
        }
        selections.push(SetSelection {
            set_pos,
            file_indices,
        });
    }
    selections
}

/// Incremental backup check: a file is already covered when any entry
/// with the same path between the current set and the chain base
/// carries an equal or newer modification time.
pub fn is_file_uptodate(toc: &Toc, path: &str, modified: u64) -> bool {
    let Some(current) = toc.current_pos() else {
        return false;
    };
    let base = incremental_base(toc).unwrap_or(current);

    for set_pos in (base..=current).rev() {
        if let Some(set) = toc.set_at(set_pos) {
            if let Some((_, info)) = set.find_file(path) {
                if info.descriptor.modified >= modified {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::{FileAttributes, FileDescriptor, FileInfo, SetToc};
    use crate::hash::HashAlgorithm;

    fn entry(id: u64, path: &str, modified: u64) -> FileInfo {
        FileInfo {
            id,
            block: id,
            descriptor: FileDescriptor {
                path: path.to_string(),
                length: 10,
                attributes: FileAttributes::ARCHIVE,
                created: modified,
                modified,
                accessed: modified,
            },
            hash: None,
        }
    }

    /// `[full, inc, inc]`; file F in the full set at T0 and in the
    /// second incremental at T2.
    fn chain_toc() -> Toc {
        let mut toc = Toc::new("chain");

        let mut full = SetToc::new("full", HashAlgorithm::None);
        full.push_file(entry(1, "/data/F", 1000)).unwrap();
        full.push_file(entry(2, "/data/G", 1000)).unwrap();
        toc.append_set(full).unwrap();

        let mut inc1 = SetToc::new("inc1", HashAlgorithm::None);
        inc1.set_incremental(true).unwrap();
        toc.append_set(inc1).unwrap();

        let mut inc2 = SetToc::new("inc2", HashAlgorithm::None);
        inc2.set_incremental(true).unwrap();
        inc2.push_file(entry(3, "/data/f", 2000)).unwrap();
        toc.append_set(inc2).unwrap();

        toc
    }

    #[test]
    fn incremental_selection_picks_newest_occurrence() {
        let toc = chain_toc();
        let selections = select_files(&toc, &FilePatternSet::all(), true);

        assert_eq!(selections.len(), 3);
        // newest first: set 3 has F (case differs on tape), set 2 is
        // empty, set 1 only contributes G
        assert_eq!(selections[0].set_pos, 2);
        assert_eq!(selections[0].file_indices, vec![0]);
        assert_eq!(selections[1].set_pos, 1);
        assert!(selections[1].file_indices.is_empty());
        assert_eq!(selections[2].set_pos, 0);
        assert_eq!(selections[2].file_indices, vec![1]);
    }

    #[test]
    fn non_incremental_selection_is_current_set_only() {
        let toc = chain_toc();
        let selections = select_files(&toc, &FilePatternSet::all(), false);
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].set_pos, 2);
    }

    #[test]
    fn empty_pattern_list_selects_nothing() {
        let toc = chain_toc();
        let patterns = FilePatternSet::parse(Some(&[])).unwrap();
        let selections = select_files(&toc, &patterns, true);
        assert!(selections.iter().all(|sel| sel.file_indices.is_empty()));
    }

    #[test]
    fn uptodate_uses_newest_entry_and_equal_counts() {
        let toc = chain_toc();
        assert!(is_file_uptodate(&toc, "/data/F", 1500));
        assert!(is_file_uptodate(&toc, "/data/F", 2000));
        assert!(!is_file_uptodate(&toc, "/data/F", 2001));
        assert!(!is_file_uptodate(&toc, "/data/unknown", 1));
    }

    #[test]
    fn base_extends_over_volume_continuation() {
        // a full set split across two volumes, plus an incremental
        let mut toc = Toc::new("split");
        let mut full = SetToc::new("full", HashAlgorithm::None);
        full.push_file(entry(1, "/data/F", 1000)).unwrap();
        toc.append_set(full).unwrap();

        toc.next_volume().unwrap();
        toc.current_set_mut()
            .unwrap()
            .push_file(entry(2, "/data/G", 1000))
            .unwrap();

        let mut inc = SetToc::new("inc", HashAlgorithm::None);
        inc.set_incremental(true).unwrap();
        toc.append_set(inc).unwrap();

        // the base is the continuation set; the first volume's half of
        // it joins the chain as well
        let selections = select_files(&toc, &FilePatternSet::all(), true);
        let positions: Vec<usize> = selections.iter().map(|sel| sel.set_pos).collect();
        assert_eq!(positions, vec![2, 1, 0]);
    }
}
