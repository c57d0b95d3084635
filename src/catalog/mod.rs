//! The on-tape catalog: backup sets and their file entries.

mod file;
pub use file::*;

mod patterns;
pub use patterns::*;

mod select;
pub use select::*;

use std::fmt::Write as _;
use std::io::{self, Read, Write};

use crate::hash::HashAlgorithm;
use crate::serialize::{ticks_now, WireRead, WireRecord, WireWrite};
use crate::TapeError;

/// Directory of one backup set. File order is insertion order, which
/// is also the order of the payloads on tape.
#[derive(Debug, Clone, PartialEq)]
pub struct SetToc {
    files: Vec<FileInfo>,
    pub description: String,
    pub created: u64,
    pub last_saved: u64,
    filemarks_between_files: bool,
    block_size: u32,
    hash_algorithm: HashAlgorithm,
    incremental: bool,
    volume: u32,
    continued_from_previous: bool,
}

impl SetToc {
    pub fn new(description: &str, hash_algorithm: HashAlgorithm) -> Self {
        let now = ticks_now();
        Self {
            files: Vec::new(),
            description: description.to_string(),
            created: now,
            last_saved: now,
            filemarks_between_files: false,
            block_size: 0,
            hash_algorithm,
            incremental: false,
            volume: 1,
            continued_from_previous: false,
        }
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Option<&FileInfo> {
        self.files.get(index)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn filemarks_between_files(&self) -> bool {
        self.filemarks_between_files
    }

    /// Separator mode and block size are frozen by the first file.
    pub fn set_write_mode(&mut self, block_size: u32, filemarks: bool) -> Result<(), TapeError> {
        if !self.files.is_empty() {
            return Err(TapeError::invalid_data(
                "cannot change write mode of a non-empty set",
            ));
        }
        self.block_size = block_size;
        self.filemarks_between_files = filemarks;
        Ok(())
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// The incremental flag is part of the set identity; it can only
    /// change while no files are recorded.
    pub fn set_incremental(&mut self, incremental: bool) -> Result<(), TapeError> {
        if !self.files.is_empty() {
            return Err(TapeError::invalid_data(
                "cannot toggle incremental on a non-empty set",
            ));
        }
        self.incremental = incremental;
        Ok(())
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn continued_from_previous(&self) -> bool {
        self.continued_from_previous
    }

    /// Append a completed entry. The id must be assigned and the
    /// digest must match the set's hash algorithm.
    pub fn push_file(&mut self, info: FileInfo) -> Result<(), TapeError> {
        if !info.is_valid() {
            return Err(TapeError::invalid_data("file entry without id"));
        }
        let expected = self.hash_algorithm.digest_len();
        let actual = info.hash.as_ref().map(|hash| hash.len()).unwrap_or(0);
        if actual != expected {
            return Err(TapeError::invalid_data(format!(
                "digest length {actual} does not match {} ({expected})",
                self.hash_algorithm
            )));
        }
        self.files.push(info);
        Ok(())
    }

    /// Case-insensitive lookup by absolute path.
    pub fn find_file(&self, path: &str) -> Option<(usize, &FileInfo)> {
        self.files
            .iter()
            .enumerate()
            .find(|(_, info)| info.path().eq_ignore_ascii_case(path))
    }

    pub fn describe(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "set '{}' (volume {}{}{}, {} files, {})",
            self.description,
            self.volume,
            if self.incremental { ", incremental" } else { "" },
            if self.continued_from_previous {
                ", continued"
            } else {
                ""
            },
            self.files.len(),
            self.hash_algorithm,
        );
        for info in &self.files {
            let _ = writeln!(
                out,
                "  {:>10}  {}  {}",
                info.descriptor.length,
                info.hash
                    .as_deref()
                    .map(hex::encode)
                    .unwrap_or_else(|| "-".to_string()),
                info.path(),
            );
        }
    }
}

impl WireRecord for SetToc {
    fn write_record<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_signature()?;
        writer.write_wire_list(&self.files)?;
        writer.write_wire_string(&self.description)?;
        writer.write_le_u64(self.created)?;
        writer.write_wire_bool(self.filemarks_between_files)?;
        writer.write_le_u32(self.block_size)?;
        writer.write_le_u64(self.last_saved)?;
        writer.write_le_i32(self.hash_algorithm.to_wire())?;
        writer.write_wire_bool(self.incremental)?;
        writer.write_le_u32(self.volume)?;
        writer.write_wire_bool(self.continued_from_previous)
    }

    fn read_record<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        if !reader.read_signature()? {
            return Ok(None);
        }
        let files = reader.read_wire_list()?;
        let description = reader.read_wire_string()?;
        let created = reader.read_le_u64()?;
        let filemarks_between_files = reader.read_wire_bool()?;
        let block_size = reader.read_le_u32()?;
        let last_saved = reader.read_le_u64()?;
        let algorithm_code = reader.read_le_i32()?;
        let hash_algorithm = HashAlgorithm::from_wire(algorithm_code).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown hash algorithm code {algorithm_code}"),
            )
        })?;
        Ok(Some(Self {
            files,
            description,
            created,
            last_saved,
            filemarks_between_files,
            block_size,
            hash_algorithm,
            incremental: reader.read_wire_bool()?,
            volume: reader.read_le_u32()?,
            continued_from_previous: reader.read_wire_bool()?,
        }))
    }
}

/// The top-level catalog: all sets on this volume chain, oldest first,
/// plus the id counter and the volume linkage flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Toc {
    sets: Vec<SetToc>,
    next_id: u64,
    pub description: String,
    pub created: u64,
    pub last_saved: u64,
    volume: u32,
    continued_on_next: bool,
    /// Write cursor (0-based position into `sets`)
    current: Option<usize>,
}

impl Toc {
    pub fn new(description: &str) -> Self {
        let now = ticks_now();
        Self {
            sets: Vec::new(),
            next_id: 1,
            description: description.to_string(),
            created: now,
            last_saved: now,
            volume: 1,
            continued_on_next: false,
            current: None,
        }
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn sets(&self) -> &[SetToc] {
        &self.sets
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn continued_on_next(&self) -> bool {
        self.continued_on_next
    }

    pub fn set_continued_on_next(&mut self, value: bool) {
        self.continued_on_next = value;
    }

    /// Adjust which volume of the chain this catalog instance is
    /// looking at (used while reading across media changes).
    pub fn set_volume(&mut self, volume: u32) {
        self.volume = volume;
    }

    /// Issue the next unique id; ids are monotonic over the life of
    /// the catalog and persisted with it.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Resolve a dual-form set index: `1..=N` counts from the oldest,
    /// `0` is the newest and negative values count back from it.
    pub fn resolve_set_index(&self, index: i32) -> Option<usize> {
        let count = self.sets.len() as i32;
        let position = if index >= 1 {
            index - 1
        } else {
            count - 1 + index
        };
        (position >= 0 && position < count).then_some(position as usize)
    }

    /// Like [`resolve_set_index`](Self::resolve_set_index), but clamps
    /// out-of-range requests to the nearest valid set.
    pub fn clamp_set_index(&self, index: i32) -> Option<usize> {
        if self.sets.is_empty() {
            return None;
        }
        let count = self.sets.len() as i32;
        let position = if index >= 1 {
            index - 1
        } else {
            count - 1 + index
        };
        Some(position.clamp(0, count - 1) as usize)
    }

    pub fn set(&self, index: i32) -> Option<&SetToc> {
        self.resolve_set_index(index)
            .and_then(|position| self.sets.get(position))
    }

    pub fn set_at(&self, position: usize) -> Option<&SetToc> {
        self.sets.get(position)
    }

    /// The write cursor.
    pub fn current_pos(&self) -> Option<usize> {
        self.current
    }

    pub fn set_current_pos(&mut self, position: usize) -> Result<(), TapeError> {
        if position >= self.sets.len() {
            return Err(TapeError::invalid_data("set position out of range"));
        }
        self.current = Some(position);
        Ok(())
    }

    pub fn current_set(&self) -> Option<&SetToc> {
        self.current.and_then(|position| self.sets.get(position))
    }

    pub fn current_set_mut(&mut self) -> Option<&mut SetToc> {
        self.current.and_then(|position| self.sets.get_mut(position))
    }

    /// Append a set and move the write cursor onto it. The first set
    /// of a volume chain cannot be incremental, there is nothing it
    /// could be based on.
    pub fn append_set(&mut self, mut set: SetToc) -> Result<usize, TapeError> {
        if set.incremental && self.sets.is_empty() && !set.continued_from_previous {
            return Err(TapeError::invalid_data(
                "the first set on a volume chain cannot be incremental",
            ));
        }
        set.volume = self.volume;
        self.sets.push(set);
        let position = self.sets.len() - 1;
        self.current = Some(position);
        Ok(position)
    }

    /// Oldest set on the current volume, scanning back from the
    /// current set over the contiguous same-volume range.
    pub fn first_set_on_volume(&self) -> Option<usize> {
        let mut position = self.current?;
        while position > 0 && self.sets[position - 1].volume == self.volume {
            position -= 1;
        }
        (self.sets[position].volume == self.volume).then_some(position)
    }

    /// Newest set on the current volume.
    pub fn last_set_on_volume(&self) -> Option<usize> {
        let mut position = self.current?;
        while position + 1 < self.sets.len() && self.sets[position + 1].volume == self.volume {
            position += 1;
        }
        (self.sets[position].volume == self.volume).then_some(position)
    }

    /// Move the catalog onto the next volume of the chain: bump the
    /// volume number, clear the continuation flag, and open a fresh
    /// set carrying over the current set's metadata.
    pub fn next_volume(&mut self) -> Result<usize, TapeError> {
        let current = self
            .current_set()
            .ok_or_else(|| TapeError::invalid_data("no current set to continue"))?;

        let mut continuation = SetToc::new(&current.description, current.hash_algorithm);
        continuation.filemarks_between_files = current.filemarks_between_files;
        continuation.block_size = current.block_size;
        continuation.incremental = current.incremental;
        continuation.continued_from_previous = true;

        self.volume += 1;
        self.continued_on_next = false;
        self.append_set(continuation)
    }

    /// Render sets and files into a human readable listing.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "catalog '{}', volume {}, {} sets{}",
            self.description,
            self.volume,
            self.sets.len(),
            if self.continued_on_next {
                ", continued on next volume"
            } else {
                ""
            }
        );
        for set in &self.sets {
            set.describe(&mut out);
        }
        out
    }
}

impl WireRecord for Toc {
    fn write_record<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_signature()?;
        writer.write_le_u64(self.next_id)?;
        writer.write_wire_list(&self.sets)?;
        writer.write_wire_string(&self.description)?;
        writer.write_le_u64(self.created)?;
        writer.write_le_u64(self.last_saved)?;
        writer.write_le_u32(self.volume)?;
        writer.write_wire_bool(self.continued_on_next)
    }

    fn read_record<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        if !reader.read_signature()? {
            return Ok(None);
        }
        let next_id = reader.read_le_u64()?;
        let sets: Vec<SetToc> = reader.read_wire_list()?;
        let current = sets.len().checked_sub(1);
        Ok(Some(Self {
            next_id,
            sets,
            description: reader.read_wire_string()?,
            created: reader.read_le_u64()?,
            last_saved: reader.read_le_u64()?,
            volume: reader.read_le_u32()?,
            continued_on_next: reader.read_wire_bool()?,
            current,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn entry(id: u64, path: &str, modified: u64) -> FileInfo {
        FileInfo {
            id,
            block: id * 10,
            descriptor: FileDescriptor {
                path: path.to_string(),
                length: 100,
                attributes: FileAttributes::ARCHIVE,
                created: modified,
                modified,
                accessed: modified,
            },
            hash: Some(vec![0u8; 4]),
        }
    }

    pub(crate) fn sample_toc() -> Toc {
        let mut toc = Toc::new("nightly");
        let mut set = SetToc::new("base", crate::hash::HashAlgorithm::Crc32);
        set.set_write_mode(1024, false).unwrap();
        toc.append_set(set).unwrap();
        for (path, modified) in [("/data/a.txt", 100), ("/data/b.txt", 200)] {
            let id = toc.allocate_id();
            toc.current_set_mut()
                .unwrap()
                .push_file(entry(id, path, modified))
                .unwrap();
        }
        toc
    }

    #[test]
    fn uid_monotonic_across_sets() {
        let mut toc = sample_toc();
        toc.append_set(SetToc::new("second", crate::hash::HashAlgorithm::Crc32))
            .unwrap();
        let id = toc.allocate_id();
        toc.current_set_mut()
            .unwrap()
            .push_file(entry(id, "/data/c.txt", 300))
            .unwrap();

        let mut last = 0;
        for set in toc.sets() {
            for info in set.files() {
                assert!(info.id > last);
                last = info.id;
            }
        }
        assert!(last < toc.next_id());
    }

    #[test]
    fn dual_indexing() {
        let mut toc = sample_toc();
        toc.append_set(SetToc::new("second", crate::hash::HashAlgorithm::Crc32))
            .unwrap();
        toc.append_set(SetToc::new("third", crate::hash::HashAlgorithm::Crc32))
            .unwrap();

        // three sets: 1,2,3 == -2,-1,0
        assert_eq!(toc.resolve_set_index(1), Some(0));
        assert_eq!(toc.resolve_set_index(3), Some(2));
        assert_eq!(toc.resolve_set_index(0), Some(2));
        assert_eq!(toc.resolve_set_index(-2), Some(0));
        assert_eq!(toc.resolve_set_index(4), None);
        assert_eq!(toc.resolve_set_index(-3), None);

        assert_eq!(toc.clamp_set_index(99), Some(2));
        assert_eq!(toc.clamp_set_index(-99), Some(0));
    }

    #[test]
    fn toc_round_trip() {
        let toc = sample_toc();
        let mut buf = Vec::new();
        toc.write_record(&mut buf).unwrap();
        let back = Toc::read_record(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(back, toc);
    }

    #[test]
    fn corrupt_signature_is_absent() {
        let toc = sample_toc();
        let mut buf = Vec::new();
        toc.write_record(&mut buf).unwrap();
        buf[0] ^= 0x20;
        assert!(Toc::read_record(&mut Cursor::new(&buf)).unwrap().is_none());
    }

    #[test]
    fn first_set_cannot_be_incremental() {
        let mut toc = Toc::new("t");
        let mut set = SetToc::new("inc", crate::hash::HashAlgorithm::None);
        set.set_incremental(true).unwrap();
        assert!(toc.append_set(set).is_err());
    }

    #[test]
    fn incremental_frozen_once_files_exist() {
        let mut toc = sample_toc();
        let set = toc.current_set_mut().unwrap();
        assert!(set.set_incremental(true).is_err());
    }

    #[test]
    fn digest_length_enforced() {
        let mut set = SetToc::new("s", crate::hash::HashAlgorithm::Crc64);
        let mut info = entry(1, "/x", 1);
        info.hash = Some(vec![0u8; 4]); // crc32-sized digest
        assert!(set.push_file(info).is_err());
    }

    #[test]
    fn volume_ranges() {
        let mut toc = sample_toc();
        toc.set_continued_on_next(true);
        toc.next_volume().unwrap();
        toc.append_set(SetToc::new("v2b", crate::hash::HashAlgorithm::Crc32))
            .unwrap();

        assert_eq!(toc.volume(), 2);
        assert!(!toc.continued_on_next());
        assert!(toc.sets()[1].continued_from_previous());
        assert_eq!(toc.first_set_on_volume(), Some(1));
        assert_eq!(toc.last_set_on_volume(), Some(2));
    }
}
