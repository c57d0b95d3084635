//! Catalog rows: the filesystem snapshot of one backed up file and
//! its position on tape.

use std::fs::{File, FileTimes, Metadata};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use crate::serialize::{
    system_time_from_ticks, ticks_from_system_time, WireRead, WireRecord, WireWrite,
};

bitflags::bitflags! {
    /// Attribute bits, stored with their conventional on-disk values.
    pub struct FileAttributes: u32 {
        const READ_ONLY = 0x0001;
        const HIDDEN    = 0x0002;
        const SYSTEM    = 0x0004;
        const DIRECTORY = 0x0010;
        const ARCHIVE   = 0x0020;
        const NORMAL    = 0x0080;
    }
}

/// Snapshot of a filesystem entry at backup time.
///
/// Holds no handle on the underlying file; mutating a descriptor never
/// touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Absolute path
    pub path: String,
    /// Payload length in bytes
    pub length: u64,
    pub attributes: FileAttributes,
    /// 100ns ticks
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
}

impl FileDescriptor {
    /// Take a snapshot of a filesystem entry.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let absolute = std::path::absolute(path.as_ref())?;
        let metadata = std::fs::metadata(&absolute)?;
        let path = absolute
            .to_str()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "path is not valid utf-8")
            })?
            .to_string();
        Ok(Self::from_metadata(path, &metadata))
    }

    pub fn from_metadata(path: String, metadata: &Metadata) -> Self {
        let mut attributes = FileAttributes::empty();
        if metadata.permissions().readonly() {
            attributes |= FileAttributes::READ_ONLY;
        }
        if metadata.is_dir() {
            attributes |= FileAttributes::DIRECTORY;
        } else {
            attributes |= FileAttributes::ARCHIVE;
        }
        if Path::new(&path)
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
        {
            attributes |= FileAttributes::HIDDEN;
        }

        let ticks = |time: io::Result<SystemTime>| {
            time.map(ticks_from_system_time).unwrap_or_default()
        };

        Self {
            path,
            length: metadata.len(),
            attributes,
            created: ticks(metadata.created()),
            modified: ticks(metadata.modified()),
            accessed: ticks(metadata.accessed()),
        }
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str())
    }

    /// Apply the recorded timestamps and the read-only bit to a
    /// restored file. Other attribute bits have no Unix counterpart
    /// and are only carried in the catalog.
    pub fn apply_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let file = File::options().write(true).open(path)?;
        let times = FileTimes::new()
            .set_modified(system_time_from_ticks(self.modified))
            .set_accessed(system_time_from_ticks(self.accessed));
        file.set_times(times)?;
        drop(file);

        if self.attributes.contains(FileAttributes::READ_ONLY) {
            let mut permissions = std::fs::metadata(path)?.permissions();
            permissions.set_readonly(true);
            std::fs::set_permissions(path, permissions)?;
        }
        Ok(())
    }

    pub(crate) fn write_fields<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_wire_string(&self.path)?;
        writer.write_le_u64(self.length)?;
        writer.write_le_u32(self.attributes.bits())?;
        writer.write_le_u64(self.created)?;
        writer.write_le_u64(self.modified)?;
        writer.write_le_u64(self.accessed)
    }

    pub(crate) fn read_fields<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            path: reader.read_wire_string()?,
            length: reader.read_le_u64()?,
            attributes: FileAttributes::from_bits_truncate(reader.read_le_u32()?),
            created: reader.read_le_u64()?,
            modified: reader.read_le_u64()?,
            accessed: reader.read_le_u64()?,
        })
    }
}

/// One catalog entry: a unique id, the starting logical block of the
/// payload, the descriptor, and the payload digest.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Catalog-unique id, 0 is reserved for "unset"
    pub id: u64,
    /// Logical block where the payload starts
    pub block: u64,
    pub descriptor: FileDescriptor,
    pub hash: Option<Vec<u8>>,
}

impl FileInfo {
    pub fn is_valid(&self) -> bool {
        self.id != 0
    }

    pub fn path(&self) -> &str {
        &self.descriptor.path
    }
}

impl WireRecord for FileInfo {
    fn write_record<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_signature()?;
        writer.write_le_u64(self.id)?;
        writer.write_le_u64(self.block)?;
        self.descriptor.write_fields(writer)?;
        writer.write_wire_bytes(self.hash.as_deref())
    }

    fn read_record<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        if !reader.read_signature()? {
            return Ok(None);
        }
        Ok(Some(Self {
            id: reader.read_le_u64()?,
            block: reader.read_le_u64()?,
            descriptor: FileDescriptor::read_fields(reader)?,
            hash: reader.read_wire_bytes()?,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn sample_descriptor(path: &str, modified: u64) -> FileDescriptor {
        FileDescriptor {
            path: path.to_string(),
            length: 1234,
            attributes: FileAttributes::ARCHIVE,
            created: modified - 1000,
            modified,
            accessed: modified + 1000,
        }
    }

    #[test]
    fn file_info_round_trip() {
        let info = FileInfo {
            id: 7,
            block: 42,
            descriptor: sample_descriptor("/data/report.txt", 5_000_000),
            hash: Some(vec![0xde, 0xad, 0xbe, 0xef]),
        };
        let mut buf = Vec::new();
        info.write_record(&mut buf).unwrap();
        let back = FileInfo::read_record(&mut Cursor::new(&buf))
            .unwrap()
            .unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn signature_flip_reads_absent() {
        let info = FileInfo {
            id: 1,
            block: 0,
            descriptor: sample_descriptor("/a", 1),
            hash: None,
        };
        let mut buf = Vec::new();
        info.write_record(&mut buf).unwrap();
        buf[1] ^= 0xff;
        assert!(FileInfo::read_record(&mut Cursor::new(&buf))
            .unwrap()
            .is_none());
    }

    #[test]
    fn file_name_extraction() {
        let descriptor = sample_descriptor("/var/backups/2026/data.bin", 1);
        assert_eq!(descriptor.file_name(), "data.bin");
    }
}
