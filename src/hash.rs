//! Integrity hashes for file payloads and the catalog.
//!
//! These are error-detection digests, not authentication. The digest
//! goes onto the wire in little-endian byte order.

use std::hash::Hasher as _;
use std::io::{self, Read, Write};

use crc::{Crc, CRC_64_XZ};
use twox_hash::{XxHash32, XxHash3_128, XxHash3_64, XxHash64};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Hash algorithm selection, stored per backup set. The discriminants
/// are the on-wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum HashAlgorithm {
    None = 0,
    #[default]
    Crc32 = 1,
    Crc64 = 2,
    XxHash32 = 3,
    XxHash3 = 4,
    XxHash64 = 5,
    XxHash128 = 6,
}

/// The catalog itself is always protected with CRC-64, independent of
/// the per-set file hash selection.
pub const TOC_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Crc64;

impl HashAlgorithm {
    pub fn from_wire(code: i32) -> Option<Self> {
        match code {
            0 => Some(HashAlgorithm::None),
            1 => Some(HashAlgorithm::Crc32),
            2 => Some(HashAlgorithm::Crc64),
            3 => Some(HashAlgorithm::XxHash32),
            4 => Some(HashAlgorithm::XxHash3),
            5 => Some(HashAlgorithm::XxHash64),
            6 => Some(HashAlgorithm::XxHash128),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }

    /// Digest length in bytes, 0 for `None`.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::None => 0,
            HashAlgorithm::Crc32 | HashAlgorithm::XxHash32 => 4,
            HashAlgorithm::Crc64 | HashAlgorithm::XxHash3 | HashAlgorithm::XxHash64 => 8,
            HashAlgorithm::XxHash128 => 16,
        }
    }

    pub fn is_none(self) -> bool {
        self == HashAlgorithm::None
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            HashAlgorithm::None => "none",
            HashAlgorithm::Crc32 => "crc32",
            HashAlgorithm::Crc64 => "crc64",
            HashAlgorithm::XxHash32 => "xxhash32",
            HashAlgorithm::XxHash3 => "xxhash3",
            HashAlgorithm::XxHash64 => "xxhash64",
            HashAlgorithm::XxHash128 => "xxhash128",
        };
        write!(f, "{name}")
    }
}

/// Streaming digest over one file payload.
pub enum ContentHasher {
    None,
    Crc32(crc32fast::Hasher),
    Crc64(crc::Digest<'static, u64>),
    XxHash32(XxHash32),
    XxHash3(XxHash3_64),
    XxHash64(XxHash64),
    XxHash128(XxHash3_128),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::None => ContentHasher::None,
            HashAlgorithm::Crc32 => ContentHasher::Crc32(crc32fast::Hasher::new()),
            HashAlgorithm::Crc64 => ContentHasher::Crc64(CRC64.digest()),
            HashAlgorithm::XxHash32 => ContentHasher::XxHash32(XxHash32::with_seed(0)),
            HashAlgorithm::XxHash3 => ContentHasher::XxHash3(XxHash3_64::new()),
            HashAlgorithm::XxHash64 => ContentHasher::XxHash64(XxHash64::with_seed(0)),
            HashAlgorithm::XxHash128 => ContentHasher::XxHash128(XxHash3_128::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::None => {}
            ContentHasher::Crc32(hasher) => hasher.update(data),
            ContentHasher::Crc64(digest) => digest.update(data),
            ContentHasher::XxHash32(hasher) => hasher.write(data),
            ContentHasher::XxHash3(hasher) => hasher.write(data),
            ContentHasher::XxHash64(hasher) => hasher.write(data),
            ContentHasher::XxHash128(hasher) => hasher.write(data),
        }
    }

    /// Little-endian digest bytes; empty for `None`.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            ContentHasher::None => Vec::new(),
            ContentHasher::Crc32(hasher) => hasher.finalize().to_le_bytes().to_vec(),
            ContentHasher::Crc64(digest) => digest.finalize().to_le_bytes().to_vec(),
            ContentHasher::XxHash32(hasher) => (hasher.finish() as u32).to_le_bytes().to_vec(),
            ContentHasher::XxHash3(hasher) => hasher.finish().to_le_bytes().to_vec(),
            ContentHasher::XxHash64(hasher) => hasher.finish().to_le_bytes().to_vec(),
            ContentHasher::XxHash128(hasher) => hasher.finish_128().to_le_bytes().to_vec(),
        }
    }
}

/// One-shot digest helper.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Reader adapter feeding everything it delivers into a hasher.
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(algorithm),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

/// Writer adapter feeding everything it accepts into a hasher.
pub struct HashingWriter<W> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(algorithm),
        }
    }

    pub fn finalize(self) -> (W, Vec<u8>) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crc32_known_vectors() {
        assert_eq!(
            digest(HashAlgorithm::Crc32, b"hello"),
            0x3610a686u32.to_le_bytes().to_vec()
        );
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(
            digest(HashAlgorithm::Crc32, &bytes),
            0x29058c73u32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn digest_lengths_match_declaration() {
        for algorithm in [
            HashAlgorithm::None,
            HashAlgorithm::Crc32,
            HashAlgorithm::Crc64,
            HashAlgorithm::XxHash32,
            HashAlgorithm::XxHash3,
            HashAlgorithm::XxHash64,
            HashAlgorithm::XxHash128,
        ] {
            assert_eq!(digest(algorithm, b"payload").len(), algorithm.digest_len());
        }
    }

    #[test]
    fn streaming_equals_oneshot() {
        let data: Vec<u8> = (0..1000u32).flat_map(|value| value.to_le_bytes()).collect();
        for algorithm in [HashAlgorithm::Crc64, HashAlgorithm::XxHash64] {
            let mut hasher = ContentHasher::new(algorithm);
            for chunk in data.chunks(17) {
                hasher.update(chunk);
            }
            assert_eq!(hasher.finalize(), digest(algorithm, &data));
        }
    }

    #[test]
    fn wire_codes() {
        for code in 0..=6 {
            let algorithm = HashAlgorithm::from_wire(code).unwrap();
            assert_eq!(algorithm.to_wire(), code);
        }
        assert!(HashAlgorithm::from_wire(7).is_none());
        assert!(HashAlgorithm::from_wire(-1).is_none());
    }
}
