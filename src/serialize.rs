//! Little-endian wire codec for everything that goes on tape.
//!
//! All multi-byte integers are little-endian. Variable data is
//! length-prefixed with a signed 32-bit count; a negative count marks
//! a null byte sequence. Self-describing records start with a four
//! byte signature (magic + format version) and refuse to parse when it
//! does not match.

use std::io::{self, Read, Write};
use std::time::{Duration, SystemTime};

use endian_trait::Endian;

/// Record magic, "TF".
pub const SIGNATURE_MAGIC: [u8; 2] = [0x54, 0x46];
/// Current wire format version.
pub const FORMAT_VERSION: u16 = 0x0100;

/// Upper bound for any single length-prefixed item. Catalog records
/// are far smaller; anything beyond this is corruption.
const MAX_WIRE_LENGTH: usize = 256 * 1024 * 1024;

/// Ticks are 100ns units counted from 1601-01-01 UTC.
pub const TICKS_PER_SECOND: u64 = 10_000_000;
/// Tick offset of the Unix epoch.
pub const TICKS_BETWEEN_1601_AND_UNIX: u64 = 116_444_736_000_000_000;

pub fn ticks_from_system_time(time: SystemTime) -> u64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => {
            TICKS_BETWEEN_1601_AND_UNIX + after.as_nanos() as u64 / 100
        }
        // clamp pre-epoch times
        Err(_) => TICKS_BETWEEN_1601_AND_UNIX,
    }
}

pub fn system_time_from_ticks(ticks: u64) -> SystemTime {
    let since_unix = ticks.saturating_sub(TICKS_BETWEEN_1601_AND_UNIX);
    SystemTime::UNIX_EPOCH + Duration::from_nanos(since_unix.saturating_mul(100))
}

pub fn ticks_now() -> u64 {
    ticks_from_system_time(SystemTime::now())
}

/// The integrity signature prefix of every self-describing record.
#[derive(Endian, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(C, packed)]
pub struct RecordSignature {
    pub magic: [u8; 2],
    pub version: u16,
}

impl RecordSignature {
    pub const SIZE: usize = 4;

    pub fn new() -> Self {
        Self {
            magic: SIGNATURE_MAGIC,
            version: FORMAT_VERSION,
        }
    }

    pub fn is_valid(&self) -> bool {
        let version = self.version;
        self.magic == SIGNATURE_MAGIC && version == FORMAT_VERSION
    }
}

impl Default for RecordSignature {
    fn default() -> Self {
        Self::new()
    }
}

fn format_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Write half of the codec, blanket-implemented for any writer.
pub trait WireWrite: Write {
    fn write_le_u8(&mut self, value: u8) -> io::Result<()> {
        self.write_all(&[value])
    }

    fn write_le_u16(&mut self, value: u16) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_le_u32(&mut self, value: u32) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_le_i32(&mut self, value: i32) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_le_u64(&mut self, value: u64) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_wire_bool(&mut self, value: bool) -> io::Result<()> {
        self.write_le_u8(value as u8)
    }

    fn write_signature(&mut self) -> io::Result<()> {
        let signature = RecordSignature::new().to_le();
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &signature as *const RecordSignature as *const u8,
                RecordSignature::SIZE,
            )
        };
        self.write_all(bytes)
    }

    fn write_wire_string(&mut self, value: &str) -> io::Result<()> {
        self.write_le_i32(value.len() as i32)?;
        self.write_all(value.as_bytes())
    }

    /// Length-prefixed byte sequence; `None` goes out as length -1.
    fn write_wire_bytes(&mut self, value: Option<&[u8]>) -> io::Result<()> {
        match value {
            None => self.write_le_i32(-1),
            Some(bytes) => {
                self.write_le_i32(bytes.len() as i32)?;
                self.write_all(bytes)
            }
        }
    }

    fn write_wire_list<T: WireRecord>(&mut self, items: &[T]) -> io::Result<()>
    where
        Self: Sized,
    {
        self.write_le_i32(items.len() as i32)?;
        for item in items {
            item.write_record(self)?;
        }
        Ok(())
    }
}

impl<W: Write + ?Sized> WireWrite for W {}

/// Read half of the codec. Short reads surface as `UnexpectedEof`,
/// which the catalog layer reports as a format error.
pub trait WireRead: Read {
    fn read_le_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_le_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_le_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_le_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_le_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_wire_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_le_u8()? != 0)
    }

    /// Read and check the record signature. A mismatch is not an
    /// error here; the caller decides whether "absent" is fatal.
    fn read_signature(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; RecordSignature::SIZE];
        self.read_exact(&mut buf)?;
        let signature = RecordSignature {
            magic: [buf[0], buf[1]],
            version: u16::from_le_bytes([buf[2], buf[3]]),
        };
        Ok(signature.is_valid())
    }

    fn read_wire_length(&mut self) -> io::Result<usize> {
        let len = self.read_le_i32()?;
        if len < 0 || len as usize > MAX_WIRE_LENGTH {
            return Err(format_error("unreasonable length prefix"));
        }
        Ok(len as usize)
    }

    fn read_wire_string(&mut self) -> io::Result<String> {
        let len = self.read_wire_length()?;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| format_error("invalid utf-8 in string"))
    }

    fn read_wire_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        let len = self.read_le_i32()?;
        if len < 0 {
            return Ok(None);
        }
        if len as usize > MAX_WIRE_LENGTH {
            return Err(format_error("unreasonable length prefix"));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// An embedded record with a bad signature is corruption, not
    /// absence.
    fn read_wire_list<T: WireRecord>(&mut self) -> io::Result<Vec<T>>
    where
        Self: Sized,
    {
        let count = self.read_wire_length()?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            match T::read_record(self)? {
                Some(item) => items.push(item),
                None => return Err(format_error("embedded record signature mismatch")),
            }
        }
        Ok(items)
    }
}

impl<R: Read + ?Sized> WireRead for R {}

/// A self-describing, signature-prefixed record.
pub trait WireRecord: Sized {
    fn write_record<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// `Ok(None)` when the signature or version does not match.
    fn read_record<R: Read>(reader: &mut R) -> io::Result<Option<Self>>;
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn primitives_round_trip() {
        let mut buf = Vec::new();
        buf.write_le_u8(0xab).unwrap();
        buf.write_le_u32(0xdead_beef).unwrap();
        buf.write_le_u64(0x0123_4567_89ab_cdef).unwrap();
        buf.write_wire_bool(true).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(cursor.read_le_u8().unwrap(), 0xab);
        assert_eq!(cursor.read_le_u32().unwrap(), 0xdead_beef);
        assert_eq!(cursor.read_le_u64().unwrap(), 0x0123_4567_89ab_cdef);
        assert!(cursor.read_wire_bool().unwrap());
    }

    #[test]
    fn signature_bytes() {
        let mut buf = Vec::new();
        buf.write_signature().unwrap();
        assert_eq!(buf, vec![0x54, 0x46, 0x00, 0x01]);
        assert!(Cursor::new(&buf).read_signature().unwrap());

        for index in 0..4 {
            let mut bad = buf.clone();
            bad[index] ^= 0x01;
            assert!(!Cursor::new(&bad).read_signature().unwrap());
        }
    }

    #[test]
    fn strings_and_bytes() {
        let mut buf = Vec::new();
        buf.write_wire_string("grüße").unwrap();
        buf.write_wire_bytes(Some(&[1, 2, 3])).unwrap();
        buf.write_wire_bytes(None).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(cursor.read_wire_string().unwrap(), "grüße");
        assert_eq!(cursor.read_wire_bytes().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cursor.read_wire_bytes().unwrap(), None);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut buf = Vec::new();
        buf.write_wire_string("hello").unwrap();
        buf.truncate(buf.len() - 2);
        assert!(Cursor::new(buf).read_wire_string().is_err());
    }

    #[test]
    fn tick_conversions() {
        assert_eq!(
            ticks_from_system_time(SystemTime::UNIX_EPOCH),
            TICKS_BETWEEN_1601_AND_UNIX
        );
        let now = SystemTime::now();
        let ticks = ticks_from_system_time(now);
        let back = system_time_from_ticks(ticks);
        let delta = now
            .duration_since(back)
            .unwrap_or_else(|err| err.duration());
        assert!(delta < Duration::from_micros(1));
    }
}
