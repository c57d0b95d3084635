// Read stream behavior: NUL-terminated text mode and the length
// limit.

use std::io::{Read, Write};

use anyhow::Error;
use tapevault_tape::{TapeDrive, VirtualTapeDevice};

use crate::tape::StreamManager;

use super::SharedDevice;

fn content_manager() -> StreamManager {
    let shared = SharedDevice::new(VirtualTapeDevice::with_setmarks_only(64 << 20));
    let drive = TapeDrive::with_device(Box::new(shared.clone())).expect("virtual drive");
    let mut manager = StreamManager::new(drive);
    manager.load_media().unwrap();
    manager.prepare_media().unwrap();
    manager.set_content_mode(512, false).unwrap();
    manager
}

#[test]
fn test_text_mode_stops_at_nul() -> Result<(), Error> {
    let mut manager = content_manager();

    let mut payload = vec![0u8; 100];
    payload[..3].copy_from_slice(b"abc");
    payload[4..].fill(b'x');

    manager.begin_write_content()?;
    let mut stream = manager.produce_write_content_stream(None)?;
    stream.write_all(&payload)?;
    assert_eq!(stream.finish()?, 100);

    manager.begin_read_content()?;
    let mut stream = manager.produce_read_content_stream(true, None)?;
    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf)?, 3);
    assert_eq!(&buf[..3], b"abc");
    assert_eq!(stream.read(&mut buf)?, 0);
    assert_eq!(stream.read(&mut buf)?, 0);
    assert!(stream.is_eof());
    Ok(())
}

#[test]
fn test_length_limit_bounds_the_stream() -> Result<(), Error> {
    let mut manager = content_manager();

    let payload: Vec<u8> = (0..2000u32).map(|value| value as u8).collect();
    manager.begin_write_content()?;
    let mut stream = manager.produce_write_content_stream(None)?;
    stream.write_all(&payload)?;
    stream.finish()?;

    manager.begin_read_content()?;
    let mut stream = manager.produce_read_content_stream(false, Some(10))?;
    assert_eq!(stream.length(), Some(10));

    let mut delivered = Vec::new();
    stream.read_to_end(&mut delivered)?;
    assert_eq!(delivered, &payload[..10]);

    // limits only ever grow
    assert!(stream.set_length_limit(5).is_err());
    stream.set_length_limit(20).unwrap();
    let mut more = Vec::new();
    stream.read_to_end(&mut more)?;
    assert_eq!(more, &payload[10..20]);
    Ok(())
}

#[test]
fn test_flush_pads_to_whole_blocks() -> Result<(), Error> {
    let mut manager = content_manager();

    manager.begin_write_content()?;
    let mut stream = manager.produce_write_content_stream(None)?;
    stream.write_all(&[0xaau8; 700])?;
    // the accumulator counts caller bytes, not padding
    assert_eq!(stream.finish()?, 700);

    // two 512-byte blocks went to the medium
    let written = manager.drive().bytes_written();
    assert_eq!(written % 512, 0);
    assert!(written >= 1024);
    Ok(())
}
