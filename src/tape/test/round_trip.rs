// Single-set backup / restore / validate / verify round trip on a
// single-partition medium with CRC-32 file hashes.

use std::path::Path;

use anyhow::Error;
use tapevault_tape::VirtualTapeDevice;

use crate::agents::{
    BackupOutcome, BackupRequest, NullNotify, RestoreOutcome, RestoreRequest,
};
use crate::catalog::FileDescriptor;
use crate::hash::HashAlgorithm;

use super::{create_testdir, session_over};

fn write_file(dir: &Path, name: &str, content: &[u8]) -> Result<String, Error> {
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    Ok(std::path::absolute(path)?.to_str().unwrap().to_string())
}

#[test]
fn test_single_set_round_trip() -> Result<(), Error> {
    let testdir = create_testdir("single_set_round_trip")?;
    let content_b: Vec<u8> = (0..=255u8).collect();
    let file_a = write_file(&testdir, "a.txt", b"hello")?;
    let file_b = write_file(&testdir, "b.bin", &content_b)?;

    let (mut session, _device) = session_over(VirtualTapeDevice::with_setmarks_only(64 << 20));
    session.format(0)?;

    let request = BackupRequest {
        files: vec![file_a.clone(), file_b.clone()],
        description: "round trip".to_string(),
        hash_algorithm: HashAlgorithm::Crc32,
        block_size: 1024,
        filemarks_between_files: false,
        incremental: false,
        ignore_failures: false,
        capacity_cap: 0,
    };
    let outcome = session.backup(request, &mut NullNotify)?;
    let stats = match outcome {
        BackupOutcome::Complete(stats) => stats,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 0);
    assert!(stats.ok());

    // catalog shape and the known digests
    let toc = session.toc();
    assert_eq!(toc.set_count(), 1);
    let set = toc.set(1).unwrap();
    assert_eq!(set.file_count(), 2);
    assert_eq!(set.block_size(), 1024);
    assert_eq!(
        set.files()[0].hash.as_deref(),
        Some(0x3610a686u32.to_le_bytes().as_slice())
    );
    assert_eq!(
        set.files()[1].hash.as_deref(),
        Some(0x29058c73u32.to_le_bytes().as_slice())
    );

    // validate and verify both pass against the originals
    for pass in 0..2 {
        let request = RestoreRequest::default();
        let outcome = if pass == 0 {
            session.validate(request, &mut NullNotify)?
        } else {
            session.verify(request, &mut NullNotify)?
        };
        match outcome {
            RestoreOutcome::Complete(stats) => {
                assert_eq!(stats.processed, 2);
                assert!(stats.ok());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    // restore into a fresh directory
    let restore_dir = create_testdir("single_set_round_trip_out")?;
    let request = RestoreRequest {
        target_dir: Some(restore_dir.clone()),
        ..RestoreRequest::default()
    };
    match session.restore(request, &mut NullNotify)? {
        RestoreOutcome::Complete(stats) => assert_eq!(stats.processed, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(std::fs::read(restore_dir.join("a.txt"))?, b"hello");
    assert_eq!(std::fs::read(restore_dir.join("b.bin"))?, content_b);

    // timestamps travel with the descriptor
    let original = FileDescriptor::from_path(&file_a)?;
    let restored = FileDescriptor::from_path(restore_dir.join("a.txt"))?;
    assert_eq!(original.modified, restored.modified);
    assert_eq!(original.length, restored.length);

    Ok(())
}

#[test]
fn test_corrupt_payload_fails_validation() -> Result<(), Error> {
    let testdir = create_testdir("corrupt_payload")?;
    let file_a = write_file(&testdir, "a.bin", &[0x55u8; 3000])?;

    let (mut session, device) = session_over(VirtualTapeDevice::with_setmarks_only(64 << 20));
    session.format(0)?;

    let request = BackupRequest {
        files: vec![file_a],
        description: "corruption check".to_string(),
        hash_algorithm: HashAlgorithm::Crc64,
        block_size: 1024,
        ..BackupRequest::default()
    };
    session.backup(request, &mut NullNotify)?;

    // flip one payload byte in the second data block of the file
    device.0.borrow_mut().flip_byte(1, 1, 17);

    let request = RestoreRequest {
        ignore_failures: true,
        ..RestoreRequest::default()
    };
    match session.validate(request, &mut NullNotify)? {
        RestoreOutcome::Complete(stats) => {
            assert_eq!(stats.failed, 1);
            assert!(!stats.ok());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    Ok(())
}
