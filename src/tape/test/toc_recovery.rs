// The catalog goes to tape twice; a corrupted first copy must be
// survivable, two corrupted copies must not go unnoticed.

use anyhow::Error;
use tapevault_tape::{TapeDrive, VirtualTapeDevice};

use crate::agents::{BackupOutcome, BackupRequest, NullNotify, TapeSession};
use crate::hash::HashAlgorithm;

use super::{create_testdir, session_over, SharedDevice};

fn backed_up_device() -> Result<(SharedDevice, String), Error> {
    let testdir = create_testdir("toc_recovery")?;
    let file_a = testdir.join("a.txt");
    let file_b = testdir.join("b.bin");
    std::fs::write(&file_a, b"hello")?;
    std::fs::write(&file_b, (0..=255u8).collect::<Vec<u8>>())?;

    let (mut session, device) = session_over(VirtualTapeDevice::with_setmarks_only(64 << 20));
    session.format(0)?;

    let request = BackupRequest {
        files: vec![
            std::path::absolute(&file_a)?.to_str().unwrap().to_string(),
            std::path::absolute(&file_b)?.to_str().unwrap().to_string(),
        ],
        description: "recovery".to_string(),
        hash_algorithm: HashAlgorithm::Crc32,
        block_size: 1024,
        ..BackupRequest::default()
    };
    match session.backup(request, &mut NullNotify)? {
        BackupOutcome::Complete(stats) => assert_eq!(stats.processed, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let listing = session.list();
    session.eject()?;
    Ok((device, listing))
}

fn fresh_session(device: &SharedDevice) -> TapeSession {
    let drive = TapeDrive::with_device(Box::new(device.clone())).expect("virtual drive");
    TapeSession::new(drive)
}

#[test]
fn test_first_copy_corrupt_second_recovers() -> Result<(), Error> {
    let (device, listing) = backed_up_device()?;

    // data blocks on tape: file a, file b, catalog copy 1, copy 2.
    // Flip a byte inside the first catalog copy's payload.
    device.0.borrow_mut().flip_byte(1, 2, 50);

    let mut session = fresh_session(&device);
    session.load()?;

    let toc = session.toc();
    assert_eq!(toc.set_count(), 1);
    assert_eq!(toc.set(1).unwrap().file_count(), 2);
    assert_eq!(session.list(), listing);
    Ok(())
}

#[test]
fn test_both_copies_corrupt_fail() -> Result<(), Error> {
    let (device, _) = backed_up_device()?;

    device.0.borrow_mut().flip_byte(1, 2, 50);
    device.0.borrow_mut().flip_byte(1, 3, 50);

    let mut session = fresh_session(&device);
    assert!(session.load().is_err());
    Ok(())
}
