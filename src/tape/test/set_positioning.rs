// Every layout strategy must address sets correctly: partition,
// setmark, locator-mark and plain filemark media all run the same
// full-plus-incremental chain, and the cursor contract is checked
// directly on the setmark layout.

use anyhow::Error;
use tapevault_tape::{TapeDrive, VirtualTapeDevice};

use crate::agents::{
    BackupOutcome, BackupRequest, NullNotify, RestoreOutcome, RestoreRequest, TapeSession,
};
use crate::hash::HashAlgorithm;
use crate::tape::navigator::SetCursor;

use super::{create_testdir, session_over, SharedDevice};

struct ChainFile {
    name: &'static str,
    content: &'static [u8],
}

const CHAIN: &[ChainFile] = &[
    ChainFile {
        name: "one.dat",
        content: b"first things first",
    },
    ChainFile {
        name: "two.dat",
        content: &[0x5a; 4000],
    },
    ChainFile {
        name: "three.dat",
        content: b"tail",
    },
];

/// Three sets (full, incremental, incremental) with one distinct file
/// each, then an incremental restore that has to visit all of them.
fn run_chain(
    label: &str,
    device: VirtualTapeDevice,
    use_toc_mark: bool,
    filemarks_between_files: bool,
    initiator_size: u64,
) -> Result<(), Error> {
    let testdir = create_testdir(&format!("chain_{label}"))?;
    let (mut session, _device) = session_over(device);
    session.set_use_toc_mark(use_toc_mark);
    session.format(initiator_size)?;

    for (index, file) in CHAIN.iter().enumerate() {
        let path = testdir.join(file.name);
        std::fs::write(&path, file.content)?;

        let request = BackupRequest {
            files: vec![std::path::absolute(&path)?.to_str().unwrap().to_string()],
            description: format!("chain {index}"),
            hash_algorithm: HashAlgorithm::XxHash64,
            block_size: 1024,
            filemarks_between_files,
            incremental: index > 0,
            ignore_failures: false,
            capacity_cap: 0,
        };
        match session.backup(request, &mut NullNotify)? {
            BackupOutcome::Complete(stats) => assert_eq!(stats.processed, 1, "{label}"),
            other => panic!("{label}: unexpected outcome {other:?}"),
        }
    }
    assert_eq!(session.toc().set_count(), 3);

    let restore_dir = create_testdir(&format!("chain_{label}_out"))?;
    let request = RestoreRequest {
        incremental: true,
        target_dir: Some(restore_dir.clone()),
        ignore_failures: false,
        ..RestoreRequest::default()
    };
    match session.restore(request, &mut NullNotify)? {
        RestoreOutcome::Complete(stats) => {
            assert_eq!(stats.processed, 3, "{label}");
            assert!(stats.ok(), "{label}");
        }
        other => panic!("{label}: unexpected outcome {other:?}"),
    }

    for file in CHAIN {
        let restored = std::fs::read(restore_dir.join(file.name))?;
        assert_eq!(restored, file.content, "{label}: {} differs", file.name);
    }
    Ok(())
}

#[test]
fn test_chain_on_partitioned_media() -> Result<(), Error> {
    run_chain("partition", VirtualTapeDevice::new(64 << 20), false, false, 1 << 20)
}

#[test]
fn test_chain_with_setmarks() -> Result<(), Error> {
    run_chain(
        "setmark",
        VirtualTapeDevice::with_setmarks_only(64 << 20),
        false,
        false,
        0,
    )
}

#[test]
fn test_chain_with_toc_mark() -> Result<(), Error> {
    run_chain(
        "toc_mark",
        VirtualTapeDevice::with_sequential_filemarks_only(64 << 20),
        true,
        false,
        0,
    )
}

#[test]
fn test_chain_with_plain_filemarks() -> Result<(), Error> {
    run_chain("filemark", VirtualTapeDevice::basic(64 << 20), false, false, 0)
}

#[test]
fn test_chain_with_filemarks_between_files() -> Result<(), Error> {
    run_chain(
        "filemark_files",
        VirtualTapeDevice::basic(64 << 20),
        false,
        true,
        0,
    )
}

#[test]
fn test_cursor_contract() -> Result<(), Error> {
    let testdir = create_testdir("cursor_contract")?;
    let shared = SharedDevice::new(VirtualTapeDevice::with_setmarks_only(64 << 20));
    let drive = TapeDrive::with_device(Box::new(shared.clone()))?;
    let mut session = TapeSession::new(drive);
    session.format(0)?;

    // three one-file sets
    let mut expected_ids = Vec::new();
    for index in 0..3 {
        let path = testdir.join(format!("f{index}.dat"));
        std::fs::write(&path, vec![index as u8; 100])?;
        let request = BackupRequest {
            files: vec![std::path::absolute(&path)?.to_str().unwrap().to_string()],
            description: format!("set {index}"),
            hash_algorithm: HashAlgorithm::None,
            block_size: 1024,
            ..BackupRequest::default()
        };
        session.backup(request, &mut NullNotify)?;
        expected_ids.push(session.toc().set(0).unwrap().files()[0].id);
    }

    let manager = session.manager();
    manager.set_content_mode(1024, false)?;
    manager.begin_read_content()?;
    assert_eq!(manager.cursor(), SetCursor::At(0));

    manager.move_to_content_set(2)?;
    assert_eq!(manager.cursor(), SetCursor::At(2));
    {
        let mut stream = manager.produce_read_content_stream(false, None)?;
        let id = TapeSession::decode_file_header(&mut stream)?;
        assert_eq!(id, expected_ids[2]);
    }

    // set addressing from the end keeps the requested sign
    manager.move_to_content_set(-3)?;
    assert_eq!(manager.cursor(), SetCursor::At(-3));
    {
        let mut stream = manager.produce_read_content_stream(false, None)?;
        let id = TapeSession::decode_file_header(&mut stream)?;
        assert_eq!(id, expected_ids[1]);
    }

    manager.move_to_content_set(0)?;
    assert_eq!(manager.cursor(), SetCursor::At(0));

    // a target beyond the recorded sets fails and poisons the cursor
    assert!(manager.move_to_content_set(7).is_err());
    assert_eq!(manager.cursor(), SetCursor::Unknown);
    Ok(())
}
