// Phase transitions: the legal table, the silent close of a write
// phase, and rejections from states with no path to the target.

use std::io::Write;

use anyhow::Error;
use tapevault_tape::{TapeDrive, TapeErrorKind, VirtualTapeDevice};

use crate::tape::navigator::SetCursor;
use crate::tape::{ManagerState, StreamManager, ALLOWED_TRANSITIONS};

use super::SharedDevice;

fn manager() -> (StreamManager, SharedDevice) {
    let shared = SharedDevice::new(VirtualTapeDevice::with_setmarks_only(64 << 20));
    let drive = TapeDrive::with_device(Box::new(shared.clone())).expect("virtual drive");
    (StreamManager::new(drive), shared)
}

#[test]
fn test_rejects_without_media() {
    let (mut manager, _device) = manager();
    assert_eq!(manager.state(), ManagerState::Open);

    let err = manager.begin_write_content().unwrap_err();
    assert_eq!(err.kind(), TapeErrorKind::InvalidState);
    let err = manager.begin_read_toc().unwrap_err();
    assert_eq!(err.kind(), TapeErrorKind::InvalidState);
    // failed transitions leave the state alone
    assert_eq!(manager.state(), ManagerState::Open);
}

#[test]
fn test_write_phase_is_closed_silently() -> Result<(), Error> {
    let (mut manager, device) = manager();
    manager.load_media()?;
    manager.prepare_media()?;
    manager.set_content_mode(1024, false)?;

    manager.begin_write_content()?;
    let mut stream = manager.produce_write_content_stream(None)?;
    stream.write_all(&[0x33u8; 3000])?;
    stream.finish()?;

    // crossing from a write phase into a read phase closes the set:
    // separator written, cursor at end of content
    manager.begin_read_toc()?;
    assert_eq!(manager.state(), ManagerState::ReadingToc);
    assert_eq!(manager.cursor(), SetCursor::InToc);

    let layout = device.0.borrow().layout(1);
    assert!(layout
        .iter()
        .any(|item| matches!(item, tapevault_tape::ItemKind::Setmark)));

    // a content stream cannot be produced while reading the catalog
    let err = manager.produce_read_content_stream(false, None).unwrap_err();
    assert_eq!(err.kind(), TapeErrorKind::InvalidState);
    Ok(())
}

#[test]
fn test_unload_path() -> Result<(), Error> {
    let (mut manager, _device) = manager();
    manager.load_media()?;
    manager.prepare_media()?;
    manager.release_media()?;
    manager.unload_media()?;
    assert_eq!(manager.state(), ManagerState::Open);
    Ok(())
}

#[test]
fn test_transition_table_shape() {
    use ManagerState::*;

    // writes never cross directly into another phase
    for (from, to) in ALLOWED_TRANSITIONS {
        if matches!(from, WritingToc | WritingContent) {
            assert_eq!(*to, MediaPrepared, "{from:?} may only return to prepared");
        }
    }
    // reads may cross into every read/write phase
    for to in [WritingToc, ReadingContent, WritingContent] {
        assert!(ALLOWED_TRANSITIONS.contains(&(ReadingToc, to)));
    }
    assert!(!ALLOWED_TRANSITIONS.contains(&(Open, WritingContent)));
    assert!(!ALLOWED_TRANSITIONS.contains(&(MediaLoaded, ReadingToc)));
}
