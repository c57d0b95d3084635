//! Multi-volume, incremental-capable file backup engine for
//! sequential tape drives.
//!
//! The stack, bottom up: the drive abstraction and buffers live in
//! the `tapevault-tape` crate; on top of it sit the layout
//! navigators, the phase state machine with its bounded byte streams,
//! the hash-protected on-tape catalog, and the backup/restore agents.

pub mod serialize;

pub mod hash;

pub mod catalog;

pub mod tape;

pub mod agents;

pub use tapevault_tape::{
    BlockIo, DriveCapabilities, DriveStatus, MediaInfo, TapeDevice, TapeDrive, TapeError,
    TapeErrorKind, VirtualTapeDevice,
};
