//! End-to-end scenarios over the virtual tape device.
//!
//! # cargo test --release tape::test

mod round_trip;


mod toc_recovery;

mod state_machine;

mod text_mode;

mod set_positioning;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tapevault_tape::{
    DriveCapabilities, DriveOptions, MediaInfo, PartitionMode, TapeDevice, TapeDrive, TapeError,
    VirtualTapeDevice,
};

use crate::agents::TapeSession;

pub(crate) fn create_testdir(name: &str) -> Result<PathBuf, anyhow::Error> {
    let mut testdir: PathBuf = String::from("./target/testout").into();
    testdir.push(std::module_path!());
    testdir.push(name);

    let _ = std::fs::remove_dir_all(&testdir);
    std::fs::create_dir_all(&testdir)?;

    Ok(testdir)
}

/// Virtual device handle the test keeps while the drive owns the
/// device: corruption helpers stay reachable and the "cartridge" can
/// be swapped for multi-volume scenarios.
#[derive(Clone)]
pub(crate) struct SharedDevice(pub Rc<RefCell<VirtualTapeDevice>>);

impl SharedDevice {
    pub fn new(device: VirtualTapeDevice) -> Self {
        Self(Rc::new(RefCell::new(device)))
    }

    /// Swap the cartridge: the drive keeps its handle, the medium
    /// changes. Returns the removed cartridge so a test can mount it
    /// again later.
    pub fn insert(&self, device: VirtualTapeDevice) -> VirtualTapeDevice {
        std::mem::replace(&mut *self.0.borrow_mut(), device)
    }
}

impl TapeDevice for SharedDevice {
    fn capabilities(&mut self) -> Result<DriveCapabilities, TapeError> {
        self.0.borrow_mut().capabilities()
    }

    fn media_info(&mut self) -> Result<MediaInfo, TapeError> {
        self.0.borrow_mut().media_info()
    }

    fn apply_options(&mut self, options: &DriveOptions) -> Result<(), TapeError> {
        self.0.borrow_mut().apply_options(options)
    }

    fn set_block_size(&mut self, size: u32) -> Result<(), TapeError> {
        self.0.borrow_mut().set_block_size(size)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TapeError> {
        self.0.borrow_mut().read(buffer)
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize, TapeError> {
        self.0.borrow_mut().write(buffer)
    }

    fn load(&mut self) -> Result<(), TapeError> {
        self.0.borrow_mut().load()
    }

    fn unload(&mut self) -> Result<(), TapeError> {
        self.0.borrow_mut().unload()
    }

    fn rewind(&mut self) -> Result<(), TapeError> {
        self.0.borrow_mut().rewind()
    }

    fn space_to_end_of_data(&mut self) -> Result<(), TapeError> {
        self.0.borrow_mut().space_to_end_of_data()
    }

    fn set_partition(&mut self, partition: u32) -> Result<(), TapeError> {
        self.0.borrow_mut().set_partition(partition)
    }

    fn seek_block(&mut self, block: u64) -> Result<(), TapeError> {
        self.0.borrow_mut().seek_block(block)
    }

    fn tell_block(&mut self) -> Result<u64, TapeError> {
        self.0.borrow_mut().tell_block()
    }

    fn space_filemarks(&mut self, count: i32) -> Result<(), TapeError> {
        self.0.borrow_mut().space_filemarks(count)
    }

    fn space_setmarks(&mut self, count: i32) -> Result<(), TapeError> {
        self.0.borrow_mut().space_setmarks(count)
    }

    fn space_sequential_filemarks(&mut self, count: i32) -> Result<(), TapeError> {
        self.0.borrow_mut().space_sequential_filemarks(count)
    }

    fn write_filemarks(&mut self, count: u32) -> Result<(), TapeError> {
        self.0.borrow_mut().write_filemarks(count)
    }

    fn write_setmarks(&mut self, count: u32) -> Result<(), TapeError> {
        self.0.borrow_mut().write_setmarks(count)
    }

    fn create_partitions(&mut self, mode: PartitionMode) -> Result<(), TapeError> {
        self.0.borrow_mut().create_partitions(mode)
    }

    fn erase(&mut self, fast: bool) -> Result<(), TapeError> {
        self.0.borrow_mut().erase(fast)
    }
}

/// A session plus the kept device handle.
pub(crate) fn session_over(device: VirtualTapeDevice) -> (TapeSession, SharedDevice) {
    let shared = SharedDevice::new(device);
    let drive = TapeDrive::with_device(Box::new(shared.clone())).expect("virtual drive");
    (TapeSession::new(drive), shared)
}
