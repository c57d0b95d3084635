//! Device backend for Linux SCSI tapes (st driver)

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::linux_mtio::*;
use crate::{
    DriveCapabilities, DriveOptions, MediaInfo, PartitionMode, TapeDevice, TapeError,
};

/// Map an errno seen while obtaining the handle. No fd exists yet to
/// ask the driver for details, so this is a plain table; the retry
/// logic in the drive layer keys on the transient kinds.
fn classify_open_errno(errno: Errno) -> TapeError {
    match errno {
        Errno::EBUSY | Errno::EAGAIN | Errno::ENXIO => TapeError::NotReady,
        Errno::ENOMEDIUM => TapeError::NoMedia,
        Errno::EUNATCH => TapeError::BusReset,
        Errno::EIO => TapeError::MediaChanged,
        other => TapeError::Io(other.into()),
    }
}

/// Open a tape device path (`/dev/nst0`, ...).
///
/// Opens with `O_NONBLOCK` so the call does not stall waiting for
/// media, then clears the flag again for normal blocking I/O. Errors
/// come back classified so callers can retry the transient ones.
pub fn open_linux_tape_device<P: AsRef<Path>>(path: P) -> Result<File, TapeError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path.as_ref())
        .map_err(|err| match err.raw_os_error() {
            Some(code) => classify_open_errno(Errno::from_i32(code)),
            None => TapeError::Io(err),
        })?;

    let flags = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL).map_err(classify_open_errno)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.remove(OFlag::O_NONBLOCK);
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(classify_open_errno)?;

    Ok(file)
}

/// `TapeDevice` over a non-rewinding Linux tape device node.
///
/// The st driver exposes no portable capability query, so the backend
/// starts from [`DriveCapabilities::minimal`]; callers that know their
/// hardware can widen the set with [`assume_capabilities`].
///
/// [`assume_capabilities`]: LinuxTapeDevice::assume_capabilities
pub struct LinuxTapeDevice {
    file: File,
    caps: DriveCapabilities,
}

impl LinuxTapeDevice {
    /// Device path for a drive index, `/dev/nst{n}` convention.
    pub fn device_path(index: u32) -> String {
        format!("/dev/nst{index}")
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TapeError> {
        let file = open_linux_tape_device(path)?;
        Ok(Self {
            file,
            caps: DriveCapabilities::minimal(),
        })
    }

    /// Declare drive features the st driver cannot report.
    pub fn assume_capabilities(&mut self, caps: DriveCapabilities) {
        self.caps = caps;
    }

    fn mtop(&mut self, mt_op: MTCmd, mt_count: i32) -> Result<(), TapeError> {
        let cmd = mtop { mt_op, mt_count };
        match unsafe { mtioctop(self.file.as_raw_fd(), &cmd) } {
            Ok(_) => Ok(()),
            Err(errno) => Err(self.classify_errno(errno)),
        }
    }

    /// MTNOP flushes the driver's buffer as a side effect; used before
    /// reading status with MTIOCGET.
    fn mtnop(&mut self) {
        let cmd = mtop {
            mt_op: MTCmd::MTNOP,
            mt_count: 1,
        };
        let _ = unsafe { mtioctop(self.file.as_raw_fd(), &cmd) };
    }

    fn drive_status(&mut self) -> Result<mtget, TapeError> {
        self.mtnop();
        let mut status = mtget::default();
        unsafe { mtiocget(self.file.as_raw_fd(), &mut status) }
            .map_err(|errno| TapeError::Io(errno.into()))?;
        Ok(status)
    }

    fn gmt_flags(&mut self) -> GMTStatusFlags {
        match self.drive_status() {
            Ok(status) => GMTStatusFlags::from_bits_truncate(status.mt_gstat),
            Err(_) => GMTStatusFlags::empty(),
        }
    }

    /// Map an errno (plus the generic status word where it matters)
    /// onto the error taxonomy.
    fn classify_errno(&mut self, errno: Errno) -> TapeError {
        match errno {
            Errno::ENOSPC => TapeError::EndOfMedia,
            Errno::ENODATA => TapeError::NoData,
            Errno::ENOMEDIUM => TapeError::NoMedia,
            Errno::EBUSY | Errno::EAGAIN => TapeError::NotReady,
            Errno::EUNATCH => TapeError::BusReset,
            Errno::EIO => {
                let gmt = self.gmt_flags();
                if gmt.contains(GMTStatusFlags::EOT) {
                    TapeError::EndOfMedia
                } else if gmt.contains(GMTStatusFlags::SM) {
                    TapeError::Setmark
                } else if gmt.contains(GMTStatusFlags::EOF) {
                    TapeError::Filemark
                } else if gmt.contains(GMTStatusFlags::EOD) {
                    TapeError::NoData
                } else if gmt.contains(GMTStatusFlags::BOT) {
                    TapeError::BeginningOfMedia
                } else if gmt.contains(GMTStatusFlags::DRIVE_OPEN) {
                    TapeError::MediaChanged
                } else {
                    TapeError::Io(errno.into())
                }
            }
            other => TapeError::Io(other.into()),
        }
    }

    /// A zero-byte read means the head sits on a mark (or ran out of
    /// recorded data); the status word tells which.
    fn classify_zero_read(&mut self) -> TapeError {
        let gmt = self.gmt_flags();
        if gmt.contains(GMTStatusFlags::SM) {
            TapeError::Setmark
        } else if gmt.contains(GMTStatusFlags::EOF) {
            TapeError::Filemark
        } else if gmt.contains(GMTStatusFlags::EOD) {
            TapeError::NoData
        } else {
            TapeError::EndOfFile
        }
    }
}

impl TapeDevice for LinuxTapeDevice {
    fn capabilities(&mut self) -> Result<DriveCapabilities, TapeError> {
        Ok(self.caps.clone())
    }

    fn media_info(&mut self) -> Result<MediaInfo, TapeError> {
        let status = self.drive_status()?;
        if status.mt_type != MT_TYPE_ISSCSI1 && status.mt_type != MT_TYPE_ISSCSI2 {
            return Err(TapeError::invalid_data(format!(
                "unsupported tape type {}",
                status.mt_type
            )));
        }
        let gmt = GMTStatusFlags::from_bits_truncate(status.mt_gstat);
        if gmt.contains(GMTStatusFlags::DRIVE_OPEN) || !gmt.contains(GMTStatusFlags::ONLINE) {
            return Err(TapeError::NoMedia);
        }
        let block_size = ((status.mt_dsreg & MT_ST_BLKSIZE_MASK) >> MT_ST_BLKSIZE_SHIFT) as u32;
        Ok(MediaInfo {
            // st reports no media geometry
            capacity: None,
            remaining: None,
            block_size,
            partition_count: 1,
            write_protect: gmt.contains(GMTStatusFlags::WR_PROT),
        })
    }

    fn apply_options(&mut self, options: &DriveOptions) -> Result<(), TapeError> {
        // Compression has a dedicated ioctl; the other knobs are
        // driver booleans. ECC, padding and the EOT warning zone have
        // no Linux interface and stay with the drive defaults.
        if self.caps.supports_compression {
            self.mtop(MTCmd::MTCOMPRESSION, options.compression as i32)?;
        }

        let mut opts = SetDrvBufferOptions::BUFFER_WRITES
            | SetDrvBufferOptions::ASYNC_WRITES
            | SetDrvBufferOptions::READ_AHEAD
            | SetDrvBufferOptions::CAN_BSR
            | SetDrvBufferOptions::SCSI2LOGICAL;
        if self.caps.supports_partitions() {
            opts |= SetDrvBufferOptions::CAN_PARTITIONS;
        }
        self.mtop(
            MTCmd::MTSETDRVBUFFER,
            (SetDrvBufferCmd::MT_ST_BOOLEANS as i32) | opts.bits(),
        )
    }

    fn set_block_size(&mut self, size: u32) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTSETBLK, size as i32)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TapeError> {
        match nix::unistd::read(self.file.as_raw_fd(), buffer) {
            Ok(0) => Err(self.classify_zero_read()),
            Ok(count) => Ok(count),
            Err(errno) => Err(self.classify_errno(errno)),
        }
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize, TapeError> {
        match nix::unistd::write(self.file.as_raw_fd(), buffer) {
            Ok(count) => Ok(count),
            Err(errno) => Err(self.classify_errno(errno)),
        }
    }

    fn load(&mut self) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTLOAD, 1)
    }

    fn unload(&mut self) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTOFFL, 1)
    }

    fn rewind(&mut self) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTREW, 1)
    }

    fn space_to_end_of_data(&mut self) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTEOM, 1)
    }

    fn set_partition(&mut self, partition: u32) -> Result<(), TapeError> {
        // st numbers partitions from 0
        self.mtop(MTCmd::MTSETPART, partition as i32 - 1)
    }

    fn seek_block(&mut self, block: u64) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTSEEK, block as i32)
    }

    fn tell_block(&mut self) -> Result<u64, TapeError> {
        let mut pos = mtpos { mt_blkno: 0 };
        unsafe { mtiocpos(self.file.as_raw_fd(), &mut pos) }
            .map_err(|errno| TapeError::Io(errno.into()))?;
        Ok(pos.mt_blkno as u64)
    }

    fn space_filemarks(&mut self, count: i32) -> Result<(), TapeError> {
        if count >= 0 {
            self.mtop(MTCmd::MTFSF, count)
        } else {
            self.mtop(MTCmd::MTBSF, -count)
        }
    }

    fn space_setmarks(&mut self, count: i32) -> Result<(), TapeError> {
        if count >= 0 {
            self.mtop(MTCmd::MTFSS, count)
        } else {
            self.mtop(MTCmd::MTBSS, -count)
        }
    }

    fn space_sequential_filemarks(&mut self, count: i32) -> Result<(), TapeError> {
        // No dedicated st operation; emulate by spacing single marks.
        // Two marks are adjacent when the logical position advanced by
        // exactly one (nothing but the mark itself was crossed).
        let step = if count >= 0 { 1 } else { -1i64 };
        let wanted = count.unsigned_abs();
        let mut run = 0u32;
        let mut last_pos = self.tell_block()? as i64;
        loop {
            self.space_filemarks(step as i32)?;
            let pos = self.tell_block()? as i64;
            run = if pos == last_pos + step { run + 1 } else { 1 };
            last_pos = pos;
            if run == wanted {
                return Ok(());
            }
        }
    }

    fn write_filemarks(&mut self, count: u32) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTWEOF, count as i32)
    }

    fn write_setmarks(&mut self, count: u32) -> Result<(), TapeError> {
        if !self.caps.supports_setmarks {
            return Err(TapeError::Unsupported("setmarks"));
        }
        self.mtop(MTCmd::MTWSM, count as i32)
    }

    fn create_partitions(&mut self, mode: PartitionMode) -> Result<(), TapeError> {
        // MTMKPART: 0 formats a single partition, a positive count is
        // the size of the second partition in megabytes.
        let count = match mode {
            PartitionMode::Fixed { count: 1 } => 0,
            PartitionMode::Fixed { .. } => {
                return Err(TapeError::Unsupported("fixed multi-partitioning"))
            }
            PartitionMode::Select { count: 1, .. } => 0,
            PartitionMode::Select { size_mb, .. } | PartitionMode::Initiator { size_mb } => {
                size_mb as i32
            }
        };
        self.mtop(MTCmd::MTMKPART, count)
    }

    fn erase(&mut self, _fast: bool) -> Result<(), TapeError> {
        self.mtop(MTCmd::MTERASE, 1)
    }
}
