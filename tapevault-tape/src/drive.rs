use std::time::Duration;

use serde::Serialize;

use crate::{
    DriveCapabilities, DriveOptions, LinuxTapeDevice, MediaInfo, PartitionMode, TapeDevice,
    TapeError, TapeErrorKind,
};

/// Attempts for open/load when the device reports a transient error.
const TRANSIENT_RETRIES: u32 = 4;
const TRANSIENT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Outcome of a block transfer. Tapemark and end-of-media conditions
/// are not failures; they ride along as flags next to the transferred
/// byte count.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockIo {
    pub transferred: usize,
    pub tapemark: bool,
    pub eof: bool,
}

/// Serializable drive summary for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct DriveStatus {
    pub capabilities: DriveCapabilities,
    pub media: Option<MediaInfo>,
    pub block_size: u32,
    pub position: Option<u64>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub last_error: TapeErrorKind,
}

/// The tape drive: owns the device handle from open to drop, keeps the
/// capability and media descriptors, and turns raw device conditions
/// into block I/O status flags.
pub struct TapeDrive {
    device: Box<dyn TapeDevice>,
    caps: DriveCapabilities,
    media: Option<MediaInfo>,
    block_size: u32,
    bytes_read: u64,
    bytes_written: u64,
    last_error: TapeErrorKind,
    sticky_error: TapeErrorKind,
}

impl TapeDrive {
    /// Open drive `n` (`/dev/nst{n}`) and fill the capability
    /// descriptor, retrying transient conditions on the open itself
    /// as well as on the parameter queries.
    pub fn open(device_index: u32) -> Result<Self, TapeError> {
        let path = LinuxTapeDevice::device_path(device_index);
        let device = retry_transient("open drive", || LinuxTapeDevice::open(&path))
            .map_err(|err| {
                log::error!("open drive '{path}' failed - {err}");
                err
            })?;
        Self::with_device(Box::new(device))
    }

    /// Build a drive over an already constructed device backend.
    pub fn with_device(mut device: Box<dyn TapeDevice>) -> Result<Self, TapeError> {
        let caps = retry_transient("query drive capabilities", || device.capabilities())?;
        let block_size = caps.default_block_size;
        let mut drive = Self {
            device,
            caps,
            media: None,
            block_size,
            bytes_read: 0,
            bytes_written: 0,
            last_error: TapeErrorKind::Ok,
            sticky_error: TapeErrorKind::Ok,
        };
        drive.apply_optimal_settings()?;
        Ok(drive)
    }

    /// Enable what the hardware offers: ECC, compression, padding,
    /// setmark reporting, and an early-warning zone of four default
    /// blocks before physical end of tape. Drives that refuse option
    /// changes (unprivileged access) still work with their defaults.
    fn apply_optimal_settings(&mut self) -> Result<(), TapeError> {
        let options = DriveOptions {
            compression: self.caps.supports_compression,
            ecc: self.caps.supports_ecc,
            data_padding: self.caps.supports_data_padding,
            report_setmarks: self.caps.supports_setmarks,
            eot_warning_size: 4 * self.caps.default_block_size,
        };
        if let Err(err) = self.device.apply_options(&options) {
            log::warn!("cannot apply drive settings, using defaults - {err}");
        }
        Ok(())
    }

    pub fn capabilities(&self) -> &DriveCapabilities {
        &self.caps
    }

    pub fn media(&self) -> Option<&MediaInfo> {
        self.media.as_ref()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn reset_counters(&mut self) {
        self.bytes_read = 0;
        self.bytes_written = 0;
    }

    /// Most recent error kind, `Ok` after a successful operation.
    pub fn last_error(&self) -> TapeErrorKind {
        self.last_error
    }

    /// The last error if there is one, otherwise the most recent
    /// non-ok error seen before the latest success.
    pub fn last_significant_error(&self) -> TapeErrorKind {
        if self.last_error != TapeErrorKind::Ok {
            self.last_error
        } else {
            self.sticky_error
        }
    }

    /// Clears only the most recent error slot.
    pub fn reset_error(&mut self) {
        self.last_error = TapeErrorKind::Ok;
    }

    /// Error bookkeeping: successes rotate the previous error into the
    /// sticky slot, failures land in the recent slot.
    fn track<T>(&mut self, result: Result<T, TapeError>) -> Result<T, TapeError> {
        match result {
            Ok(value) => {
                if self.last_error != TapeErrorKind::Ok {
                    self.sticky_error = self.last_error;
                }
                self.last_error = TapeErrorKind::Ok;
                Ok(value)
            }
            Err(err) => {
                self.last_error = err.kind();
                Err(err)
            }
        }
    }

    pub fn status(&mut self) -> DriveStatus {
        let position = self.device.tell_block().ok();
        DriveStatus {
            capabilities: self.caps.clone(),
            media: self.media.clone(),
            block_size: self.block_size,
            position,
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            last_error: self.last_error,
        }
    }

    /// Prepare the media for use and fill the media descriptor,
    /// retrying transient conditions.
    pub fn load_media(&mut self) -> Result<(), TapeError> {
        let device = &mut self.device;
        let media = retry_transient("load media", || {
            device.load()?;
            device.media_info()
        });
        let media = self.track(media)?;
        self.media = Some(media);
        self.set_block_size(self.block_size)?;
        Ok(())
    }

    pub fn unload_media(&mut self) -> Result<(), TapeError> {
        let result = self.device.unload();
        self.media = None;
        self.track(result)
    }

    /// Partition and wipe the media.
    ///
    /// With a positive `initiator_size` on drives that create
    /// initiator partitions, the media gets a content partition plus a
    /// dedicated partition of roughly that many bytes. Otherwise a
    /// single partition is created with whichever method the drive
    /// supports (plain erase as the last resort). Reloads the media
    /// and restores the default block size afterwards.
    pub fn format_media(&mut self, initiator_size: u64) -> Result<(), TapeError> {
        self.media.as_ref().ok_or(TapeError::NoMedia)?;

        let size_mb = initiator_size.div_ceil(1024 * 1024) as u32;
        let two_partitions = initiator_size > 0
            && self.caps.create_initiator_partitions
            && self.caps.supports_partitions();

        log::info!(
            "formatting media ({})",
            if two_partitions {
                "two partitions"
            } else {
                "single partition"
            }
        );

        let result = if two_partitions {
            self.device
                .create_partitions(PartitionMode::Initiator { size_mb })
        } else if self.caps.create_select_partitions {
            self.device
                .create_partitions(PartitionMode::Select { count: 1, size_mb: 0 })
        } else if self.caps.create_fixed_partitions {
            self.device.create_partitions(PartitionMode::Fixed { count: 1 })
        } else {
            self.device.rewind()?;
            self.device.erase(true)
        };
        self.track(result)?;

        self.load_media()?;
        self.set_block_size(0)?;
        Ok(())
    }

    /// Set the media block size, clamped to the drive limits. Zero
    /// selects the drive default. Returns the size actually set.
    pub fn set_block_size(&mut self, size: u32) -> Result<u32, TapeError> {
        let size = if size == 0 {
            self.caps.default_block_size
        } else {
            size.clamp(self.caps.min_block_size, self.caps.max_block_size)
        };
        let result = self.device.set_block_size(size);
        self.track(result)?;
        self.block_size = size;
        if let Some(media) = &mut self.media {
            media.block_size = size;
        }
        Ok(size)
    }

    /// Remaining capacity behind the current position, if the device
    /// reports one.
    pub fn remaining_capacity(&mut self) -> Result<Option<u64>, TapeError> {
        let result = self.device.media_info();
        let info = self.track(result)?;
        let remaining = info.remaining;
        self.media = Some(info);
        Ok(remaining)
    }

    /// Write whole blocks from `data`. A length that is not a multiple
    /// of the block size is truncated down; the stream layer always
    /// supplies aligned requests. The byte counter advances by what
    /// was actually transferred, end-of-media included.
    pub fn write_block(&mut self, data: &[u8]) -> Result<BlockIo, TapeError> {
        let block_size = self.block_size as usize;
        let whole = data.len() / block_size * block_size;
        let mut io = BlockIo::default();

        while io.transferred < whole {
            let chunk = &data[io.transferred..io.transferred + block_size];
            match self.device.write(chunk) {
                Ok(count) => {
                    io.transferred += count;
                    self.bytes_written += count as u64;
                }
                Err(err) if err.is_eof_condition() => {
                    self.classify_condition(&err, &mut io);
                    break;
                }
                Err(err) => {
                    self.last_error = err.kind();
                    return Err(err);
                }
            }
        }
        Ok(io)
    }

    /// Read whole blocks into `data`; same contract as
    /// [`write_block`](Self::write_block).
    pub fn read_block(&mut self, data: &mut [u8]) -> Result<BlockIo, TapeError> {
        let block_size = self.block_size as usize;
        let whole = data.len() / block_size * block_size;
        let mut io = BlockIo::default();

        while io.transferred < whole {
            let chunk = &mut data[io.transferred..io.transferred + block_size];
            match self.device.read(chunk) {
                Ok(count) => {
                    io.transferred += count;
                    self.bytes_read += count as u64;
                    if count < block_size {
                        // short record, deliver what we have
                        break;
                    }
                }
                Err(err) if err.is_eof_condition() => {
                    self.classify_condition(&err, &mut io);
                    break;
                }
                Err(err) => {
                    self.last_error = err.kind();
                    return Err(err);
                }
            }
        }
        Ok(io)
    }

    /// Normalize a device condition into the status flag pair.
    /// Filemark, setmark and end-of-media raise both flags; no-data
    /// and end-of-file only signal eof. The error slots stay as they
    /// are: in-band conditions are not failures.
    fn classify_condition(&self, err: &TapeError, io: &mut BlockIo) {
        debug_assert!(err.is_eof_condition());
        io.eof = true;
        io.tapemark = err.is_tapemark();
    }

    pub fn rewind(&mut self) -> Result<(), TapeError> {
        let result = self.device.rewind();
        self.track(result)
    }

    /// Move to the end of recorded data, optionally switching the
    /// partition first.
    pub fn fast_forward_to_end(&mut self, partition: Option<u32>) -> Result<(), TapeError> {
        if let Some(partition) = partition {
            self.move_to_partition(partition)?;
        }
        let result = self.device.space_to_end_of_data();
        self.track(result)
    }

    /// Switch the active partition. Targets above 1 first bounce to
    /// partition 1; some firmware refuses direct cross-partition
    /// switches.
    pub fn move_to_partition(&mut self, partition: u32) -> Result<(), TapeError> {
        if partition > 1 {
            let result = self.device.set_partition(1);
            self.track(result)?;
        }
        let result = self.device.set_partition(partition);
        self.track(result)
    }

    pub fn move_to_block(&mut self, block: u64) -> Result<(), TapeError> {
        let result = self.device.seek_block(block);
        self.track(result)
    }

    pub fn current_block(&mut self) -> Result<u64, TapeError> {
        let result = self.device.tell_block();
        self.track(result)
    }

    pub fn move_next_filemark(&mut self, count: i32) -> Result<(), TapeError> {
        let result = self.device.space_filemarks(count);
        self.track(result)
    }

    pub fn move_next_setmark(&mut self, count: i32) -> Result<(), TapeError> {
        let result = self.device.space_setmarks(count);
        self.track(result)
    }

    pub fn move_past_sequential_filemarks(&mut self, count: i32) -> Result<(), TapeError> {
        let result = self.device.space_sequential_filemarks(count);
        self.track(result)
    }

    pub fn write_filemark(&mut self, count: u32) -> Result<(), TapeError> {
        let result = self.device.write_filemarks(count);
        self.track(result)
    }

    pub fn write_setmark(&mut self, count: u32) -> Result<(), TapeError> {
        let result = self.device.write_setmarks(count);
        self.track(result)
    }

    /// Write a short zero-filled file so that an adjacent filemark
    /// pair is separated from preceding marks. Temporarily drops the
    /// block size to the gap length.
    pub fn write_gap_file(&mut self) -> Result<(), TapeError> {
        let saved = self.block_size;
        let gap_len = self.caps.min_block_size.max(64);
        self.set_block_size(gap_len)?;
        let zeros = vec![0u8; gap_len as usize];
        let result = self.write_block(&zeros);
        // restore before error propagation
        let restore = self.set_block_size(saved);
        let io = result?;
        restore?;
        if io.transferred < gap_len as usize {
            return Err(TapeError::EndOfMedia);
        }
        Ok(())
    }

    pub fn erase_media(&mut self, fast: bool) -> Result<(), TapeError> {
        self.rewind()?;
        let result = self.device.erase(fast);
        self.track(result)
    }
}

/// Retry helper for open and load: transient kernel conditions (bus
/// reset, media changed, not ready) settle after a short pause.
fn retry_transient<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, TapeError>,
) -> Result<T, TapeError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < TRANSIENT_RETRIES => {
                attempt += 1;
                log::warn!("{what}: {err}, retry {attempt}/{TRANSIENT_RETRIES}");
                std::thread::sleep(TRANSIENT_RETRY_PAUSE);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::VirtualTapeDevice;

    fn drive(capacity: u64) -> TapeDrive {
        let device = VirtualTapeDevice::new(capacity);
        let mut drive = TapeDrive::with_device(Box::new(device)).unwrap();
        drive.load_media().unwrap();
        drive
    }

    #[test]
    fn block_io_flags() {
        let mut drive = drive(1 << 20);
        drive.set_block_size(512).unwrap();

        let data = vec![0x5a; 1024];
        let io = drive.write_block(&data).unwrap();
        assert_eq!(io.transferred, 1024);
        assert!(!io.tapemark && !io.eof);
        drive.write_filemark(1).unwrap();

        drive.rewind().unwrap();
        let mut buf = vec![0u8; 512];
        let io = drive.read_block(&mut buf).unwrap();
        assert_eq!(io.transferred, 512);
        let io = drive.read_block(&mut buf).unwrap();
        assert_eq!(io.transferred, 512);

        // next read runs into the filemark
        let io = drive.read_block(&mut buf).unwrap();
        assert_eq!(io.transferred, 0);
        assert!(io.tapemark);
        assert!(io.eof);
    }

    #[test]
    fn unaligned_requests_are_truncated() {
        let mut drive = drive(1 << 20);
        drive.set_block_size(512).unwrap();
        let data = vec![1u8; 700];
        let io = drive.write_block(&data).unwrap();
        assert_eq!(io.transferred, 512);
    }

    #[test]
    fn counters_advance_on_end_of_media() {
        let mut drive = drive(1024);
        drive.set_block_size(512).unwrap();
        let data = vec![0u8; 2048];
        let io = drive.write_block(&data).unwrap();
        assert_eq!(io.transferred, 1024);
        assert!(io.eof);
        assert_eq!(drive.bytes_written(), 1024);
    }

    #[test]
    fn error_slots() {
        let mut drive = drive(1 << 20);
        // force an error: invalid block size
        assert!(drive.move_to_block(9999).is_err());
        assert_eq!(drive.last_error(), TapeErrorKind::NoData);
        assert_eq!(drive.last_significant_error(), TapeErrorKind::NoData);

        drive.rewind().unwrap();
        assert_eq!(drive.last_error(), TapeErrorKind::Ok);
        assert_eq!(drive.last_significant_error(), TapeErrorKind::NoData);

        drive.reset_error();
        assert_eq!(drive.last_error(), TapeErrorKind::Ok);
    }

    #[test]
    fn block_size_clamping() {
        let mut drive = drive(1 << 20);
        assert_eq!(drive.set_block_size(0).unwrap(), 16 * 1024);
        assert_eq!(drive.set_block_size(1).unwrap(), 64);
        assert_eq!(drive.set_block_size(1 << 30).unwrap(), 256 * 1024);
    }

    #[test]
    fn format_creates_toc_partition() {
        let mut drive = drive(64 << 20);
        drive.format_media(16 << 20).unwrap();
        let media = drive.media().unwrap();
        assert_eq!(media.partition_count, 2);
    }
}
