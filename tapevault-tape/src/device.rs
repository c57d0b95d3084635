use serde::Serialize;

use crate::TapeError;

/// Immutable per-drive capability descriptor, filled once at open.
#[derive(Debug, Clone, Serialize)]
pub struct DriveCapabilities {
    pub default_block_size: u32,
    pub min_block_size: u32,
    pub max_block_size: u32,
    /// 1 means the drive cannot partition media
    pub max_partition_count: u32,
    pub create_initiator_partitions: bool,
    pub create_select_partitions: bool,
    pub create_fixed_partitions: bool,
    pub supports_setmarks: bool,
    pub supports_sequential_filemarks: bool,
    pub supports_compression: bool,
    pub supports_ecc: bool,
    pub supports_data_padding: bool,
    pub supports_eot_warning_zone: bool,
}

impl DriveCapabilities {
    pub fn supports_partitions(&self) -> bool {
        self.max_partition_count > 1
    }

    /// Conservative capability set: what any sequential drive can do.
    pub fn minimal() -> Self {
        Self {
            default_block_size: 16 * 1024,
            min_block_size: 512,
            max_block_size: 256 * 1024,
            max_partition_count: 1,
            create_initiator_partitions: false,
            create_select_partitions: false,
            create_fixed_partitions: false,
            supports_setmarks: false,
            supports_sequential_filemarks: false,
            supports_compression: false,
            supports_ecc: false,
            supports_data_padding: false,
            supports_eot_warning_zone: false,
        }
    }
}

/// Mutable per-mount media view.
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    /// Total capacity in bytes, `None` if the device cannot report it
    pub capacity: Option<u64>,
    /// Remaining capacity behind the current position
    pub remaining: Option<u64>,
    pub block_size: u32,
    pub partition_count: u32,
    pub write_protect: bool,
}

/// Drive parameters applied after open. Unsupported features are
/// silently skipped by the device backend.
#[derive(Debug, Clone, Serialize)]
pub struct DriveOptions {
    pub compression: bool,
    pub ecc: bool,
    pub data_padding: bool,
    pub report_setmarks: bool,
    /// Early-warning zone before physical end of tape, in bytes
    pub eot_warning_size: u32,
}

/// How to lay partitions onto the media when formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Device-defined fixed partition sizes
    Fixed { count: u32 },
    /// Explicitly sized partitions
    Select { count: u32, size_mb: u32 },
    /// One initiator-defined partition of the given size plus the rest
    Initiator { size_mb: u32 },
}

/// The ioctl-like contract of a tape device endpoint.
///
/// `read`/`write` transfer exactly one block per call. Tapemark and
/// end-of-media conditions come back as [`TapeError`] values; the
/// drive layer above classifies them into status flags.
pub trait TapeDevice {
    fn capabilities(&mut self) -> Result<DriveCapabilities, TapeError>;
    fn media_info(&mut self) -> Result<MediaInfo, TapeError>;
    fn apply_options(&mut self, options: &DriveOptions) -> Result<(), TapeError>;
    fn set_block_size(&mut self, size: u32) -> Result<(), TapeError>;

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TapeError>;
    fn write(&mut self, buffer: &[u8]) -> Result<usize, TapeError>;

    fn load(&mut self) -> Result<(), TapeError>;
    fn unload(&mut self) -> Result<(), TapeError>;

    fn rewind(&mut self) -> Result<(), TapeError>;
    fn space_to_end_of_data(&mut self) -> Result<(), TapeError>;
    /// Switch the active partition (1-based).
    fn set_partition(&mut self, partition: u32) -> Result<(), TapeError>;
    fn seek_block(&mut self, block: u64) -> Result<(), TapeError>;
    fn tell_block(&mut self) -> Result<u64, TapeError>;

    /// Space over `count` filemarks; negative counts move backwards
    /// and end on the BOT side of the last mark crossed.
    fn space_filemarks(&mut self, count: i32) -> Result<(), TapeError>;
    fn space_setmarks(&mut self, count: i32) -> Result<(), TapeError>;
    /// Space to the first run of `count` consecutive filemarks and
    /// position past it.
    fn space_sequential_filemarks(&mut self, count: i32) -> Result<(), TapeError>;

    fn write_filemarks(&mut self, count: u32) -> Result<(), TapeError>;
    fn write_setmarks(&mut self, count: u32) -> Result<(), TapeError>;

    fn create_partitions(&mut self, mode: PartitionMode) -> Result<(), TapeError>;
    fn erase(&mut self, fast: bool) -> Result<(), TapeError>;
}
