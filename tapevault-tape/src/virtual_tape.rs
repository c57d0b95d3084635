//! In-memory tape device emulation, used by the test suite and for
//! development without drive hardware.

use crate::{
    DriveCapabilities, DriveOptions, MediaInfo, PartitionMode, TapeDevice, TapeError,
};

/// One recorded element. Blocks and marks each occupy one logical
/// position, which keeps `seek_block`/`tell_block` consistent with
/// what the positioning primitives report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapeItem {
    Block(Vec<u8>),
    Filemark,
    Setmark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Block(usize),
    Filemark,
    Setmark,
}

#[derive(Debug)]
struct Partition {
    capacity: u64,
    items: Vec<TapeItem>,
    pos: usize,
}

impl Partition {
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            items: Vec::new(),
            pos: 0,
        }
    }

    fn used(&self) -> u64 {
        self.items
            .iter()
            .map(|item| match item {
                TapeItem::Block(data) => data.len() as u64,
                _ => 0,
            })
            .sum()
    }
}

/// Emulates tape behavior on an in-memory medium.
///
/// Writing truncates everything behind the current position, capacity
/// overruns report end-of-media before anything is recorded, and
/// spacing over marks classifies the conditions a kernel driver would
/// report through errno.
pub struct VirtualTapeDevice {
    caps: DriveCapabilities,
    partitions: Vec<Partition>,
    current: usize,
    total_capacity: u64,
    block_size: u32,
    write_protect: bool,
    loaded: bool,
    report_setmarks: bool,
}

impl VirtualTapeDevice {
    /// A fully featured drive: multiple partitions, setmarks,
    /// sequential filemark search.
    pub fn new(capacity: u64) -> Self {
        let caps = DriveCapabilities {
            default_block_size: 16 * 1024,
            min_block_size: 64,
            max_block_size: 256 * 1024,
            max_partition_count: 2,
            create_initiator_partitions: true,
            create_select_partitions: true,
            create_fixed_partitions: true,
            supports_setmarks: true,
            supports_sequential_filemarks: true,
            supports_compression: true,
            supports_ecc: true,
            supports_data_padding: true,
            supports_eot_warning_zone: true,
        };
        Self::with_capabilities(caps, capacity)
    }

    /// Single partition drive with setmark support.
    pub fn with_setmarks_only(capacity: u64) -> Self {
        let mut caps = DriveCapabilities::minimal();
        caps.supports_setmarks = true;
        caps.supports_sequential_filemarks = true;
        Self::with_capabilities(caps, capacity)
    }

    /// Single partition drive, filemarks only, but able to locate
    /// sequential filemark runs.
    pub fn with_sequential_filemarks_only(capacity: u64) -> Self {
        let mut caps = DriveCapabilities::minimal();
        caps.supports_sequential_filemarks = true;
        Self::with_capabilities(caps, capacity)
    }

    /// The most basic drive: one partition, filemarks only.
    pub fn basic(capacity: u64) -> Self {
        Self::with_capabilities(DriveCapabilities::minimal(), capacity)
    }

    pub fn with_capabilities(caps: DriveCapabilities, capacity: u64) -> Self {
        Self {
            caps,
            partitions: vec![Partition::new(capacity)],
            current: 0,
            total_capacity: capacity,
            block_size: 16 * 1024,
            write_protect: false,
            loaded: false,
            report_setmarks: false,
        }
    }

    pub fn set_write_protect(&mut self, on: bool) {
        self.write_protect = on;
    }

    /// Recorded layout of a partition (1-based), for inspection.
    pub fn layout(&self, partition: u32) -> Vec<ItemKind> {
        self.partitions[(partition - 1) as usize]
            .items
            .iter()
            .map(|item| match item {
                TapeItem::Block(data) => ItemKind::Block(data.len()),
                TapeItem::Filemark => ItemKind::Filemark,
                TapeItem::Setmark => ItemKind::Setmark,
            })
            .collect()
    }

    /// XOR one byte inside the `block_index`-th data block of a
    /// partition. Corruption helper for integrity tests.
    pub fn flip_byte(&mut self, partition: u32, block_index: usize, offset: usize) {
        let part = &mut self.partitions[(partition - 1) as usize];
        let block = part
            .items
            .iter_mut()
            .filter_map(|item| match item {
                TapeItem::Block(data) => Some(data),
                _ => None,
            })
            .nth(block_index)
            .expect("no such block");
        block[offset] ^= 0xff;
    }

    fn part(&mut self) -> &mut Partition {
        &mut self.partitions[self.current]
    }

    fn check_loaded(&self) -> Result<(), TapeError> {
        if self.loaded {
            Ok(())
        } else {
            Err(TapeError::NoMedia)
        }
    }

    fn check_writable(&self) -> Result<(), TapeError> {
        self.check_loaded()?;
        if self.write_protect {
            return Err(TapeError::WriteProtected);
        }
        Ok(())
    }

    fn truncate_at_position(&mut self) {
        let part = self.part();
        part.items.truncate(part.pos);
    }

    fn append(&mut self, item: TapeItem) {
        let part = self.part();
        part.items.push(item);
        part.pos = part.items.len();
    }
}

impl TapeDevice for VirtualTapeDevice {
    fn capabilities(&mut self) -> Result<DriveCapabilities, TapeError> {
        Ok(self.caps.clone())
    }

    fn media_info(&mut self) -> Result<MediaInfo, TapeError> {
        self.check_loaded()?;
        let part = &self.partitions[self.current];
        Ok(MediaInfo {
            capacity: Some(self.total_capacity),
            remaining: Some(part.capacity.saturating_sub(part.used())),
            block_size: self.block_size,
            partition_count: self.partitions.len() as u32,
            write_protect: self.write_protect,
        })
    }

    fn apply_options(&mut self, options: &DriveOptions) -> Result<(), TapeError> {
        self.report_setmarks = options.report_setmarks;
        Ok(())
    }

    fn set_block_size(&mut self, size: u32) -> Result<(), TapeError> {
        if size < self.caps.min_block_size || size > self.caps.max_block_size {
            return Err(TapeError::invalid_data(format!(
                "block size {} out of range [{}, {}]",
                size, self.caps.min_block_size, self.caps.max_block_size
            )));
        }
        self.block_size = size;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TapeError> {
        self.check_loaded()?;
        let part = self.part();
        match part.items.get(part.pos) {
            None => Err(TapeError::NoData),
            Some(TapeItem::Filemark) => {
                part.pos += 1;
                Err(TapeError::Filemark)
            }
            Some(TapeItem::Setmark) => {
                part.pos += 1;
                Err(TapeError::Setmark)
            }
            Some(TapeItem::Block(data)) => {
                let count = data.len().min(buffer.len());
                buffer[..count].copy_from_slice(&data[..count]);
                part.pos += 1;
                Ok(count)
            }
        }
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize, TapeError> {
        self.check_writable()?;
        self.truncate_at_position();
        let part = self.part();
        if part.used() + buffer.len() as u64 > part.capacity {
            return Err(TapeError::EndOfMedia);
        }
        self.append(TapeItem::Block(buffer.to_vec()));
        Ok(buffer.len())
    }

    fn load(&mut self) -> Result<(), TapeError> {
        self.loaded = true;
        for part in &mut self.partitions {
            part.pos = 0;
        }
        self.current = 0;
        Ok(())
    }

    fn unload(&mut self) -> Result<(), TapeError> {
        self.loaded = false;
        Ok(())
    }

    fn rewind(&mut self) -> Result<(), TapeError> {
        self.check_loaded()?;
        self.part().pos = 0;
        Ok(())
    }

    fn space_to_end_of_data(&mut self) -> Result<(), TapeError> {
        self.check_loaded()?;
        let part = self.part();
        part.pos = part.items.len();
        Ok(())
    }

    fn set_partition(&mut self, partition: u32) -> Result<(), TapeError> {
        self.check_loaded()?;
        let index = (partition as usize)
            .checked_sub(1)
            .filter(|index| *index < self.partitions.len())
            .ok_or_else(|| TapeError::invalid_data(format!("no such partition: {partition}")))?;
        self.current = index;
        Ok(())
    }

    fn seek_block(&mut self, block: u64) -> Result<(), TapeError> {
        self.check_loaded()?;
        let part = self.part();
        if block as usize > part.items.len() {
            return Err(TapeError::NoData);
        }
        part.pos = block as usize;
        Ok(())
    }

    fn tell_block(&mut self) -> Result<u64, TapeError> {
        self.check_loaded()?;
        Ok(self.part().pos as u64)
    }

    fn space_filemarks(&mut self, count: i32) -> Result<(), TapeError> {
        self.check_loaded()?;
        let report_setmarks = self.report_setmarks;
        let part = self.part();
        if count >= 0 {
            let mut crossed = 0;
            while crossed < count {
                match part.items.get(part.pos) {
                    None => return Err(TapeError::NoData),
                    Some(TapeItem::Filemark) => {
                        part.pos += 1;
                        crossed += 1;
                    }
                    Some(TapeItem::Setmark) => {
                        part.pos += 1;
                        if report_setmarks {
                            return Err(TapeError::Setmark);
                        }
                    }
                    Some(TapeItem::Block(_)) => part.pos += 1,
                }
            }
            Ok(())
        } else {
            let mut crossed = 0;
            loop {
                if part.pos == 0 {
                    return Err(TapeError::BeginningOfMedia);
                }
                match &part.items[part.pos - 1] {
                    TapeItem::Filemark => {
                        part.pos -= 1;
                        crossed += 1;
                        if crossed == -count {
                            return Ok(());
                        }
                    }
                    TapeItem::Setmark => {
                        part.pos -= 1;
                        if report_setmarks {
                            return Err(TapeError::Setmark);
                        }
                    }
                    TapeItem::Block(_) => part.pos -= 1,
                }
            }
        }
    }

    fn space_setmarks(&mut self, count: i32) -> Result<(), TapeError> {
        self.check_loaded()?;
        let part = self.part();
        if count >= 0 {
            let mut crossed = 0;
            while crossed < count {
                match part.items.get(part.pos) {
                    None => return Err(TapeError::NoData),
                    Some(TapeItem::Setmark) => {
                        part.pos += 1;
                        crossed += 1;
                    }
                    Some(_) => part.pos += 1,
                }
            }
            Ok(())
        } else {
            let mut crossed = 0;
            loop {
                if part.pos == 0 {
                    return Err(TapeError::BeginningOfMedia);
                }
                match &part.items[part.pos - 1] {
                    TapeItem::Setmark => {
                        part.pos -= 1;
                        crossed += 1;
                        if crossed == -count {
                            return Ok(());
                        }
                    }
                    _ => part.pos -= 1,
                }
            }
        }
    }

    fn space_sequential_filemarks(&mut self, count: i32) -> Result<(), TapeError> {
        self.check_loaded()?;
        if !self.caps.supports_sequential_filemarks {
            return Err(TapeError::Unsupported("sequential filemark spacing"));
        }
        let part = self.part();
        if count >= 0 {
            let mut run = 0;
            loop {
                match part.items.get(part.pos) {
                    None => return Err(TapeError::NoData),
                    Some(TapeItem::Filemark) => {
                        part.pos += 1;
                        run += 1;
                        if run == count {
                            return Ok(());
                        }
                    }
                    Some(_) => {
                        part.pos += 1;
                        run = 0;
                    }
                }
            }
        } else {
            let mut run = 0;
            loop {
                if part.pos == 0 {
                    return Err(TapeError::BeginningOfMedia);
                }
                match &part.items[part.pos - 1] {
                    TapeItem::Filemark => {
                        part.pos -= 1;
                        run += 1;
                        if run == -count {
                            return Ok(());
                        }
                    }
                    _ => {
                        part.pos -= 1;
                        run = 0;
                    }
                }
            }
        }
    }

    fn write_filemarks(&mut self, count: u32) -> Result<(), TapeError> {
        self.check_writable()?;
        self.truncate_at_position();
        for _ in 0..count {
            self.append(TapeItem::Filemark);
        }
        Ok(())
    }

    fn write_setmarks(&mut self, count: u32) -> Result<(), TapeError> {
        self.check_writable()?;
        if !self.caps.supports_setmarks {
            return Err(TapeError::Unsupported("setmarks"));
        }
        self.truncate_at_position();
        for _ in 0..count {
            self.append(TapeItem::Setmark);
        }
        Ok(())
    }

    fn create_partitions(&mut self, mode: PartitionMode) -> Result<(), TapeError> {
        self.check_writable()?;
        let total = self.total_capacity;
        let two_way = |size_mb: u32| -> Result<Vec<u64>, TapeError> {
            let size = (size_mb as u64) * 1024 * 1024;
            if size >= total {
                return Err(TapeError::invalid_data(format!(
                    "partition size {size} exceeds media capacity"
                )));
            }
            Ok(vec![total - size, size])
        };
        let capacities = match mode {
            PartitionMode::Fixed { count } => {
                if !self.caps.create_fixed_partitions {
                    return Err(TapeError::Unsupported("fixed partitions"));
                }
                let count = count.clamp(1, self.caps.max_partition_count) as u64;
                vec![total / count; count as usize]
            }
            PartitionMode::Initiator { size_mb } => {
                if !self.caps.create_initiator_partitions || self.caps.max_partition_count < 2 {
                    return Err(TapeError::Unsupported("initiator partitions"));
                }
                two_way(size_mb)?
            }
            PartitionMode::Select { count, size_mb } => {
                if !self.caps.create_select_partitions {
                    return Err(TapeError::Unsupported("select partitions"));
                }
                if count > 1 {
                    if self.caps.max_partition_count < 2 {
                        return Err(TapeError::Unsupported("two-partition formatting"));
                    }
                    two_way(size_mb)?
                } else {
                    vec![total]
                }
            }
        };
        self.partitions = capacities.into_iter().map(Partition::new).collect();
        self.current = 0;
        Ok(())
    }

    fn erase(&mut self, _fast: bool) -> Result<(), TapeError> {
        self.check_writable()?;
        self.truncate_at_position();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn loaded(capacity: u64) -> VirtualTapeDevice {
        let mut dev = VirtualTapeDevice::new(capacity);
        dev.load().unwrap();
        dev
    }

    #[test]
    fn read_classifies_marks() {
        let mut dev = loaded(1 << 20);
        dev.write(&[1u8; 64]).unwrap();
        dev.write_filemarks(1).unwrap();
        dev.write_setmarks(1).unwrap();
        dev.rewind().unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(dev.read(&mut buf).unwrap(), 64);
        assert!(matches!(dev.read(&mut buf), Err(TapeError::Filemark)));
        assert!(matches!(dev.read(&mut buf), Err(TapeError::Setmark)));
        assert!(matches!(dev.read(&mut buf), Err(TapeError::NoData)));
    }

    #[test]
    fn write_reports_end_of_media() {
        let mut dev = loaded(128);
        dev.write(&[0u8; 64]).unwrap();
        dev.write(&[0u8; 64]).unwrap();
        assert!(matches!(
            dev.write(&[0u8; 64]),
            Err(TapeError::EndOfMedia)
        ));
    }

    #[test]
    fn write_truncates_behind_position() {
        let mut dev = loaded(1 << 20);
        dev.write(&[1u8; 64]).unwrap();
        dev.write(&[2u8; 64]).unwrap();
        dev.write_filemarks(1).unwrap();
        dev.seek_block(1).unwrap();
        dev.write(&[3u8; 64]).unwrap();
        assert_eq!(
            dev.layout(1),
            vec![ItemKind::Block(64), ItemKind::Block(64)]
        );
    }

    #[test]
    fn sequential_filemark_search() {
        let mut dev = loaded(1 << 20);
        dev.write(&[0u8; 64]).unwrap();
        dev.write_filemarks(1).unwrap();
        dev.write(&[0u8; 64]).unwrap();
        dev.write_filemarks(3).unwrap();
        dev.write(&[7u8; 64]).unwrap();
        dev.rewind().unwrap();

        dev.space_sequential_filemarks(3).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(dev.read(&mut buf).unwrap(), 64);
        assert_eq!(buf[0], 7);
    }

    #[test]
    fn backward_spacing_stops_at_bot() {
        let mut dev = loaded(1 << 20);
        dev.write(&[0u8; 64]).unwrap();
        dev.write_filemarks(1).unwrap();
        assert!(matches!(
            dev.space_filemarks(-2),
            Err(TapeError::BeginningOfMedia)
        ));
    }

    #[test]
    fn initiator_partitioning() {
        let mut dev = loaded(8 << 20);
        dev.create_partitions(PartitionMode::Initiator { size_mb: 2 })
            .unwrap();
        let info = dev.media_info().unwrap();
        assert_eq!(info.partition_count, 2);
        dev.set_partition(2).unwrap();
        assert_eq!(dev.media_info().unwrap().remaining, Some(2 << 20));
        dev.set_partition(1).unwrap();
        assert_eq!(dev.media_info().unwrap().remaining, Some(6 << 20));
    }
}
