//! Layout strategies: where content sets and the catalog live on the
//! medium, and how to move between them.
//!
//! Which strategy applies is decided per mount from what the drive
//! and the loaded media support:
//!
//! * two partitions: content in partition 1, catalog in partition 2
//! * setmarks: sets separated by setmarks, catalog behind the last one
//! * sequential filemark search: filemark separators plus a locator
//!   mark (gap file + filemark run) in front of the catalog
//! * neither: filemark separators, the catalog is simply the last
//!   two files on tape

mod common;

mod partition;
pub use partition::PartitionNavigator;

mod setmark;
pub use setmark::SetmarkNavigator;

mod filemark;
pub use filemark::FilemarkNavigator;

mod toc_mark;
pub use toc_mark::TocMarkNavigator;

use tapevault_tape::{TapeDrive, TapeError};

/// Which content set the head is at.
///
/// Non-negative values count from the beginning of the content area,
/// `-1` is the append position behind the last set, `-2` and below
/// count back from there. The dual form avoids depending on the total
/// number of sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCursor {
    /// Position not derivable (after a failed move)
    Unknown,
    /// Somewhere inside the catalog area
    InToc,
    At(i32),
}

impl SetCursor {
    pub fn is_known(&self) -> bool {
        !matches!(self, SetCursor::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigatorKind {
    TocInPartition,
    TocInSetWithSetmarks,
    TocInSetWithTocMark,
    TocInSetWithFilemarks,
}

/// Strategy interface. All positioning methods leave the cursor at
/// the announced location on success and at `Unknown` on failure.
pub trait TapeNavigator {
    fn kind(&self) -> NavigatorKind;

    fn cursor(&self) -> SetCursor;

    /// True when set separators are filemarks (emulated setmarks).
    /// The stream layer sizes its read buffers larger in this mode to
    /// amortize mark detection.
    fn uses_filemark_separators(&self) -> bool;

    /// Filemark counts per set (separator included), derived from the
    /// catalog. Filemark-separated layouts need this before
    /// [`move_to_set`](Self::move_to_set); the medium alone cannot
    /// tell a file boundary from a set boundary.
    fn set_layout(&mut self, _marks_per_set: &[u32]) {}

    fn move_to_begin_of_content(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError>;
    fn move_to_end_of_content(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError>;
    fn move_to_begin_of_toc(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError>;

    /// Move to the start of a content set, planning the cheapest
    /// route among "from the beginning", "from the end" and "from the
    /// current position" and keeping the sign of the requested index
    /// on the cursor.
    fn move_to_set(&mut self, drive: &mut TapeDrive, target: i32) -> Result<(), TapeError>;

    /// Where the next catalog write has to start.
    fn move_to_write_toc_position(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.move_to_begin_of_toc(drive)
    }

    /// Forget the tracked position, forcing the next move to replan
    /// from an absolute anchor. Used after raw drive positioning went
    /// wrong underneath the navigator.
    fn forget_position(&mut self);

    /// Write one set separator at the current position.
    fn write_set_separator(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError>;

    /// Move past one set separator (between sets while reading).
    fn skip_set_separator(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError>;

    fn on_begin_write_toc(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        Ok(())
    }
    fn on_begin_write_content(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        Ok(())
    }
    fn on_toc_written(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        Ok(())
    }
    fn on_content_written(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        Ok(())
    }

    /// True while content newer than the last catalog write exists.
    fn toc_invalidated(&self) -> bool;

    /// Capacity available for content. Layouts that share the content
    /// area with the catalog keep a reserve back.
    fn remaining_capacity(&self, drive: &mut TapeDrive) -> Result<Option<u64>, TapeError>;
}

/// Pick the strategy for the mounted media.
pub fn navigator_for_drive(drive: &TapeDrive, use_toc_mark: bool) -> Box<dyn TapeNavigator> {
    let caps = drive.capabilities();
    let partitions = drive
        .media()
        .map(|media| media.partition_count)
        .unwrap_or(1);

    if partitions >= 2 {
        Box::new(PartitionNavigator::new(caps.supports_setmarks))
    } else if caps.supports_setmarks {
        Box::new(SetmarkNavigator::new())
    } else if caps.supports_sequential_filemarks && use_toc_mark {
        Box::new(TocMarkNavigator::new())
    } else {
        Box::new(FilemarkNavigator::new())
    }
}
