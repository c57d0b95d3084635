//! Layout for two-partition media: content in partition 1, catalog in
//! partition 2. The catalog never competes with content for space, so
//! no capacity reserve applies and content writes cannot invalidate
//! it.

use tapevault_tape::{TapeDrive, TapeError};

use super::common::{move_to_set_by_filemarks, move_to_set_by_setmarks, NavState};
use super::{NavigatorKind, SetCursor, TapeNavigator};

const CONTENT_PARTITION: u32 = 1;
const TOC_PARTITION: u32 = 2;

pub struct PartitionNavigator {
    state: NavState,
    use_setmarks: bool,
    layout: Option<Vec<u32>>,
}

impl PartitionNavigator {
    pub fn new(use_setmarks: bool) -> Self {
        Self {
            state: NavState::new(),
            use_setmarks,
            layout: None,
        }
    }
}

fn to_content_begin(drive: &mut TapeDrive) -> Result<(), TapeError> {
    drive.move_to_partition(CONTENT_PARTITION)?;
    drive.rewind()
}

fn to_content_end(drive: &mut TapeDrive) -> Result<(), TapeError> {
    drive.fast_forward_to_end(Some(CONTENT_PARTITION))
}

impl TapeNavigator for PartitionNavigator {
    fn kind(&self) -> NavigatorKind {
        NavigatorKind::TocInPartition
    }

    fn cursor(&self) -> SetCursor {
        self.state.cursor
    }

    fn uses_filemark_separators(&self) -> bool {
        !self.use_setmarks
    }

    fn set_layout(&mut self, marks_per_set: &[u32]) {
        self.layout = Some(marks_per_set.to_vec());
    }

    fn move_to_begin_of_content(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match to_content_begin(drive) {
            Ok(()) => {
                self.state.arrive(SetCursor::At(0));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_end_of_content(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match to_content_end(drive) {
            Ok(()) => {
                self.state.arrive(SetCursor::At(-1));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_begin_of_toc(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        let moved = drive
            .move_to_partition(TOC_PARTITION)
            .and_then(|()| drive.rewind());
        match moved {
            Ok(()) => {
                self.state.arrive(SetCursor::InToc);
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_set(&mut self, drive: &mut TapeDrive, target: i32) -> Result<(), TapeError> {
        // the walkers stay inside the content partition; enter it
        // first in case the head sits in the catalog partition
        if matches!(self.state.cursor, SetCursor::InToc | SetCursor::Unknown) {
            if let Err(err) = drive.move_to_partition(CONTENT_PARTITION) {
                return self.state.fail(err);
            }
            self.state.arrive(SetCursor::Unknown);
        }
        if self.use_setmarks {
            move_to_set_by_setmarks(
                &mut self.state,
                drive,
                target,
                &mut to_content_begin,
                &mut to_content_end,
            )
        } else {
            move_to_set_by_filemarks(
                &mut self.state,
                drive,
                target,
                self.layout.as_deref(),
                &mut to_content_begin,
                &mut to_content_end,
            )
        }
    }

    fn forget_position(&mut self) {
        self.state.cursor = SetCursor::Unknown;
    }

    fn write_set_separator(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        let written = if self.use_setmarks {
            drive.write_setmark(1)
        } else {
            drive.write_filemark(1)
        };
        match written {
            Ok(()) => {
                self.state.arrive(SetCursor::At(-1));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn skip_set_separator(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        let moved = if self.use_setmarks {
            drive.move_next_setmark(1)
        } else {
            drive.move_next_filemark(1)
        };
        match moved {
            Ok(()) => {
                self.state.advance();
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn toc_invalidated(&self) -> bool {
        false
    }

    fn remaining_capacity(&self, drive: &mut TapeDrive) -> Result<Option<u64>, TapeError> {
        drive.remaining_capacity()
    }
}
