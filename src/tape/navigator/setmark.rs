//! Layout for drives with setmark support on single-partition media:
//! `[set0][SM][set1][SM]…[toc1][FM][toc2][FM]`. The catalog starts
//! right behind the last setmark and is overwritten by the next
//! content write.

use tapevault_tape::{TapeDrive, TapeError};

use super::common::{move_to_set_by_setmarks, NavState};
use super::{NavigatorKind, SetCursor, TapeNavigator};
use crate::tape::TOC_CAPACITY_RESERVE;

pub struct SetmarkNavigator {
    state: NavState,
}

impl SetmarkNavigator {
    pub fn new() -> Self {
        Self {
            state: NavState::new(),
        }
    }
}

impl Default for SetmarkNavigator {
    fn default() -> Self {
        Self::new()
    }
}

/// Position behind the last setmark: end of content, which doubles as
/// the start of the catalog area. An empty medium degenerates to the
/// load point.
fn to_append_position(drive: &mut TapeDrive) -> Result<(), TapeError> {
    drive.fast_forward_to_end(None)?;
    match drive.move_next_setmark(-1) {
        Ok(()) => drive.move_next_setmark(1),
        Err(TapeError::BeginningOfMedia) => {
            drive.reset_error();
            drive.rewind()
        }
        Err(err) => Err(err),
    }
}

impl TapeNavigator for SetmarkNavigator {
    fn kind(&self) -> NavigatorKind {
        NavigatorKind::TocInSetWithSetmarks
    }

    fn cursor(&self) -> SetCursor {
        self.state.cursor
    }

    fn uses_filemark_separators(&self) -> bool {
        false
    }

    fn move_to_begin_of_content(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match drive.rewind() {
            Ok(()) => {
                self.state.arrive(SetCursor::At(0));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_end_of_content(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match to_append_position(drive) {
            Ok(()) => {
                self.state.arrive(SetCursor::At(-1));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_begin_of_toc(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match to_append_position(drive) {
            Ok(()) => {
                self.state.arrive(SetCursor::InToc);
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_set(&mut self, drive: &mut TapeDrive, target: i32) -> Result<(), TapeError> {
        move_to_set_by_setmarks(
            &mut self.state,
            drive,
            target,
            &mut |drive| drive.rewind(),
            &mut to_append_position,
        )
    }

    fn move_to_write_toc_position(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.move_to_end_of_content(drive)?;
        self.state.arrive(SetCursor::InToc);
        Ok(())
    }

    fn forget_position(&mut self) {
        self.state.cursor = SetCursor::Unknown;
    }

    fn write_set_separator(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match drive.write_setmark(1) {
            Ok(()) => {
                self.state.arrive(SetCursor::At(-1));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn skip_set_separator(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match drive.move_next_setmark(1) {
            Ok(()) => {
                self.state.advance();
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn on_begin_write_content(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.state.toc_invalidated = true;
        Ok(())
    }

    fn on_toc_written(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.state.toc_invalidated = false;
        Ok(())
    }

    fn toc_invalidated(&self) -> bool {
        self.state.toc_invalidated
    }

    fn remaining_capacity(&self, drive: &mut TapeDrive) -> Result<Option<u64>, TapeError> {
        Ok(drive
            .remaining_capacity()?
            .map(|remaining| remaining.saturating_sub(TOC_CAPACITY_RESERVE)))
    }
}
