//! Layout for the plainest drives: filemarks emulate setmarks and the
//! catalog is simply the last two files on tape,
//! `[content][FM][toc1][FM][toc2][FM]`. Locating the catalog walks
//! back from end of data over the two catalog files and the final
//! content separator.

use tapevault_tape::{TapeDrive, TapeError};

use super::common::{move_to_set_by_filemarks, NavState};
use super::{NavigatorKind, SetCursor, TapeNavigator};
use crate::tape::{TOC_CAPACITY_RESERVE, TOC_COPIES};

pub struct FilemarkNavigator {
    state: NavState,
    layout: Option<Vec<u32>>,
    /// Whether the tail of the recorded area is a catalog. Assumed
    /// until a content write replaces it.
    toc_present: bool,
}

impl FilemarkNavigator {
    pub fn new() -> Self {
        Self {
            state: NavState::new(),
            layout: None,
            toc_present: true,
        }
    }

    /// Backwards from end of data over the catalog copies (one
    /// filemark each) plus the content separator, then forward again:
    /// start of the first catalog copy, which is also where new
    /// content goes.
    fn to_toc_start(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        drive.fast_forward_to_end(None)?;
        match drive.move_next_filemark(-(TOC_COPIES as i32 + 1)) {
            Ok(()) => drive.move_next_filemark(1),
            Err(TapeError::BeginningOfMedia) => {
                // fewer marks than a catalog needs: (nearly) blank
                drive.reset_error();
                self.toc_present = false;
                drive.rewind()
            }
            Err(err) => Err(err),
        }
    }

    fn to_content_end(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        if self.toc_present {
            self.to_toc_start(drive)
        } else {
            drive.fast_forward_to_end(None)
        }
    }
}

impl Default for FilemarkNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl TapeNavigator for FilemarkNavigator {
    fn kind(&self) -> NavigatorKind {
        NavigatorKind::TocInSetWithFilemarks
    }

    fn cursor(&self) -> SetCursor {
        self.state.cursor
    }

    fn uses_filemark_separators(&self) -> bool {
        true
    }

    fn set_layout(&mut self, marks_per_set: &[u32]) {
        self.layout = Some(marks_per_set.to_vec());
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
        match self.to_content_end(drive) {
            Ok(()) => {
                self.state.arrive(SetCursor::At(-1));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_begin_of_toc(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        if !self.toc_present {
            return self.state.fail(TapeError::NoData);
        }
        match self.to_toc_start(drive) {
            Ok(()) if self.toc_present => {
                self.state.arrive(SetCursor::InToc);
                Ok(())
            }
            Ok(()) => self.state.fail(TapeError::NoData),
            Err(err) => self.state.fail(err),
        }
    }

    fn move_to_set(&mut self, drive: &mut TapeDrive, target: i32) -> Result<(), TapeError> {
        let layout = self.layout.clone();
        let mut state = std::mem::replace(&mut self.state, NavState::new());
        let result = move_to_set_by_filemarks(
            &mut state,
            drive,
            target,
            layout.as_deref(),
            &mut |drive| drive.rewind(),
            &mut |drive| self.to_content_end(drive),
        );
        self.state = state;
        result
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
        match drive.write_filemark(1) {
            Ok(()) => {
                self.state.arrive(SetCursor::At(-1));
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn skip_set_separator(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match drive.move_next_filemark(1) {
            Ok(()) => {
                self.state.advance();
                Ok(())
            }
            Err(err) => self.state.fail(err),
        }
    }

    fn on_begin_write_content(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.state.toc_invalidated = true;
        self.toc_present = false;
        Ok(())
    }

    fn on_toc_written(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.state.toc_invalidated = false;
        self.toc_present = true;
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
