//! Filemark layout with a catalog locator: when the drive can search
//! for runs of consecutive filemarks, the catalog is announced by a
//! gap file followed by a filemark run,
//! `[content][FM][gap][FM][FM][FM][toc1][FM][toc2][FM]`. Jumping to
//! the catalog becomes a single forward search instead of a walk from
//! end of data.

use tapevault_tape::{TapeDrive, TapeError};

use super::common::{move_to_set_by_filemarks, NavState};
use super::{NavigatorKind, SetCursor, TapeNavigator};
use crate::tape::{TOC_CAPACITY_RESERVE, TOC_MARK_FILEMARKS};

pub struct TocMarkNavigator {
    state: NavState,
    layout: Option<Vec<u32>>,
    /// None until the locator mark was searched for on this medium.
    toc_present: Option<bool>,
}

impl TocMarkNavigator {
    pub fn new() -> Self {
        Self {
            state: NavState::new(),
            layout: None,
            toc_present: None,
        }
    }

    /// Search the locator run from the load point; ends right behind
    /// it, at the first catalog copy.
    fn locate_toc(&mut self, drive: &mut TapeDrive) -> Result<bool, TapeError> {
        drive.rewind()?;
        match drive.move_past_sequential_filemarks(TOC_MARK_FILEMARKS as i32) {
            Ok(()) => {
                self.toc_present = Some(true);
                Ok(true)
            }
            Err(TapeError::NoData) => {
                drive.reset_error();
                self.toc_present = Some(false);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// End of content: in front of the gap file when a catalog
    /// follows, else end of data.
    fn to_content_end(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        let present = match self.toc_present {
            // the search doubles as positioning, so re-run it even
            // when an earlier one already saw the mark
            None | Some(true) => self.locate_toc(drive)?,
            Some(false) => false,
        };
        if !present {
            return drive.fast_forward_to_end(None);
        }
        // behind the run; walk back over it plus the content
        // separator, then forward past the separator to the gap
        match drive.move_next_filemark(-(TOC_MARK_FILEMARKS as i32 + 1)) {
            Ok(()) => drive.move_next_filemark(1),
            Err(TapeError::BeginningOfMedia) => {
                // catalog on otherwise empty media
                drive.reset_error();
                drive.rewind()
            }
            Err(err) => Err(err),
        }
    }
}

impl Default for TocMarkNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl TapeNavigator for TocMarkNavigator {
    fn kind(&self) -> NavigatorKind {
        NavigatorKind::TocInSetWithTocMark
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
        let mut state = std::mem::replace(&mut self.state, NavState::new());
        let result = match self.to_content_end(drive) {
            Ok(()) => {
                state.arrive(SetCursor::At(-1));
                Ok(())
            }
            Err(err) => state.fail(err),
        };
        self.state = state;
        result
    }

    fn move_to_begin_of_toc(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        match self.locate_toc(drive) {
            Ok(true) => {
                self.state.arrive(SetCursor::InToc);
                Ok(())
            }
            Ok(false) => self.state.fail(TapeError::NoData),
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

    /// Writing the catalog starts by recording the locator: the gap
    /// file and the filemark run in front of the first copy.
    fn on_begin_write_toc(&mut self, drive: &mut TapeDrive) -> Result<(), TapeError> {
        drive.write_gap_file()?;
        drive.write_filemark(TOC_MARK_FILEMARKS)
    }

    fn on_begin_write_content(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.state.toc_invalidated = true;
        self.toc_present = Some(false);
        Ok(())
    }

    fn on_toc_written(&mut self, _drive: &mut TapeDrive) -> Result<(), TapeError> {
        self.state.toc_invalidated = false;
        self.toc_present = Some(true);
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
