//! The drive phase state machine.
//!
//! The manager serializes all access to one drive into disjoint read
//! and write phases, drives the navigator between them, and issues
//! the bounded byte streams the agents work with. Only one stream is
//! alive at a time; the borrow on the manager enforces it.

use tapevault_tape::{TapeDrive, TapeError};

use super::navigator::{navigator_for_drive, SetCursor, TapeNavigator};
use super::{TapeReadStream, TapeWriteStream, DEFAULT_CONTENT_BLOCK_SIZE, TOC_BLOCK_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    NotInitialized,
    Open,
    MediaLoaded,
    MediaPrepared,
    ReadingToc,
    WritingToc,
    ReadingContent,
    WritingContent,
}

impl ManagerState {
    pub fn name(self) -> &'static str {
        match self {
            ManagerState::NotInitialized => "not-initialized",
            ManagerState::Open => "open",
            ManagerState::MediaLoaded => "media-loaded",
            ManagerState::MediaPrepared => "media-prepared",
            ManagerState::ReadingToc => "reading-toc",
            ManagerState::WritingToc => "writing-toc",
            ManagerState::ReadingContent => "reading-content",
            ManagerState::WritingContent => "writing-content",
        }
    }

    fn is_reading(self) -> bool {
        matches!(self, ManagerState::ReadingToc | ManagerState::ReadingContent)
    }

    fn is_writing(self) -> bool {
        matches!(self, ManagerState::WritingToc | ManagerState::WritingContent)
    }
}

/// The full set of legal state changes. Writes must return to
/// media-prepared before anything else; reads may cross directly into
/// another read/write phase.
pub const ALLOWED_TRANSITIONS: &[(ManagerState, ManagerState)] = {
    use ManagerState::*;
    &[
        (NotInitialized, Open),
        (Open, MediaLoaded),
        (MediaLoaded, Open),
        (MediaLoaded, MediaPrepared),
        (MediaPrepared, MediaLoaded),
        (MediaPrepared, ReadingToc),
        (MediaPrepared, WritingToc),
        (MediaPrepared, ReadingContent),
        (MediaPrepared, WritingContent),
        (ReadingToc, MediaPrepared),
        (WritingToc, MediaPrepared),
        (ReadingContent, MediaPrepared),
        (WritingContent, MediaPrepared),
        (ReadingToc, WritingToc),
        (ReadingToc, ReadingContent),
        (ReadingToc, WritingContent),
        (ReadingContent, ReadingToc),
        (ReadingContent, WritingToc),
        (ReadingContent, WritingContent),
    ]
};

pub struct StreamManager {
    pub(super) drive: TapeDrive,
    navigator: Option<Box<dyn TapeNavigator>>,
    state: ManagerState,
    bytes_in_phase: u64,
    content_block_size: u32,
    filemarks_between_files: bool,
    use_toc_mark: bool,
    /// Caller-imposed reduction of the usable content capacity.
    capacity_cap: u64,
}

impl StreamManager {
    /// Takes over an opened drive.
    pub fn new(drive: TapeDrive) -> Self {
        Self {
            drive,
            navigator: None,
            state: ManagerState::Open,
            bytes_in_phase: 0,
            content_block_size: DEFAULT_CONTENT_BLOCK_SIZE,
            filemarks_between_files: false,
            use_toc_mark: false,
            capacity_cap: 0,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn drive(&self) -> &TapeDrive {
        &self.drive
    }

    pub fn drive_mut(&mut self) -> &mut TapeDrive {
        &mut self.drive
    }

    /// Opt into the catalog locator mark on drives that can search
    /// sequential filemarks. Takes effect at the next media load.
    pub fn set_use_toc_mark(&mut self, on: bool) {
        self.use_toc_mark = on;
    }

    /// Keep this many bytes of content capacity in reserve.
    pub fn set_capacity_cap(&mut self, cap: u64) {
        self.capacity_cap = cap;
    }

    pub fn cursor(&self) -> SetCursor {
        self.navigator
            .as_deref()
            .map(|navigator| navigator.cursor())
            .unwrap_or(SetCursor::Unknown)
    }

    pub fn uses_filemark_separators(&self) -> bool {
        self.navigator
            .as_deref()
            .map(|navigator| navigator.uses_filemark_separators())
            .unwrap_or(false)
    }

    /// Per-set filemark counts for the navigator (needed before
    /// addressing sets on filemark-separated layouts).
    pub fn set_navigator_layout(&mut self, marks_per_set: &[u32]) {
        if let Some(navigator) = self.navigator.as_deref_mut() {
            navigator.set_layout(marks_per_set);
        }
    }

    /// Drop the tracked set position after raw drive moves left the
    /// head somewhere the navigator cannot account for.
    pub fn invalidate_position(&mut self) {
        if let Some(navigator) = self.navigator.as_deref_mut() {
            navigator.forget_position();
        }
    }

    pub fn bytes_in_phase(&self) -> u64 {
        self.bytes_in_phase
    }

    fn check_transition(
        &self,
        to: ManagerState,
        operation: &'static str,
    ) -> Result<(), TapeError> {
        if ALLOWED_TRANSITIONS.contains(&(self.state, to)) {
            Ok(())
        } else {
            Err(TapeError::InvalidState {
                state: self.state.name(),
                operation,
            })
        }
    }

    fn commit(&mut self, to: ManagerState) {
        log::debug!("stream manager: {} -> {}", self.state.name(), to.name());
        self.state = to;
        self.bytes_in_phase = 0;
    }

    /// Load media and rebuild the navigator; capabilities can differ
    /// per cartridge.
    pub fn load_media(&mut self) -> Result<(), TapeError> {
        self.check_transition(ManagerState::MediaLoaded, "load media")?;
        self.drive.load_media()?;
        self.navigator = Some(navigator_for_drive(&self.drive, self.use_toc_mark));
        self.commit(ManagerState::MediaLoaded);
        Ok(())
    }

    pub fn unload_media(&mut self) -> Result<(), TapeError> {
        self.check_transition(ManagerState::Open, "unload media")?;
        self.drive.unload_media()?;
        self.navigator = None;
        self.commit(ManagerState::Open);
        Ok(())
    }

    pub fn prepare_media(&mut self) -> Result<(), TapeError> {
        self.check_transition(ManagerState::MediaPrepared, "prepare media")?;
        self.commit(ManagerState::MediaPrepared);
        Ok(())
    }

    pub fn release_media(&mut self) -> Result<(), TapeError> {
        self.end_current_phase()?;
        self.check_transition(ManagerState::MediaLoaded, "release media")?;
        self.commit(ManagerState::MediaLoaded);
        Ok(())
    }

    /// Format the loaded media; a positive `initiator_size` reserves a
    /// dedicated catalog partition when the drive can create one.
    pub fn format_media(&mut self, initiator_size: u64) -> Result<(), TapeError> {
        if !matches!(
            self.state,
            ManagerState::MediaLoaded | ManagerState::MediaPrepared
        ) {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "format media",
            });
        }
        self.drive.format_media(initiator_size)?;
        // partition layout may have changed
        self.navigator = Some(navigator_for_drive(&self.drive, self.use_toc_mark));
        Ok(())
    }

    /// Close a running read/write phase, including the set separator
    /// for content writes.
    fn end_current_phase(&mut self) -> Result<(), TapeError> {
        match self.state {
            ManagerState::WritingContent => {
                self.end_write_content_set()?;
                self.commit(ManagerState::MediaPrepared);
            }
            ManagerState::WritingToc => {
                let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
                navigator.on_toc_written(&mut self.drive)?;
                self.commit(ManagerState::MediaPrepared);
            }
            state if state.is_reading() => {
                self.commit(ManagerState::MediaPrepared);
            }
            _ => {}
        }
        Ok(())
    }

    /// Public phase exit; from a non-phase state this is a no-op.
    pub fn end_phase(&mut self) -> Result<(), TapeError> {
        self.end_current_phase()
    }

    /// Shared prologue of all `begin_*` operations: write phases are
    /// silently closed first (reads may transition directly), then
    /// the target transition is validated before the head moves.
    fn begin_phase(
        &mut self,
        to: ManagerState,
        operation: &'static str,
    ) -> Result<(), TapeError> {
        if self.state.is_writing() {
            self.end_current_phase()?;
        }
        self.check_transition(to, operation)
    }

    pub fn begin_read_toc(&mut self) -> Result<(), TapeError> {
        if self.state == ManagerState::ReadingToc {
            return Ok(());
        }
        self.begin_phase(ManagerState::ReadingToc, "begin reading toc")?;
        self.drive.set_block_size(TOC_BLOCK_SIZE)?;
        let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
        navigator.move_to_begin_of_toc(&mut self.drive)?;
        self.commit(ManagerState::ReadingToc);
        Ok(())
    }

    pub fn begin_write_toc(&mut self) -> Result<(), TapeError> {
        if self.state == ManagerState::WritingToc {
            return Ok(());
        }
        self.begin_phase(ManagerState::WritingToc, "begin writing toc")?;
        self.drive.set_block_size(TOC_BLOCK_SIZE)?;
        let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
        navigator.move_to_write_toc_position(&mut self.drive)?;
        navigator.on_begin_write_toc(&mut self.drive)?;
        self.commit(ManagerState::WritingToc);
        Ok(())
    }

    pub fn begin_read_content(&mut self) -> Result<(), TapeError> {
        if self.state == ManagerState::ReadingContent {
            return Ok(());
        }
        self.begin_phase(ManagerState::ReadingContent, "begin reading content")?;
        self.drive.set_block_size(self.content_block_size)?;
        let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
        navigator.move_to_begin_of_content(&mut self.drive)?;
        self.commit(ManagerState::ReadingContent);
        Ok(())
    }

    pub fn begin_write_content(&mut self) -> Result<(), TapeError> {
        if self.state == ManagerState::WritingContent {
            return Ok(());
        }
        self.begin_phase(ManagerState::WritingContent, "begin writing content")?;
        self.drive.set_block_size(self.content_block_size)?;
        let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
        navigator.move_to_end_of_content(&mut self.drive)?;
        navigator.on_begin_write_content(&mut self.drive)?;
        self.commit(ManagerState::WritingContent);
        Ok(())
    }

    /// All files written since `begin_write_content` form one set;
    /// this closes it with the set separator and leaves the cursor at
    /// the end of content.
    pub fn end_write_content_set(&mut self) -> Result<(), TapeError> {
        if self.state != ManagerState::WritingContent {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "end content set",
            });
        }
        let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
        navigator.write_set_separator(&mut self.drive)?;
        navigator.on_content_written(&mut self.drive)?;
        Ok(())
    }

    /// Move past one set separator between reads.
    pub fn end_read_content_set(&mut self) -> Result<(), TapeError> {
        if self.state != ManagerState::ReadingContent {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "end content set",
            });
        }
        let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
        navigator.skip_set_separator(&mut self.drive)
    }

    /// Position at the start of a content set.
    pub fn move_to_content_set(&mut self, target: i32) -> Result<(), TapeError> {
        if !matches!(
            self.state,
            ManagerState::ReadingContent | ManagerState::MediaPrepared
        ) {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "move to content set",
            });
        }
        let navigator = self.navigator.as_deref_mut().ok_or(TapeError::NoMedia)?;
        navigator.move_to_set(&mut self.drive, target)
    }

    /// Fix block size and file separator mode for the content phase.
    /// Returns what was actually applied (the drive clamps the block
    /// size).
    pub fn set_content_mode(
        &mut self,
        block_size: u32,
        filemarks_between_files: bool,
    ) -> Result<(u32, bool), TapeError> {
        let actual = self.drive.set_block_size(block_size)?;
        self.content_block_size = actual;
        self.filemarks_between_files = filemarks_between_files;
        Ok((actual, filemarks_between_files))
    }

    pub fn content_block_size(&self) -> u32 {
        self.content_block_size
    }

    pub fn filemarks_between_files(&self) -> bool {
        self.filemarks_between_files
    }

    /// Content capacity still usable, after the layout reserve and
    /// the caller's cap.
    pub fn remaining_content_capacity(&mut self) -> Result<Option<u64>, TapeError> {
        let cap = self.capacity_cap;
        let navigator = self
            .navigator
            .as_deref()
            .ok_or(TapeError::NoMedia)?;
        Ok(navigator
            .remaining_capacity(&mut self.drive)?
            .map(|remaining| remaining.saturating_sub(cap)))
    }

    /// Guard for the next content file: a known length that cannot
    /// fit anymore reports end-of-media up front, which is what
    /// triggers the multi-volume continuation.
    pub fn begin_write_file(&mut self, length: Option<u64>) -> Result<(), TapeError> {
        if self.state != ManagerState::WritingContent {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "begin file",
            });
        }
        if let Some(length) = length {
            if let Some(remaining) = self.remaining_content_capacity()? {
                if length > remaining {
                    return Err(TapeError::EndOfMedia);
                }
            }
        }
        Ok(())
    }

    pub fn produce_write_toc_stream(&mut self) -> Result<TapeWriteStream<'_>, TapeError> {
        if self.state != ManagerState::WritingToc {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "produce toc write stream",
            });
        }
        Ok(TapeWriteStream::new(self))
    }

    pub fn produce_write_content_stream(
        &mut self,
        length: Option<u64>,
    ) -> Result<TapeWriteStream<'_>, TapeError> {
        self.begin_write_file(length)?;
        Ok(TapeWriteStream::new(self))
    }

    pub fn produce_read_toc_stream(
        &mut self,
        text_mode: bool,
        length_limit: Option<u64>,
    ) -> Result<TapeReadStream<'_>, TapeError> {
        if self.state != ManagerState::ReadingToc {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "produce toc read stream",
            });
        }
        Ok(TapeReadStream::new(self, text_mode, length_limit))
    }

    pub fn produce_read_content_stream(
        &mut self,
        text_mode: bool,
        length_limit: Option<u64>,
    ) -> Result<TapeReadStream<'_>, TapeError> {
        if self.state != ManagerState::ReadingContent {
            return Err(TapeError::InvalidState {
                state: self.state.name(),
                operation: "produce content read stream",
            });
        }
        Ok(TapeReadStream::new(self, text_mode, length_limit))
    }

    /// Called by a closing write stream: account the bytes and write
    /// the file's trailing filemark where the mode asks for one.
    pub(super) fn write_stream_closed(&mut self, accepted: u64) -> Result<(), TapeError> {
        self.bytes_in_phase += accepted;
        let trailing_filemark = match self.state {
            ManagerState::WritingToc => true,
            ManagerState::WritingContent => self.filemarks_between_files,
            _ => false,
        };
        if trailing_filemark {
            self.drive.write_filemark(1)?;
        }
        Ok(())
    }

    pub(super) fn read_stream_closed(&mut self, delivered: u64, _hit_tapemark: bool) {
        self.bytes_in_phase += delivered;
    }
}
