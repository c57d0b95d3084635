//! Bounded byte streams over the drive, issued by the stream manager.
//!
//! A stream covers exactly one file on tape. Write streams assemble
//! caller data into whole blocks (zero-padding the final one), read
//! streams deliver payload bytes until the filemark, an optional
//! length limit, or (in text mode) the first NUL.

use std::io::{self, Read, Write};

use tapevault_tape::{StreamBuffer, TapeError};

use super::stream_manager::StreamManager;

/// Write side. Dropping the stream flushes and hands control back to
/// the manager, which closes the file with a trailing filemark where
/// the mode asks for one; use [`finish`](Self::finish) to see the
/// errors.
pub struct TapeWriteStream<'a> {
    manager: &'a mut StreamManager,
    buffer: StreamBuffer,
    accepted: u64,
    closed: bool,
}

impl<'a> TapeWriteStream<'a> {
    pub(super) fn new(manager: &'a mut StreamManager) -> Self {
        let capacity = 2 * manager.drive().block_size() as usize;
        Self {
            manager,
            buffer: StreamBuffer::with_capacity(capacity),
            accepted: 0,
            closed: false,
        }
    }

    /// Bytes accepted from the caller; padding never counts.
    pub fn bytes_accepted(&self) -> u64 {
        self.accepted
    }

    fn block_size(&self) -> usize {
        self.manager.drive().block_size() as usize
    }

    /// Write whole blocks straight to the drive. Anything the drive
    /// did not take means the media ran out.
    fn write_direct(&mut self, data: &[u8]) -> io::Result<()> {
        let io = self
            .manager
            .drive_mut()
            .write_block(data)
            .map_err(io::Error::from)?;
        if io.transferred < data.len() {
            return Err(TapeError::EndOfMedia.into());
        }
        Ok(())
    }

    fn flush_whole_blocks(&mut self) -> io::Result<()> {
        let whole = self.buffer.len() / self.block_size() * self.block_size();
        if whole == 0 {
            return Ok(());
        }
        let manager = &mut *self.manager;
        self.buffer.spill_to::<io::Error>(whole, |data| {
            let io = manager.drive_mut().write_block(data).map_err(io::Error::from)?;
            if io.transferred < data.len() {
                return Err(TapeError::EndOfMedia.into());
            }
            Ok(data.len())
        })?;
        Ok(())
    }

    fn flush_all(&mut self) -> io::Result<()> {
        self.flush_whole_blocks()?;
        if !self.buffer.is_empty() {
            self.buffer.zero_pad_to(self.block_size());
            self.flush_whole_blocks()?;
        }
        Ok(())
    }

    /// Flush (padding the trailing partial block) and close the file.
    /// Returns the accepted byte count.
    pub fn finish(mut self) -> Result<u64, TapeError> {
        self.flush_all().map_err(into_tape_error)?;
        self.closed = true;
        self.manager.write_stream_closed(self.accepted)?;
        Ok(self.accepted)
    }
}

impl Write for TapeWriteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut chunk = buf;
        while !chunk.is_empty() {
            if self.buffer.is_empty() && chunk.len() >= self.buffer.capacity() {
                // bypass: the data already spans whole blocks
                let whole = chunk.len() / self.block_size() * self.block_size();
                self.write_direct(&chunk[..whole])?;
                chunk = &chunk[whole..];
                continue;
            }
            let copied = self.buffer.push(chunk);
            chunk = &chunk[copied..];
            if self.buffer.free() == 0 {
                self.flush_whole_blocks()?;
            }
        }
        self.accepted += buf.len() as u64;
        Ok(buf.len())
    }

    /// Commits everything, zero-padding a trailing partial block to a
    /// whole one. The accepted-byte accumulator is not touched.
    fn flush(&mut self) -> io::Result<()> {
        self.flush_all()
    }
}

impl Drop for TapeWriteStream<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.flush_all();
            let _ = self.manager.write_stream_closed(self.accepted);
        }
    }
}

/// Read side.
pub struct TapeReadStream<'a> {
    manager: &'a mut StreamManager,
    buffer: StreamBuffer,
    delivered: u64,
    length_limit: Option<u64>,
    text_mode: bool,
    eof: bool,
    tapemark_seen: bool,
    closed: bool,
}

impl<'a> std::fmt::Debug for TapeReadStream<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeReadStream")
            .field("delivered", &self.delivered)
            .field("length_limit", &self.length_limit)
            .field("text_mode", &self.text_mode)
            .field("eof", &self.eof)
            .field("tapemark_seen", &self.tapemark_seen)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<'a> TapeReadStream<'a> {
    pub(super) fn new(
        manager: &'a mut StreamManager,
        text_mode: bool,
        length_limit: Option<u64>,
    ) -> Self {
        // with filemark-separated sets reads run into marks all the
        // time; a larger buffer amortizes the detection
        let blocks = if manager.uses_filemark_separators() { 4 } else { 1 };
        let capacity = blocks * manager.drive().block_size() as usize;
        Self {
            manager,
            buffer: StreamBuffer::with_capacity(capacity),
            delivered: 0,
            length_limit,
            text_mode,
            eof: false,
            tapemark_seen: false,
            closed: false,
        }
    }

    /// Bytes delivered so far.
    pub fn bytes_delivered(&self) -> u64 {
        self.delivered
    }

    /// The stream length, known once a limit is set.
    pub fn length(&self) -> Option<u64> {
        self.length_limit
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// True when the end came from an in-band mark rather than the
    /// length limit.
    pub fn hit_tapemark(&self) -> bool {
        self.tapemark_seen
    }

    /// Bound the stream. The limit can only grow, and never below
    /// what was already delivered.
    pub fn set_length_limit(&mut self, limit: u64) -> Result<(), TapeError> {
        if limit < self.delivered {
            return Err(TapeError::invalid_data(
                "length limit below the delivered byte count",
            ));
        }
        if let Some(current) = self.length_limit {
            if limit < current {
                return Err(TapeError::invalid_data("length limit can only be raised"));
            }
        }
        self.length_limit = Some(limit);
        Ok(())
    }

    fn note_io(&mut self, tapemark: bool, eof: bool, transferred: usize) {
        if tapemark {
            self.tapemark_seen = true;
        }
        if eof || transferred == 0 {
            self.eof = true;
        }
    }

    /// Close the stream explicitly.
    pub fn finish(mut self) -> Result<u64, TapeError> {
        self.closed = true;
        self.manager
            .read_stream_closed(self.delivered, self.tapemark_seen);
        Ok(self.delivered)
    }
}

impl Read for TapeReadStream<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let allowance = match self.length_limit {
            Some(limit) => limit.saturating_sub(self.delivered),
            None => u64::MAX,
        };
        let want = (dst.len() as u64).min(allowance) as usize;
        if want == 0 {
            return Ok(0);
        }

        let mut count;
        if !self.buffer.is_empty() {
            // buffered bytes are delivered even past an eof condition
            count = self.buffer.pop(&mut dst[..want.min(self.buffer.len())]);
        } else {
            if self.eof {
                return Ok(0);
            }
            if want >= self.buffer.capacity() {
                // direct into the caller's buffer, whole blocks
                let block_size = self.manager.drive().block_size() as usize;
                let whole = want / block_size * block_size;
                let io = self
                    .manager
                    .drive_mut()
                    .read_block(&mut dst[..whole])
                    .map_err(io::Error::from)?;
                self.note_io(io.tapemark, io.eof, io.transferred);
                count = io.transferred;
            } else {
                // refill exactly one block: reading further ahead
                // could cross into the next file or a separator mark
                let manager = &mut *self.manager;
                let mut marks = (false, false);
                let block_size = manager.drive().block_size() as usize;
                self.buffer.fill_from(block_size, |block| {
                    let io = manager
                        .drive_mut()
                        .read_block(block)
                        .map_err(io::Error::from)?;
                    marks = (io.tapemark, io.eof);
                    Ok::<_, io::Error>(io.transferred)
                })?;
                let filled = self.buffer.len();
                self.note_io(marks.0, marks.1, filled);
                count = self.buffer.pop(&mut dst[..want]);
            }
        }

        if self.text_mode && count > 0 {
            // NUL ends a text file; everything behind it is padding
            if let Some(position) = dst[..count].iter().position(|byte| *byte == 0) {
                count = position;
                self.eof = true;
                self.buffer.reset();
            }
        }

        self.delivered += count as u64;
        Ok(count)
    }
}

impl Drop for TapeReadStream<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.manager
                .read_stream_closed(self.delivered, self.tapemark_seen);
        }
    }
}

fn into_tape_error(err: io::Error) -> TapeError {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TapeError>())
    {
        Some(TapeError::EndOfMedia) => TapeError::EndOfMedia,
        _ => TapeError::Io(err),
    }
}
