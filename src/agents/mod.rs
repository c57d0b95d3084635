//! Backup, restore, validate and verify sessions over one drive.

mod backup;
pub use backup::*;

mod restore;
pub use restore::*;

use std::io::{Cursor, Read, Write};

use anyhow::{bail, format_err, Error};
use tapevault_tape::{TapeDrive, TapeError};

use crate::catalog::{FileDescriptor, FileInfo, Toc};
use crate::hash::{digest, TOC_HASH_ALGORITHM};
use crate::serialize::{ticks_now, RecordSignature, WireRecord};
use crate::tape::{ManagerState, StreamManager, TOC_COPIES};

/// Signature plus file id, written in front of every payload. The
/// header is not part of the payload digest.
pub const FILE_HEADER_LEN: usize = RecordSignature::SIZE + 8;

/// What to do with a file the batch is about to process.
pub enum FileDisposition {
    Process,
    /// Record the file under a different path
    ProcessAs(String),
    Skip,
}

/// Progress and decision hooks for batch operations. All methods have
/// no-op defaults.
pub trait BackupNotify {
    fn on_batch_start(&mut self, _total: usize) {}

    /// Called before a file is processed; may skip it or rewrite the
    /// path it is recorded under.
    fn on_file_start(&mut self, _index: usize, _descriptor: &FileDescriptor) -> FileDisposition {
        FileDisposition::Process
    }

    fn on_file_done(&mut self, _index: usize, _info: &FileInfo) {}
    fn on_file_skipped(&mut self, _index: usize, _path: &str) {}
    fn on_file_failed(&mut self, _index: usize, _path: &str, _error: &TapeError) {}
    fn on_batch_done(&mut self, _stats: &BatchStats) {}

    /// The current volume is full; the batch stops and waits for the
    /// next medium.
    fn on_volume_full(&mut self, _volume: u32) {}

    /// A read pass needs another volume of the chain mounted.
    fn on_need_volume(&mut self, _volume: u32) {}
}

/// No-op hook set.
pub struct NullNotify;

impl BackupNotify for NullNotify {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl BatchStats {
    /// Overall batch verdict.
    pub fn ok(&self) -> bool {
        self.failed == 0
    }
}

/// Map a stream error back to the tape domain, keeping end-of-media
/// recognizable for the continuation logic.
pub(crate) fn stream_error(err: std::io::Error) -> TapeError {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TapeError>())
    {
        Some(TapeError::EndOfMedia) => TapeError::EndOfMedia,
        _ => TapeError::Io(err),
    }
}

/// A backup session: the drive phase machine plus the in-memory
/// catalog, exposing the agent operations.
pub struct TapeSession {
    manager: StreamManager,
    toc: Toc,
}

impl TapeSession {
    pub fn new(drive: TapeDrive) -> Self {
        Self {
            manager: StreamManager::new(drive),
            toc: Toc::new(""),
        }
    }

    pub fn manager(&mut self) -> &mut StreamManager {
        &mut self.manager
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn toc_mut(&mut self) -> &mut Toc {
        &mut self.toc
    }

    pub fn set_use_toc_mark(&mut self, on: bool) {
        self.manager.set_use_toc_mark(on);
    }

    /// Prepare the mounted media and bring the on-tape catalog into
    /// memory; blank media start with an empty catalog.
    pub fn load(&mut self) -> Result<(), Error> {
        if self.manager.state() == ManagerState::Open {
            self.manager
                .load_media()
                .map_err(|err| format_err!("loading media failed - {err}"))?;
        }
        if self.manager.state() == ManagerState::MediaLoaded {
            self.manager.prepare_media()?;
            self.load_toc()
                .map_err(|err| format_err!("reading catalog failed - {err}"))?;
        }
        Ok(())
    }

    fn load_toc(&mut self) -> Result<(), TapeError> {
        match self.read_toc_from_media() {
            Ok(Some(toc)) => {
                log::info!(
                    "catalog loaded: volume {}, {} sets",
                    toc.volume(),
                    toc.set_count()
                );
                self.toc = toc;
            }
            Ok(None) => {
                log::info!("no catalog on media, starting empty");
                self.toc = Toc::new("");
            }
            Err(err) if err.is_eof_condition() => {
                log::info!("media looks blank ({err}), starting empty");
                self.toc = Toc::new("");
            }
            Err(err) => return Err(err),
        }
        self.manager.end_phase()?;
        Ok(())
    }

    /// Restore the catalog from tape. Both copies are tried; a copy
    /// counts only if the signature, the structure and the CRC-64
    /// trailer all check out. `Ok(None)` means the media carries no
    /// catalog at all.
    pub(crate) fn read_toc_from_media(&mut self) -> Result<Option<Toc>, TapeError> {
        self.manager.begin_read_toc()?;

        for attempt in 1..=TOC_COPIES {
            let mut stream = self.manager.produce_read_toc_stream(false, None)?;
            let mut bytes = Vec::new();
            let read = stream.read_to_end(&mut bytes);
            drop(stream);
            if let Err(err) = read {
                log::warn!("catalog copy {attempt} unreadable: {err}");
                continue;
            }
            if bytes.is_empty() {
                return Ok(None);
            }
            match parse_toc(&bytes) {
                Some(toc) => return Ok(Some(toc)),
                None => log::warn!("catalog copy {attempt} failed verification"),
            }
        }
        Err(TapeError::invalid_data("all catalog copies are corrupt"))
    }

    /// Append the catalog at the catalog position, twice back to
    /// back, each copy protected with a CRC-64 trailer.
    pub(crate) fn write_toc(&mut self) -> Result<(), TapeError> {
        self.toc.last_saved = ticks_now();

        let mut payload = Vec::new();
        self.toc.write_record(&mut payload)?;
        let trailer = digest(TOC_HASH_ALGORITHM, &payload);

        self.manager.begin_write_toc()?;
        for _ in 0..TOC_COPIES {
            let mut stream = self.manager.produce_write_toc_stream()?;
            stream.write_all(&payload).map_err(stream_error)?;
            stream.write_all(&trailer).map_err(stream_error)?;
            stream.finish()?;
        }
        self.manager.end_phase()?;
        log::info!(
            "catalog written: volume {}, {} sets, {} bytes",
            self.toc.volume(),
            self.toc.set_count(),
            payload.len()
        );
        Ok(())
    }

    /// Render the catalog as a listing.
    pub fn list(&self) -> String {
        self.toc.describe()
    }

    /// Partition and wipe the media; the in-memory catalog starts
    /// over.
    pub fn format(&mut self, initiator_size: u64) -> Result<(), Error> {
        if self.manager.state() == ManagerState::Open {
            self.manager.load_media()?;
        }
        self.manager.end_phase()?;
        if self.manager.state() == ManagerState::MediaPrepared {
            self.manager.release_media()?;
        }
        self.manager
            .format_media(initiator_size)
            .map_err(|err| format_err!("formatting failed - {err}"))?;
        self.toc = Toc::new("");
        Ok(())
    }

    /// Finish any running phase and eject the media.
    pub fn eject(&mut self) -> Result<(), Error> {
        match self.manager.state() {
            ManagerState::Open => return Ok(()),
            ManagerState::MediaLoaded => {}
            _ => {
                self.manager.end_phase()?;
                self.manager.release_media()?;
            }
        }
        self.manager
            .unload_media()
            .map_err(|err| format_err!("eject failed - {err}"))?;
        Ok(())
    }

    /// Volume swap helper used by the multi-volume paths: eject is
    /// assumed done, the new cartridge is loaded and prepared.
    pub(crate) fn mount_next_volume(&mut self) -> Result<(), TapeError> {
        if self.manager.state() == ManagerState::Open {
            self.manager.load_media()?;
        }
        if self.manager.state() == ManagerState::MediaLoaded {
            self.manager.prepare_media()?;
        }
        Ok(())
    }

    /// Write the file header (signature + id) into a buffer.
    pub(crate) fn encode_file_header(id: u64) -> Vec<u8> {
        use crate::serialize::WireWrite;
        let mut header = Vec::with_capacity(FILE_HEADER_LEN);
        header.write_signature().expect("vec write");
        header.write_le_u64(id).expect("vec write");
        header
    }

    /// Read and check a file header; returns the id.
    pub(crate) fn decode_file_header<R: Read>(reader: &mut R) -> Result<u64, TapeError> {
        use crate::serialize::WireRead;
        if !reader.read_signature().map_err(TapeError::Io)? {
            return Err(TapeError::invalid_data("bad file header signature"));
        }
        reader.read_le_u64().map_err(TapeError::Io)
    }
}

/// Parse one catalog copy: record, then the CRC-64 trailer over the
/// record bytes; everything behind it is block padding.
fn parse_toc(bytes: &[u8]) -> Option<Toc> {
    let mut cursor = Cursor::new(bytes);
    let toc = Toc::read_record(&mut cursor).ok()??;
    let consumed = cursor.position() as usize;

    let trailer_len = TOC_HASH_ALGORITHM.digest_len();
    if bytes.len() < consumed + trailer_len {
        return None;
    }
    let stored = &bytes[consumed..consumed + trailer_len];
    let computed = digest(TOC_HASH_ALGORITHM, &bytes[..consumed]);
    if stored != computed.as_slice() {
        return None;
    }
    Some(toc)
}

/// Shared failure handling for per-file errors in a batch: count it,
/// notify, and decide whether the batch goes on.
fn register_failure(
    stats: &mut BatchStats,
    notify: &mut dyn BackupNotify,
    index: usize,
    path: &str,
    err: TapeError,
    ignore_failures: bool,
) -> Result<(), Error> {
    stats.failed += 1;
    log::warn!("file '{path}' failed: {err}");
    notify.on_file_failed(index, path, &err);
    if ignore_failures {
        Ok(())
    } else {
        bail!("processing '{path}' failed - {err}");
    }
}
