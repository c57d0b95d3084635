//! The backup agent: write a set of files onto the current volume,
//! continuing onto further volumes when the media fills up.

use std::fs::File;
use std::io::Write as _;

use anyhow::{format_err, Error};
use tapevault_tape::TapeError;

use crate::catalog::{is_file_uptodate, FileDescriptor, FileInfo, SetToc};
use crate::hash::{HashAlgorithm, HashingReader};

use super::{register_failure, stream_error, BackupNotify, BatchStats, FileDisposition, TapeSession};

#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Absolute paths, already expanded by the caller.
    pub files: Vec<String>,
    pub description: String,
    pub hash_algorithm: HashAlgorithm,
    pub block_size: u32,
    pub filemarks_between_files: bool,
    pub incremental: bool,
    pub ignore_failures: bool,
    /// Content capacity to keep in reserve on every volume; the
    /// capacity guard reports end-of-media once free space falls to
    /// this headroom.
    pub capacity_cap: u64,
}

impl Default for BackupRequest {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            description: String::new(),
            hash_algorithm: HashAlgorithm::default(),
            block_size: crate::tape::DEFAULT_CONTENT_BLOCK_SIZE,
            filemarks_between_files: false,
            incremental: false,
            ignore_failures: true,
            capacity_cap: 0,
        }
    }
}

/// Continuation state captured when a volume fills up. Feed it back
/// through [`TapeSession::resume_backup`] once the next medium is
/// mounted.
#[derive(Debug)]
pub struct BackupContext {
    request: BackupRequest,
    /// The file that did not fit; it is retried first on the next
    /// volume.
    next_index: usize,
    stats: BatchStats,
}

#[derive(Debug)]
pub enum BackupOutcome {
    Complete(BatchStats),
    /// The catalog was appended to the full volume; mount the next
    /// medium and resume.
    VolumeFull(BackupContext),
}

impl TapeSession {
    /// Back up a batch of files as one new set.
    pub fn backup(
        &mut self,
        request: BackupRequest,
        notify: &mut dyn BackupNotify,
    ) -> Result<BackupOutcome, Error> {
        self.load()?;

        self.manager.set_capacity_cap(request.capacity_cap);
        let (block_size, filemarks) = self
            .manager
            .set_content_mode(request.block_size, request.filemarks_between_files)?;

        let mut set = SetToc::new(&request.description, request.hash_algorithm);
        set.set_write_mode(block_size, filemarks)?;
        if request.incremental {
            set.set_incremental(true)?;
        }
        self.toc
            .append_set(set)
            .map_err(|err| format_err!("cannot start set - {err}"))?;

        notify.on_batch_start(request.files.len());
        let context = BackupContext {
            request,
            next_index: 0,
            stats: BatchStats::default(),
        };
        self.run_backup_batch(context, notify)
    }

    /// Continue a batch on a freshly mounted volume. The catalog is
    /// carried over in memory: the volume number is bumped and the
    /// interrupted set continues in a new set marked as continued.
    pub fn resume_backup(
        &mut self,
        context: BackupContext,
        notify: &mut dyn BackupNotify,
    ) -> Result<BackupOutcome, Error> {
        self.mount_next_volume()?;
        self.toc
            .next_volume()
            .map_err(|err| format_err!("cannot continue set - {err}"))?;

        let request = &context.request;
        self.manager.set_capacity_cap(request.capacity_cap);
        let (block_size, filemarks) = self
            .manager
            .set_content_mode(request.block_size, request.filemarks_between_files)?;
        self.toc
            .current_set_mut()
            .ok_or_else(|| format_err!("catalog lost the continuation set"))?
            .set_write_mode(block_size, filemarks)?;

        log::info!(
            "resuming backup on volume {} at file {}",
            self.toc.volume(),
            context.next_index
        );
        self.run_backup_batch(context, notify)
    }

    fn run_backup_batch(
        &mut self,
        mut context: BackupContext,
        notify: &mut dyn BackupNotify,
    ) -> Result<BackupOutcome, Error> {
        self.manager.begin_write_content()?;
        // this volume is the end of the chain until proven otherwise
        self.toc.set_continued_on_next(false);

        let files = context.request.files.clone();
        let mut index = context.next_index;
        while index < files.len() {
            let source = &files[index];

            let mut descriptor = match FileDescriptor::from_path(source) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    let err = if err.kind() == std::io::ErrorKind::NotFound {
                        TapeError::NotFound(source.clone())
                    } else {
                        TapeError::Io(err)
                    };
                    register_failure(
                        &mut context.stats,
                        notify,
                        index,
                        source,
                        err,
                        context.request.ignore_failures,
                    )?;
                    index += 1;
                    continue;
                }
            };

            match notify.on_file_start(index, &descriptor) {
                FileDisposition::Process => {}
                FileDisposition::ProcessAs(path) => descriptor.path = path,
                FileDisposition::Skip => {
                    context.stats.skipped += 1;
                    notify.on_file_skipped(index, source);
                    index += 1;
                    continue;
                }
            }

            if context.request.incremental
                && is_file_uptodate(&self.toc, &descriptor.path, descriptor.modified)
            {
                context.stats.skipped += 1;
                index += 1;
                continue;
            }

            match self.backup_one_file(source, &descriptor) {
                Ok(info) => {
                    context.stats.processed += 1;
                    context.stats.bytes += info.descriptor.length;
                    notify.on_file_done(index, &info);
                    self.toc
                        .current_set_mut()
                        .ok_or_else(|| format_err!("catalog lost the current set"))?
                        .push_file(info)?;
                    index += 1;
                }
                Err(TapeError::EndOfMedia) => {
                    // keep the failed file first in line for the next
                    // volume
                    context.next_index = index;
                    self.toc.set_continued_on_next(true);
                    log::info!(
                        "volume {} full after {} files",
                        self.toc.volume(),
                        context.stats.processed
                    );
                    self.write_toc()?;
                    notify.on_volume_full(self.toc.volume());
                    return Ok(BackupOutcome::VolumeFull(context));
                }
                Err(err) => {
                    register_failure(
                        &mut context.stats,
                        notify,
                        index,
                        source,
                        err,
                        context.request.ignore_failures,
                    )?;
                    index += 1;
                }
            }
        }

        self.write_toc()?;
        notify.on_batch_done(&context.stats);
        Ok(BackupOutcome::Complete(context.stats))
    }

    /// One file: capacity guard, header, payload through the set's
    /// hasher, then the catalog entry.
    fn backup_one_file(
        &mut self,
        source: &str,
        descriptor: &FileDescriptor,
    ) -> Result<FileInfo, TapeError> {
        let algorithm = self
            .toc
            .current_set()
            .ok_or_else(|| TapeError::invalid_data("no current set"))?
            .hash_algorithm();

        let file = File::open(source).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                TapeError::NotFound(source.to_string())
            } else {
                TapeError::Io(err)
            }
        })?;

        let block = self.manager.drive_mut().current_block()?;
        let id = self.toc.allocate_id();
        let header = Self::encode_file_header(id);

        let mut stream = self
            .manager
            .produce_write_content_stream(Some(descriptor.length))?;
        stream.write_all(&header).map_err(stream_error)?;

        let mut reader = HashingReader::new(file, algorithm);
        std::io::copy(&mut reader, &mut stream).map_err(stream_error)?;
        stream.finish()?;

        let digest = reader.finalize();
        let hash = if algorithm.is_none() {
            None
        } else {
            log::debug!("'{}': {}", descriptor.path, hex::encode(&digest));
            Some(digest)
        };

        Ok(FileInfo {
            id,
            block,
            descriptor: descriptor.clone(),
            hash,
        })
    }
}
