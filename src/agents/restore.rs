//! The reading agents: restore, validate and verify share one
//! per-file protocol and only differ in where the payload bytes go.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{format_err, Error};
use tapevault_tape::TapeError;

use crate::catalog::{select_files, FileInfo, FilePatternSet, SetSelection, SetToc, Toc};
use crate::hash::HashingReader;

use super::{register_failure, BackupNotify, BatchStats, TapeSession};

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// `None` selects all files, an empty list none.
    pub patterns: Option<Vec<String>>,
    pub incremental: bool,
    /// Restore destination; `None` restores to the recorded paths.
    pub target_dir: Option<PathBuf>,
    pub ignore_failures: bool,
}

impl Default for RestoreRequest {
    fn default() -> Self {
        Self {
            patterns: None,
            incremental: false,
            target_dir: None,
            ignore_failures: true,
        }
    }
}

/// How a read pass consumes the payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// Write them into a freshly created local file
    Restore,
    /// Discard them, the digest check is the point
    Validate,
    /// Compare them against the local file of the same path
    Verify,
}

/// Continuation state when part of the selection lives on another
/// volume of the chain.
#[derive(Debug)]
pub struct RestoreContext {
    request: RestoreRequest,
    mode: ReadMode,
    /// Oldest-first work list.
    selections: Vec<SetSelection>,
    next_selection: usize,
    stats: BatchStats,
    expected_volume: u32,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Complete(BatchStats),
    /// Mount the given volume and resume.
    NeedVolume(RestoreContext),
}

impl RestoreContext {
    pub fn expected_volume(&self) -> u32 {
        self.expected_volume
    }
}

impl TapeSession {
    pub fn restore(
        &mut self,
        request: RestoreRequest,
        notify: &mut dyn BackupNotify,
    ) -> Result<RestoreOutcome, Error> {
        self.run_read_pass(request, ReadMode::Restore, notify)
    }

    /// Hash-check every selected file without touching the
    /// filesystem.
    pub fn validate(
        &mut self,
        request: RestoreRequest,
        notify: &mut dyn BackupNotify,
    ) -> Result<RestoreOutcome, Error> {
        self.run_read_pass(request, ReadMode::Validate, notify)
    }

    /// Compare every selected file byte for byte against its local
    /// counterpart.
    pub fn verify(
        &mut self,
        request: RestoreRequest,
        notify: &mut dyn BackupNotify,
    ) -> Result<RestoreOutcome, Error> {
        self.run_read_pass(request, ReadMode::Verify, notify)
    }

    /// Resume a read pass after the requested volume was mounted. The
    /// chain catalog stays in memory (only the original catalog
    /// spans all volumes), but the mounted medium must prove it
    /// belongs to the chain.
    pub fn resume_restore(
        &mut self,
        context: RestoreContext,
        notify: &mut dyn BackupNotify,
    ) -> Result<RestoreOutcome, Error> {
        self.mount_next_volume()?;

        let mounted = self
            .read_toc_from_media()
            .map_err(|err| format_err!("catalog of next volume unreadable - {err}"))?
            .ok_or_else(|| format_err!("mounted media carries no catalog"))?;
        self.manager.end_phase()?;

        let wanted_set = context.selections[context.next_selection].set_pos;
        if mounted.volume() != context.expected_volume || mounted.set_count() <= wanted_set {
            return Err(format_err!(
                "wrong volume: expected volume {} containing set {}, found volume {} with {} sets",
                context.expected_volume,
                wanted_set + 1,
                mounted.volume(),
                mounted.set_count()
            ));
        }
        // the chain catalog stays; track which medium sits in the
        // drive through its volume field
        self.toc.set_volume(mounted.volume());

        self.process_selections(context, notify)
    }

    fn run_read_pass(
        &mut self,
        request: RestoreRequest,
        mode: ReadMode,
        notify: &mut dyn BackupNotify,
    ) -> Result<RestoreOutcome, Error> {
        self.load()?;

        let patterns = FilePatternSet::parse(request.patterns.as_deref())
            .map_err(|err| format_err!("bad file patterns - {err}"))?;
        // selections come newest first; tape reads happen oldest
        // first to keep the medium moving forward
        let selections: Vec<SetSelection> = select_files(&self.toc, &patterns, request.incremental)
            .into_iter()
            .rev()
            .filter(|selection| !selection.file_indices.is_empty())
            .collect();

        let total: usize = selections
            .iter()
            .map(|selection| selection.file_indices.len())
            .sum();
        notify.on_batch_start(total);

        let context = RestoreContext {
            request,
            mode,
            selections,
            next_selection: 0,
            stats: BatchStats::default(),
            expected_volume: 0,
        };
        self.process_selections(context, notify)
    }

    fn process_selections(
        &mut self,
        mut context: RestoreContext,
        notify: &mut dyn BackupNotify,
    ) -> Result<RestoreOutcome, Error> {
        while context.next_selection < context.selections.len() {
            let selection = context.selections[context.next_selection].clone();
            let set = self
                .toc
                .set_at(selection.set_pos)
                .ok_or_else(|| format_err!("catalog lost set {}", selection.set_pos + 1))?
                .clone();

            if set.volume() != self.toc.volume() {
                // lives on another medium of the chain
                context.expected_volume = set.volume();
                log::info!(
                    "set {} is on volume {}, waiting for media change",
                    selection.set_pos + 1,
                    set.volume()
                );
                self.manager.end_phase()?;
                notify.on_need_volume(set.volume());
                return Ok(RestoreOutcome::NeedVolume(context));
            }

            let has_next_on_volume = context
                .selections
                .get(context.next_selection + 1)
                .and_then(|next| self.toc.set_at(next.set_pos))
                .map(|next_set| next_set.volume() == self.toc.volume())
                .unwrap_or(false);

            self.read_one_set(&set, &selection, has_next_on_volume, &mut context, notify)?;
            context.next_selection += 1;
        }

        self.manager.end_phase()?;
        notify.on_batch_done(&context.stats);
        Ok(RestoreOutcome::Complete(context.stats))
    }

    fn read_one_set(
        &mut self,
        set: &SetToc,
        selection: &SetSelection,
        has_next_on_volume: bool,
        context: &mut RestoreContext,
        notify: &mut dyn BackupNotify,
    ) -> Result<(), Error> {
        self.manager
            .set_content_mode(set.block_size(), set.filemarks_between_files())?;
        self.manager.begin_read_content()?;
        if self.manager.uses_filemark_separators() {
            let layout = navigator_layout(&self.toc);
            self.manager.set_navigator_layout(&layout);
        }

        // translate the chain-global set position into the physical
        // one on the mounted volume (earlier volumes hold the earlier
        // sets)
        let volume_origin = self
            .toc
            .sets()
            .iter()
            .position(|candidate| candidate.volume() == set.volume())
            .unwrap_or(0);
        let physical_set = (selection.set_pos - volume_origin) as i32;
        self.manager.move_to_content_set(physical_set)?;

        // index of the file whose payload was consumed completely,
        // which makes the immediate successor reachable without a
        // positioning call, and the running mark count within the set
        let mut consumed: Option<usize> = None;
        let mut crossed_in_set: i32 = 0;

        for &file_index in &selection.file_indices {
            let info = set
                .file(file_index)
                .ok_or_else(|| format_err!("catalog lost file {}", file_index))?;

            if let Err(err) = self.position_at_file(
                set,
                physical_set,
                consumed,
                &mut crossed_in_set,
                file_index,
                info,
            ) {
                register_failure(
                    &mut context.stats,
                    notify,
                    file_index,
                    info.path(),
                    err,
                    context.request.ignore_failures,
                )?;
                self.recover_set_position(physical_set, &mut consumed, &mut crossed_in_set)?;
                continue;
            }

            match self.read_one_file(set, info, context.mode, context.request.target_dir.as_deref())
            {
                Ok(bytes) => {
                    context.stats.processed += 1;
                    context.stats.bytes += bytes;
                    notify.on_file_done(file_index, info);
                    consumed = Some(file_index);
                }
                Err(err) => {
                    register_failure(
                        &mut context.stats,
                        notify,
                        file_index,
                        info.path(),
                        err,
                        context.request.ignore_failures,
                    )?;
                    // position within the file is undefined now
                    self.recover_set_position(physical_set, &mut consumed, &mut crossed_in_set)?;
                }
            }
        }

        // leave the head at the start of the next set so the cursor
        // stays truthful for the following move
        if has_next_on_volume && self.manager.uses_filemark_separators() {
            let total_marks = if set.filemarks_between_files() {
                set.file_count() as i32 + 1
            } else {
                1
            };
            let remaining = total_marks - crossed_in_set;
            if remaining > 1 {
                self.manager.drive_mut().move_next_filemark(remaining - 1)?;
            }
            self.manager.end_read_content_set()?;
        }
        Ok(())
    }

    /// After a mid-file failure the head is somewhere inside the set;
    /// replan from an absolute anchor and start the set over.
    fn recover_set_position(
        &mut self,
        physical_set: i32,
        consumed: &mut Option<usize>,
        crossed_in_set: &mut i32,
    ) -> Result<(), TapeError> {
        *consumed = None;
        *crossed_in_set = 0;
        self.manager.invalidate_position();
        self.manager.move_to_content_set(physical_set)
    }

    /// Bring the head to the start of a file's header block.
    fn position_at_file(
        &mut self,
        set: &SetToc,
        physical_set: i32,
        consumed: Option<usize>,
        crossed_in_set: &mut i32,
        file_index: usize,
        info: &FileInfo,
    ) -> Result<(), TapeError> {
        if set.filemarks_between_files() {
            // count the separators between here and the target
            let marks = match consumed {
                // at the start of the set, or back there after a
                // recovery
                None => file_index as i32 - *crossed_in_set,
                Some(previous) if previous < file_index => (file_index - previous) as i32,
                // going backwards needs a fresh run from the set start
                Some(_) => {
                    self.manager.invalidate_position();
                    self.manager.move_to_content_set(physical_set)?;
                    *crossed_in_set = 0;
                    file_index as i32
                }
            };
            if marks > 0 {
                self.manager.drive_mut().move_next_filemark(marks)?;
                *crossed_in_set += marks;
            }
            Ok(())
        } else {
            // blocks are contiguous; after a fully consumed file the
            // head already sits on the successor
            if let Some(previous) = consumed {
                if previous + 1 == file_index {
                    return Ok(());
                }
            }
            self.manager.drive_mut().move_to_block(info.block)
        }
    }

    /// The shared per-file protocol: header, length-bounded payload
    /// through the hasher into the mode's consumer, digest check,
    /// attribute fixup.
    fn read_one_file(
        &mut self,
        set: &SetToc,
        info: &FileInfo,
        mode: ReadMode,
        target_dir: Option<&Path>,
    ) -> Result<u64, TapeError> {
        let algorithm = set.hash_algorithm();
        let length = info.descriptor.length;

        let mut stream = self.manager.produce_read_content_stream(false, None)?;
        let id = Self::decode_file_header(&mut stream)?;
        if id != info.id {
            return Err(TapeError::invalid_data(format!(
                "file id mismatch: catalog has {}, tape has {id}",
                info.id
            )));
        }
        stream.set_length_limit(super::FILE_HEADER_LEN as u64 + length)?;

        let mut reader = HashingReader::new(&mut stream, algorithm);
        let restore_path;
        match mode {
            ReadMode::Restore => {
                let path = match target_dir {
                    Some(dir) => dir.join(info.descriptor.file_name()),
                    None => PathBuf::from(info.path()),
                };
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = File::create(&path)?;
                io::copy(&mut reader, &mut file)?;
                restore_path = Some(path);
            }
            ReadMode::Validate => {
                io::copy(&mut reader, &mut io::sink())?;
                restore_path = None;
            }
            ReadMode::Verify => {
                let local = File::open(info.path()).map_err(|err| {
                    if err.kind() == io::ErrorKind::NotFound {
                        TapeError::NotFound(info.path().to_string())
                    } else {
                        TapeError::Io(err)
                    }
                })?;
                compare_streams(&mut reader, local, info.path())?;
                restore_path = None;
            }
        }

        let digest = reader.finalize();
        drop(stream);

        if !algorithm.is_none() {
            if info.hash.as_deref() != Some(digest.as_slice()) {
                return Err(TapeError::invalid_data(format!(
                    "digest mismatch for '{}'",
                    info.path()
                )));
            }
        }

        if let Some(path) = restore_path {
            info.descriptor.apply_to(&path)?;
        }
        Ok(length)
    }
}

/// Filemark counts per set as the navigator sees them on the mounted
/// volume: one separator, plus one mark per file when the set
/// separates files with marks.
pub(crate) fn navigator_layout(toc: &Toc) -> Vec<u32> {
    toc.sets()
        .iter()
        .filter(|set| set.volume() == toc.volume())
        .map(|set| {
            if set.filemarks_between_files() {
                set.file_count() as u32 + 1
            } else {
                1
            }
        })
        .collect()
}

/// Byte-for-byte comparison of the tape stream against a local file.
fn compare_streams<R: Read>(tape: &mut R, mut local: File, path: &str) -> Result<(), TapeError> {
    let mut tape_buf = vec![0u8; 64 * 1024];
    let mut local_buf = vec![0u8; 64 * 1024];
    loop {
        let from_tape = tape.read(&mut tape_buf)?;
        if from_tape == 0 {
            // local file must end here too
            return match local.read(&mut local_buf)? {
                0 => Ok(()),
                _ => Err(TapeError::invalid_data(format!(
                    "verify failed: '{path}' is longer on disk"
                ))),
            };
        }
        let mut have = 0;
        while have < from_tape {
            let count = local.read(&mut local_buf[have..from_tape])?;
            if count == 0 {
                return Err(TapeError::invalid_data(format!(
                    "verify failed: '{path}' is shorter on disk"
                )));
            }
            have += count;
        }
        if tape_buf[..from_tape] != local_buf[..from_tape] {
            return Err(TapeError::invalid_data(format!(
                "verify failed: '{path}' differs"
            )));
        }
    }
}
