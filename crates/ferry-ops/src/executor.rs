//! The transfer state machine.
//!
//! One [`Executor`] owns one operation from scan to terminal event. It runs
//! on a blocking thread; the engine talks to it only through the control
//! channel and listens through the event channel.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use ferry_core::{
    Cancel, ConflictPolicy, ConflictRecord, EngineConfig, InodeInfo, OperationId, Resolution, TransferError,
    TransferRequest, TransferRoute,
};
use ferry_scan::{PlannedDir, PlannedFile, ProgressThrottle, TransferPlan, WalkMode, WalkOutcome, Walker};

use crate::channel::EventChannel;
use crate::conflict::ConflictDetector;
use crate::copy::FileCopier;
use crate::events::{TransferEvent, TransferPhase};
use crate::journal::Journal;
use crate::rollback::RollbackManager;
use crate::space;
use crate::state::{StatusSnapshot, TransferState};
use crate::volume;

/// Commands delivered to a running executor.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Control {
    Resolve {
        resolution: Resolution,
        apply_to_all: bool,
    },
    Cancel(Cancel),
}

/// Why the executor stopped before completing.
#[derive(Debug)]
enum Stop {
    Failed(TransferError),
    Cancelled(Cancel),
}

impl From<TransferError> for Stop {
    fn from(error: TransferError) -> Self {
        Self::Failed(error)
    }
}

type Flow<T = ()> = std::result::Result<T, Stop>;

/// What an executor leaves behind.
#[derive(Debug)]
pub(crate) struct ExecutionReport {
    /// The single terminal event of the operation.
    pub terminal: TransferEvent,
    /// Created paths still on disk, if the operation may be rolled back
    /// explicitly later.
    pub journal: Option<Journal>,
}

pub(crate) struct Executor {
    request: TransferRequest,
    config: EngineConfig,
    plan: Option<TransferPlan>,
    channel: EventChannel<OperationId, TransferEvent>,
    status: Arc<DashMap<OperationId, StatusSnapshot>>,
    control: mpsc::UnboundedReceiver<Control>,
    handle: Handle,
    state: TransferState,
    journal: Journal,
    throttle: ProgressThrottle,
    copier: FileCopier,
    remembered: Option<Resolution>,
    /// Per top-level source: a rename may be attempted.
    rename_ok: Vec<bool>,
    /// Top-level sources moved whole by a single rename.
    renamed: HashSet<usize>,
    /// Destination directories the caller chose to skip.
    blocked: Vec<PathBuf>,
    /// Planned destination directories placed under another name, in the
    /// order they were created.
    redirects: Vec<(PathBuf, PathBuf)>,
    /// Sources copied by a move, deleted once everything is placed.
    copied_sources: Vec<PathBuf>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OperationId,
        request: TransferRequest,
        config: EngineConfig,
        plan: Option<TransferPlan>,
        channel: EventChannel<OperationId, TransferEvent>,
        status: Arc<DashMap<OperationId, StatusSnapshot>>,
        control: mpsc::UnboundedReceiver<Control>,
        handle: Handle,
    ) -> Self {
        let interval = request.options.progress_interval_ms(&config);
        let state = TransferState::new(id, request.kind);
        status.insert(id, state.snapshot());

        Self {
            copier: FileCopier::from_config(&config),
            throttle: ProgressThrottle::from_millis(interval),
            request,
            config,
            plan,
            channel,
            status,
            control,
            handle,
            state,
            journal: Journal::new(),
            remembered: None,
            rename_ok: Vec::new(),
            renamed: HashSet::new(),
            blocked: Vec::new(),
            redirects: Vec::new(),
            copied_sources: Vec::new(),
        }
    }

    /// Run to a terminal state. The terminal event is returned, not
    /// published, so the caller can release the operation first.
    pub fn run(mut self) -> ExecutionReport {
        let id = self.state.id;
        info!(
            operation_id = %id,
            kind = %self.request.kind,
            sources = self.request.sources.len(),
            destination = %self.request.destination.display(),
            "Transfer started"
        );

        let (terminal, journal) = match self.execute() {
            Ok(()) => {
                self.state.phase = TransferPhase::Completed;
                info!(
                    operation_id = %id,
                    files = self.state.files_done,
                    bytes = self.state.bytes_done,
                    skipped = self.state.files_skipped,
                    "Transfer complete"
                );
                let event = TransferEvent::Complete {
                    files_processed: self.state.files_done,
                    bytes_processed: self.state.bytes_done,
                    files_skipped: self.state.files_skipped,
                };
                (event, None)
            }
            Err(Stop::Failed(error)) => {
                self.state.phase = TransferPhase::Errored;
                warn!(operation_id = %id, kind = error.kind(), error = %error, "Transfer failed");
                let journal = std::mem::take(&mut self.journal);
                (TransferEvent::Error { error }, Some(journal))
            }
            Err(Stop::Cancelled(Cancel::Rollback)) => {
                self.state.phase = TransferPhase::Cancelled;
                let report = RollbackManager::rollback(self.journal.entries(), true);
                info!(
                    operation_id = %id,
                    rolled_back = report.files_rolled_back,
                    failed = report.failed,
                    "Transfer cancelled and rolled back"
                );
                let event = TransferEvent::Cancelled {
                    files_processed: self.state.files_done,
                    rolled_back: true,
                    files_rolled_back: report.files_rolled_back,
                };
                (event, None)
            }
            Err(Stop::Cancelled(Cancel::KeepPartial)) => {
                self.state.phase = TransferPhase::Cancelled;
                info!(operation_id = %id, files = self.state.files_done, "Transfer cancelled");
                let event = TransferEvent::Cancelled {
                    files_processed: self.state.files_done,
                    rolled_back: false,
                    files_rolled_back: 0,
                };
                (event, Some(std::mem::take(&mut self.journal)))
            }
        };

        ExecutionReport { terminal, journal }
    }

    fn execute(&mut self) -> Flow {
        let reused = self.plan.is_some();
        let plan = self.scan()?;
        self.state.files_total = plan.files_total();
        self.state.bytes_total = plan.bytes_total;
        if !reused {
            self.emit_progress(true);
        }

        self.advise_conflicts(&plan);

        self.rename_ok = self.rename_allowed(&plan);
        if self.config.check_disk_space {
            let required: u64 = plan
                .files
                .iter()
                .filter(|f| !self.rename_ok[f.source_index])
                .map(|f| f.size)
                .sum();
            space::ensure_space(&self.request.destination, required)?;
        }

        self.ensure_destination()?;
        self.state.phase = TransferPhase::Copying;
        self.emit_progress(true);

        if self.request.is_move() {
            self.rename_whole_sources(&plan)?;
        }
        for dir in &plan.dirs {
            if self.renamed.contains(&dir.source_index) {
                continue;
            }
            self.check_cancel()?;
            self.ensure_dir(dir)?;
        }
        for file in &plan.files {
            if self.renamed.contains(&file.source_index) {
                continue;
            }
            self.check_cancel()?;
            self.transfer_file(file)?;
        }

        if self.request.is_move() && self.renamed.len() < plan.sources.len() {
            self.delete_sources(&plan);
        }
        Ok(())
    }

    /// Take the reused preview plan or walk the sources.
    fn scan(&mut self) -> Flow<TransferPlan> {
        let id = self.state.id;
        let sort = self.request.options.sort;

        if let Some(mut plan) = self.plan.take() {
            if plan.sort != sort {
                plan.sort_by(sort);
            }
            debug!(operation_id = %id, files = plan.files.len(), "Reusing preview plan");
            return Ok(plan);
        }

        self.publish_status();
        let channel = &self.channel;
        let control = &mut self.control;
        let throttle = &mut self.throttle;
        let mut cancelled = None;

        let outcome = Walker::new(WalkMode::Strict).walk(&self.request.sources, sort, |progress| {
            match control.try_recv() {
                Ok(Control::Cancel(mode)) => {
                    cancelled = Some(mode);
                    return ControlFlow::Break(());
                }
                Ok(Control::Resolve { .. }) => {
                    warn!(operation_id = %id, "Ignoring resolution while scanning");
                }
                Err(_) => {}
            }
            if throttle.ready() {
                channel.publish(
                    id,
                    TransferEvent::Progress {
                        phase: TransferPhase::Scanning,
                        current_file: Some(progress.current_path.clone()),
                        files_done: 0,
                        files_total: 0,
                        bytes_done: 0,
                        bytes_total: 0,
                    },
                );
            }
            ControlFlow::Continue(())
        })?;

        match outcome {
            WalkOutcome::Completed(plan) => {
                info!(
                    operation_id = %id,
                    files = plan.files.len(),
                    bytes = plan.bytes_total,
                    "Transfer scan complete"
                );
                Ok(plan)
            }
            WalkOutcome::Cancelled(_) => Err(Stop::Cancelled(cancelled.unwrap_or(Cancel::KeepPartial))),
        }
    }

    fn advise_conflicts(&self, plan: &TransferPlan) {
        let cap = self.request.options.max_conflicts_to_show(&self.config);
        let preview = ConflictDetector::new(cap).preview(plan, &self.request.destination);
        if preview.total > 0 {
            debug!(operation_id = %self.state.id, total = preview.total, "Conflicts detected");
            self.channel.publish(
                self.state.id,
                TransferEvent::ConflictsDetected {
                    conflicts: preview.conflicts,
                    total: preview.total,
                },
            );
        }
    }

    /// Per source, whether a move may rename instead of copying.
    fn rename_allowed(&self, plan: &TransferPlan) -> Vec<bool> {
        let candidate =
            self.request.is_move() && self.request.route == TransferRoute::SameVolume;
        plan.sources
            .iter()
            .map(|source| candidate && volume::same_device(source, &self.request.destination))
            .collect()
    }

    fn ensure_destination(&mut self) -> Flow {
        let destination = self.request.destination.clone();
        let missing: Vec<PathBuf> = destination
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && std::fs::symlink_metadata(p).is_err())
            .map(Path::to_path_buf)
            .collect();

        for dir in missing.into_iter().rev() {
            match std::fs::create_dir(&dir) {
                Ok(()) => self.journal.record_dir(&dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(TransferError::io(&dir, e).into()),
            }
        }
        Ok(())
    }

    /// Move top-level sources whose destination name is free with one
    /// rename each.
    fn rename_whole_sources(&mut self, plan: &TransferPlan) -> Flow {
        for (index, source) in plan.sources.iter().enumerate() {
            if !self.rename_ok[index] {
                continue;
            }
            let Some(name) = source.file_name() else {
                continue;
            };
            let target = self.request.destination.join(name);
            if std::fs::symlink_metadata(&target).is_ok() {
                continue;
            }
            self.check_cancel()?;

            match std::fs::rename(source, &target) {
                Ok(()) => {
                    debug!(operation_id = %self.state.id, path = %source.display(), "Renamed source");
                    self.renamed.insert(index);
                    let mut items = 0;
                    for file in plan.files.iter().filter(|f| f.source_index == index) {
                        items += 1;
                        self.state.files_done += 1;
                        self.state.bytes_done += file.size;
                    }
                    self.journal.record_rename(&target, source, items);
                    self.state.current_file = Some(source.clone());
                    self.emit_progress(false);
                }
                Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                    debug!(path = %source.display(), "Rename crosses devices, copying instead");
                    self.rename_ok[index] = false;
                }
                Err(e) => return Err(TransferError::io(source, e).into()),
            }
        }
        Ok(())
    }

    /// Create one planned directory, resolving a non-directory in its way.
    fn ensure_dir(&mut self, dir: &PlannedDir) -> Flow {
        let target = self.redirected(dir.dest_path(&self.request.destination));
        if self.is_blocked(&target) {
            return Ok(());
        }

        match std::fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(meta) => {
                let record = ConflictDetector::directory_record(&dir.path, target.clone(), &meta);
                match self.resolve(&record)? {
                    Resolution::Skip => {
                        debug!(path = %target.display(), "Skipping blocked directory");
                        self.blocked.push(target);
                        Ok(())
                    }
                    Resolution::Overwrite => {
                        std::fs::remove_file(&target).map_err(|e| TransferError::io(&target, e))?;
                        self.create_dir(&target)
                    }
                    Resolution::Rename => {
                        let renamed = ConflictDetector::unique_name(&target);
                        debug!(path = %target.display(), to = %renamed.display(), "Creating directory under a new name");
                        self.create_dir(&renamed)?;
                        self.redirects.push((target, renamed));
                        Ok(())
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => self.create_dir(&target),
            Err(e) => Err(TransferError::io(&target, e).into()),
        }
    }

    fn create_dir(&mut self, target: &Path) -> Flow {
        std::fs::create_dir(target).map_err(|e| TransferError::io(target, e))?;
        self.journal.record_dir(target);
        Ok(())
    }

    fn is_blocked(&self, path: &Path) -> bool {
        self.blocked.iter().any(|b| path.starts_with(b))
    }

    /// Map a planned destination through the renamed directories above it.
    fn redirected(&self, path: PathBuf) -> PathBuf {
        self.redirects.iter().fold(path, |path, (from, to)| {
            match path.strip_prefix(from).ok().map(|rest| to.join(rest)) {
                Some(moved) if path != *from => moved,
                Some(_) => to.clone(),
                None => path,
            }
        })
    }

    fn transfer_file(&mut self, file: &PlannedFile) -> Flow {
        let mut dest = self.redirected(file.dest_path(&self.request.destination));
        if self.is_blocked(&dest) {
            self.state.files_skipped += 1;
            return Ok(());
        }
        self.state.current_file = Some(file.path.clone());

        match std::fs::symlink_metadata(&dest) {
            Ok(existing) => {
                if is_same_entry(&file.path, &existing) {
                    warn!(path = %file.path.display(), "Source and destination are the same file, skipping");
                    self.state.files_skipped += 1;
                    return Ok(());
                }
                let record = ConflictDetector::probe_record(file, dest.clone(), &existing);
                match self.resolve(&record)? {
                    Resolution::Skip => {
                        debug!(path = %dest.display(), "Skipping existing destination");
                        self.state.files_skipped += 1;
                        return Ok(());
                    }
                    Resolution::Overwrite if existing.is_dir() => {
                        std::fs::remove_dir_all(&dest).map_err(|e| TransferError::io(&dest, e))?;
                    }
                    Resolution::Overwrite => {}
                    Resolution::Rename => {
                        dest = ConflictDetector::unique_name(&dest);
                        debug!(path = %dest.display(), "Placing under a new name");
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(TransferError::io(&dest, e).into()),
        }

        self.place(file, &dest)?;
        self.state.files_done += 1;
        self.state.bytes_done += file.size;
        self.emit_progress(false);
        Ok(())
    }

    /// Put one file at `dest`, by rename when allowed, else by copy.
    fn place(&mut self, file: &PlannedFile, dest: &Path) -> Flow {
        if self.rename_ok[file.source_index] {
            match std::fs::rename(&file.path, dest) {
                Ok(()) => {
                    self.journal.record_rename(dest, &file.path, 1);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                    self.rename_ok[file.source_index] = false;
                }
                Err(e) => return Err(TransferError::io(&file.path, e).into()),
            }
        }

        if file.is_symlink() {
            self.copier.copy_symlink(&file.path, dest)?;
            self.journal.record_symlink(dest);
        } else {
            let copier = self.copier;
            let base = self.state.bytes_done;
            let size = file.size;
            let id = self.state.id;
            let state = &self.state;
            let channel = &self.channel;
            let throttle = &mut self.throttle;

            copier.copy_file(&file.path, dest, |written| {
                if throttle.ready() {
                    channel.publish(id, state.progress_with(base + written.min(size)));
                }
                ControlFlow::Continue(())
            })?;
            self.journal.record_file(dest);
        }

        if self.request.is_move() {
            self.copied_sources.push(file.path.clone());
        }
        Ok(())
    }

    /// Remove moved sources once every file is placed. Failures only warn:
    /// the data already exists at the destination.
    fn delete_sources(&mut self, plan: &TransferPlan) {
        self.state.phase = TransferPhase::Deleting;
        self.state.current_file = None;
        self.emit_progress(true);

        for source in self.copied_sources.drain(..) {
            match std::fs::remove_file(&source) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %source.display(), error = %e, "Failed to remove moved source"),
            }
        }

        for dir in plan.dirs.iter().rev() {
            if self.renamed.contains(&dir.source_index) {
                continue;
            }
            // Non-empty means something was skipped; it stays.
            if let Err(e) = std::fs::remove_dir(&dir.path)
                && e.kind() != ErrorKind::NotFound
            {
                debug!(path = %dir.path.display(), error = %e, "Source directory kept");
            }
        }
    }

    /// Settle a conflict by policy, remembered answer, or by asking.
    fn resolve(&mut self, record: &ConflictRecord) -> Flow<Resolution> {
        if self.request.options.conflict_policy == ConflictPolicy::Stop {
            return Err(TransferError::DestinationExists {
                path: record.destination_path.clone(),
            }
            .into());
        }
        if let Some(resolution) = self.request.options.conflict_policy.automatic() {
            return Ok(resolution);
        }
        if let Some(resolution) = self.remembered {
            return Ok(resolution);
        }

        info!(
            operation_id = %self.state.id,
            path = %record.destination_path.display(),
            "Waiting for conflict resolution"
        );
        self.state.awaiting_resolution = true;
        self.publish_status();
        self.channel
            .publish(self.state.id, TransferEvent::conflict(record));

        let answer = self.await_resolution();
        self.state.awaiting_resolution = false;
        self.publish_status();
        answer
    }

    fn await_resolution(&mut self) -> Flow<Resolution> {
        let message = match self.config.conflict_timeout() {
            Some(limit) => {
                let control = &mut self.control;
                match self
                    .handle
                    .block_on(async { tokio::time::timeout(limit, control.recv()).await })
                {
                    Ok(message) => message,
                    Err(_) => {
                        warn!(operation_id = %self.state.id, "Conflict resolution timed out");
                        return Err(Stop::Cancelled(Cancel::KeepPartial));
                    }
                }
            }
            None => self.control.blocking_recv(),
        };

        match message {
            Some(Control::Resolve {
                resolution,
                apply_to_all,
            }) => {
                if apply_to_all {
                    self.remembered = Some(resolution);
                }
                Ok(resolution)
            }
            Some(Control::Cancel(mode)) => Err(Stop::Cancelled(mode)),
            None => Err(Stop::Cancelled(Cancel::KeepPartial)),
        }
    }

    /// Observe pending commands at an item boundary.
    fn check_cancel(&mut self) -> Flow {
        loop {
            match self.control.try_recv() {
                Ok(Control::Cancel(mode)) => return Err(Stop::Cancelled(mode)),
                Ok(Control::Resolve { .. }) => {
                    warn!(operation_id = %self.state.id, "Ignoring resolution with no pending conflict");
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn emit_progress(&mut self, force: bool) {
        if self.throttle.ready() || force {
            self.channel.publish(self.state.id, self.state.progress());
            self.publish_status();
        }
    }

    fn publish_status(&self) {
        self.status.insert(self.state.id, self.state.snapshot());
    }
}

/// Whether the existing destination is the very entry being transferred.
fn is_same_entry(source: &Path, existing: &std::fs::Metadata) -> bool {
    let Ok(source_meta) = std::fs::symlink_metadata(source) else {
        return false;
    };
    match (
        InodeInfo::from_metadata(&source_meta),
        InodeInfo::from_metadata(existing),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
