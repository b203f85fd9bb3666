//! The command surface: start, resolve, cancel, query.

use std::collections::VecDeque;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use ferry_core::{
    Cancel, ConflictRecord, EngineConfig, OperationId, PreviewId, Resolution, Result, SortSpec,
    SourceItem, TransferError, TransferKind, TransferOptions, TransferRequest, TransferRoute,
    VolumeId,
};
use ferry_scan::{ScanEvent, ScanPreview, TransferPlan};

use crate::channel::{EventChannel, EventListener};
use crate::conflict::ConflictDetector;
use crate::events::TransferEvent;
use crate::executor::{Control, ExecutionReport, Executor};
use crate::journal::Journal;
use crate::path_planner::PathPlanner;
use crate::rollback::{RollbackManager, RollbackReport};
use crate::state::StatusSnapshot;
use crate::volume::{Volume, VolumeRegistry};

/// Listener for transfer events.
pub type TransferListener = EventListener<OperationId, TransferEvent>;

/// Listener for scan preview events.
pub type ScanListener = EventListener<PreviewId, ScanEvent>;

/// Bounded keyed store: the oldest entries are dropped past `cap`.
struct Retained<K, V> {
    items: DashMap<K, V>,
    order: Mutex<VecDeque<K>>,
    cap: usize,
}

impl<K: Eq + Hash + Clone, V> Retained<K, V> {
    fn new(cap: usize) -> Self {
        Self {
            items: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    fn insert(&self, key: K, value: V) {
        self.items.insert(key.clone(), value);
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.push_back(key);
        while order.len() > self.cap {
            if let Some(old) = order.pop_front() {
                self.items.remove(&old);
            }
        }
    }

    fn take(&self, key: &K) -> Option<V> {
        let (_, value) = self.items.remove(key)?;
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|k| k != key);
        Some(value)
    }
}

struct EngineInner {
    config: EngineConfig,
    transfers: EventChannel<OperationId, TransferEvent>,
    scans: EventChannel<PreviewId, ScanEvent>,
    active: DashMap<OperationId, mpsc::UnboundedSender<Control>>,
    status: Arc<DashMap<OperationId, StatusSnapshot>>,
    journals: Retained<OperationId, Journal>,
    previews: Retained<PreviewId, TransferPlan>,
    scan_tokens: DashMap<PreviewId, CancellationToken>,
    volumes: VolumeRegistry,
}

impl EngineInner {
    /// Release an operation, then announce its end.
    fn finish(&self, id: OperationId, report: ExecutionReport) {
        if let Some(journal) = report.journal.filter(|j| !j.is_empty()) {
            self.journals.insert(id, journal);
        }
        self.active.remove(&id);
        self.status.remove(&id);
        self.transfers.publish(id, report.terminal);
    }
}

/// Runs scan previews and transfers, each on its own blocking worker.
///
/// Cloning is cheap; clones share every operation. Start commands must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

impl TransferEngine {
    pub fn new(config: EngineConfig) -> Self {
        let inner = EngineInner {
            transfers: EventChannel::new(config.event_capacity, config.retained_operations),
            scans: EventChannel::new(config.event_capacity, config.retained_operations),
            active: DashMap::new(),
            status: Arc::new(DashMap::new()),
            journals: Retained::new(config.retained_operations),
            previews: Retained::new(config.retained_operations),
            scan_tokens: DashMap::new(),
            volumes: VolumeRegistry::new(),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start a dry-run walk of `sources`. Every call gets a fresh id.
    pub fn start_scan(
        &self,
        sources: Vec<PathBuf>,
        sort: SortSpec,
        progress_interval_ms: Option<u64>,
    ) -> PreviewId {
        let id = PreviewId::new();
        let token = CancellationToken::new();
        self.inner.scan_tokens.insert(id, token.clone());

        let interval = progress_interval_ms.unwrap_or(self.inner.config.progress_interval_ms);
        info!(preview_id = %id, sources = sources.len(), "Scan preview started");
        let preview = ScanPreview::new(id, sources, sort, interval, token);

        let inner = Arc::clone(&self.inner);
        let worker = tokio::task::spawn_blocking(move || {
            let outcome = preview.run(|event| inner.scans.publish(id, event));
            if let Some(plan) = outcome.plan {
                inner.previews.insert(id, plan);
            }
            inner.scan_tokens.remove(&id);
            inner.scans.publish(id, outcome.terminal);
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(preview_id = %id, error = %e, "Scan worker failed");
                inner.scan_tokens.remove(&id);
                if !inner.scans.is_finished(&id) {
                    let error = TransferError::other(PathBuf::new(), format!("Scan worker failed: {e}"));
                    inner.scans.publish(id, ScanEvent::Error { error });
                }
            }
        });

        id
    }

    /// Stop a running preview. Unknown or finished ids are ignored.
    pub fn cancel_scan(&self, id: PreviewId) {
        if let Some(token) = self.inner.scan_tokens.get(&id) {
            debug!(preview_id = %id, "Cancelling scan preview");
            token.cancel();
        }
    }

    /// Name collisions between `items` and a directory on a registered volume.
    pub fn check_conflicts(
        &self,
        volume: &VolumeId,
        items: &[SourceItem],
        destination: &Path,
    ) -> Result<Vec<ConflictRecord>> {
        let volume = self.inner.volumes.get(volume)?;
        let dir = volume.resolve(destination);
        ConflictDetector::new(self.inner.config.max_conflicts_to_show).check(&dir, items)
    }

    /// Start a transfer between locations on the same volume.
    pub fn start_transfer(
        &self,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        kind: TransferKind,
        options: TransferOptions,
    ) -> Result<OperationId> {
        self.submit(TransferRequest::new(sources, destination, kind).with_options(options))
    }

    /// Start a transfer to another volume. Moves always copy, then delete.
    pub fn start_cross_volume_transfer(
        &self,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        kind: TransferKind,
        options: TransferOptions,
    ) -> Result<OperationId> {
        self.submit(
            TransferRequest::new(sources, destination, kind)
                .with_options(options)
                .with_route(TransferRoute::CrossVolume),
        )
    }

    /// Validate `request` and start its worker. Validation errors are
    /// returned here and no worker is started.
    pub fn submit(&self, request: TransferRequest) -> Result<OperationId> {
        PathPlanner::validate(&request)?;

        let id = OperationId::new();
        let plan = self.take_preview_plan(&request);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.active.insert(id, tx);

        let executor = Executor::new(
            id,
            request,
            self.inner.config.clone(),
            plan,
            self.inner.transfers.clone(),
            Arc::clone(&self.inner.status),
            rx,
            Handle::current(),
        );

        let inner = Arc::clone(&self.inner);
        let worker = tokio::task::spawn_blocking(move || {
            let report = executor.run();
            inner.finish(id, report);
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(operation_id = %id, error = %e, "Transfer worker failed");
                inner.active.remove(&id);
                inner.status.remove(&id);
                if !inner.transfers.is_finished(&id) {
                    let error =
                        TransferError::other(PathBuf::new(), format!("Transfer worker failed: {e}"));
                    inner.transfers.publish(id, TransferEvent::Error { error });
                }
            }
        });

        Ok(id)
    }

    fn take_preview_plan(&self, request: &TransferRequest) -> Option<TransferPlan> {
        let preview_id = request.options.preview_id?;
        let plan = self.inner.previews.take(&preview_id)?;
        if plan.matches_sources(&request.sources) {
            Some(plan)
        } else {
            debug!(preview_id = %preview_id, "Preview sources differ, rescanning");
            None
        }
    }

    /// Answer the conflict an operation is paused on. With `apply_to_all`
    /// the answer is reused for every later conflict of the operation.
    pub fn resolve_conflict(&self, id: OperationId, resolution: Resolution, apply_to_all: bool) {
        let Some(tx) = self.inner.active.get(&id) else {
            debug!(operation_id = %id, "Resolution for inactive operation ignored");
            return;
        };
        let _ = tx.send(Control::Resolve {
            resolution,
            apply_to_all,
        });
    }

    /// Cancel an operation.
    ///
    /// `KeepPartial` returns at once. `Rollback` waits for the terminal
    /// event and returns it. Cancelling a finished or unknown operation does
    /// nothing and returns `None`.
    pub async fn cancel_transfer(&self, id: OperationId, mode: Cancel) -> Option<TransferEvent> {
        let mut listener = self.inner.transfers.subscribe_to(id);
        let sent = self
            .inner
            .active
            .get(&id)
            .is_some_and(|tx| tx.send(Control::Cancel(mode)).is_ok());
        if !sent {
            debug!(operation_id = %id, "Cancel for inactive operation ignored");
            return None;
        }

        info!(operation_id = %id, rollback = mode.rolls_back(), "Cancel requested");
        match mode {
            Cancel::KeepPartial => None,
            Cancel::Rollback => listener.wait_terminal().await,
        }
    }

    /// Undo what a failed or keep-partial-cancelled operation created.
    ///
    /// Runs at most once per operation; completed, active and unknown
    /// operations are left alone.
    pub async fn rollback(&self, id: OperationId, restore_moved: bool) -> Result<RollbackReport> {
        if self.inner.active.contains_key(&id) {
            debug!(operation_id = %id, "Operation still active, rollback ignored");
            return Ok(RollbackReport::default());
        }
        let Some(journal) = self.inner.journals.take(&id) else {
            return Ok(RollbackReport::default());
        };

        let report = tokio::task::spawn_blocking(move || {
            RollbackManager::rollback(journal.entries(), restore_moved)
        })
        .await
        .map_err(|e| TransferError::other(PathBuf::new(), format!("Rollback worker failed: {e}")))?;

        info!(
            operation_id = %id,
            files = report.files_rolled_back,
            failed = report.failed,
            "Rollback complete"
        );
        Ok(report)
    }

    /// Snapshot of a running operation.
    pub fn operation_status(&self, id: OperationId) -> Option<StatusSnapshot> {
        self.inner.status.get(&id).map(|s| s.value().clone())
    }

    /// Snapshots of every running operation, oldest first.
    pub fn active_operations(&self) -> Vec<StatusSnapshot> {
        let mut all: Vec<_> = self
            .inner
            .status
            .iter()
            .map(|s| s.value().clone())
            .collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    /// Unbound listener for every transfer; call
    /// [`EventListener::bind`] once the id is known.
    pub fn transfer_events(&self) -> TransferListener {
        self.inner.transfers.subscribe()
    }

    /// Listener for one transfer, replaying what it already published.
    pub fn subscribe_transfer(&self, id: OperationId) -> TransferListener {
        self.inner.transfers.subscribe_to(id)
    }

    pub fn scan_events(&self) -> ScanListener {
        self.inner.scans.subscribe()
    }

    pub fn subscribe_scan(&self, id: PreviewId) -> ScanListener {
        self.inner.scans.subscribe_to(id)
    }

    /// Add a volume for [`check_conflicts`](Self::check_conflicts).
    pub fn register_volume(&self, volume: Arc<dyn Volume>) {
        self.inner.volumes.register(volume);
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
