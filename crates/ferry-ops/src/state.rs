//! Live state of a running transfer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::{OperationId, TransferKind};

use crate::events::{TransferEvent, TransferPhase};

/// Counters owned by the worker of one operation.
#[derive(Debug, Clone)]
pub(crate) struct TransferState {
    pub id: OperationId,
    pub kind: TransferKind,
    pub phase: TransferPhase,
    pub files_done: u64,
    pub files_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_skipped: u64,
    pub current_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub awaiting_resolution: bool,
}

impl TransferState {
    pub fn new(id: OperationId, kind: TransferKind) -> Self {
        Self {
            id,
            kind,
            phase: TransferPhase::Scanning,
            files_done: 0,
            files_total: 0,
            bytes_done: 0,
            bytes_total: 0,
            files_skipped: 0,
            current_file: None,
            started_at: Utc::now(),
            awaiting_resolution: false,
        }
    }

    /// Progress event with `bytes_done` overridden for mid-file updates.
    pub fn progress_with(&self, bytes_done: u64) -> TransferEvent {
        TransferEvent::Progress {
            phase: self.phase,
            current_file: self.current_file.clone(),
            files_done: self.files_done,
            files_total: self.files_total,
            bytes_done,
            bytes_total: self.bytes_total,
        }
    }

    pub fn progress(&self) -> TransferEvent {
        self.progress_with(self.bytes_done)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            operation_id: self.id,
            kind: self.kind,
            phase: self.phase,
            files_done: self.files_done,
            files_total: self.files_total,
            bytes_done: self.bytes_done,
            bytes_total: self.bytes_total,
            files_skipped: self.files_skipped,
            current_file: self.current_file.clone(),
            percent_complete: percent(self.bytes_done, self.bytes_total),
            started_at: self.started_at,
            awaiting_resolution: self.awaiting_resolution,
        }
    }
}

/// Point-in-time view of an active operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub operation_id: OperationId,
    pub kind: TransferKind,
    pub phase: TransferPhase,
    pub files_done: u64,
    pub files_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_skipped: u64,
    pub current_file: Option<PathBuf>,
    /// 0.0 to 100.0 by bytes; 0 when there is nothing to transfer.
    pub percent_complete: f64,
    pub started_at: DateTime<Utc>,
    /// Paused on a conflict.
    pub awaiting_resolution: bool,
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}
