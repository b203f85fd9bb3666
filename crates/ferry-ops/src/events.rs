//! Transfer events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::{ConflictRecord, TransferError};
use ferry_scan::ScanEvent;

use crate::channel::ChannelEvent;

/// Lifecycle phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Scanning,
    Copying,
    /// Removing sources after a verified cross-filesystem move.
    Deleting,
    Completed,
    Errored,
    Cancelled,
}

impl TransferPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// Events published by a running transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TransferEvent {
    Progress {
        phase: TransferPhase,
        current_file: Option<PathBuf>,
        files_done: u64,
        files_total: u64,
        bytes_done: u64,
        bytes_total: u64,
    },
    /// Advisory list of destination collisions, published once scanning
    /// completes. Blocks nothing.
    ConflictsDetected {
        conflicts: Vec<ConflictRecord>,
        total: usize,
    },
    /// The operation is paused until the conflict is resolved.
    Conflict {
        source_path: Option<PathBuf>,
        destination_path: PathBuf,
        source_size: u64,
        destination_size: u64,
        source_modified: Option<DateTime<Utc>>,
        destination_modified: Option<DateTime<Utc>>,
        size_difference: i64,
        destination_is_newer: bool,
        is_directory: bool,
    },
    Complete {
        files_processed: u64,
        bytes_processed: u64,
        files_skipped: u64,
    },
    Error {
        error: TransferError,
    },
    Cancelled {
        files_processed: u64,
        rolled_back: bool,
        files_rolled_back: u64,
    },
}

impl TransferEvent {
    pub(crate) fn conflict(record: &ConflictRecord) -> Self {
        Self::Conflict {
            source_path: record.source_path.clone(),
            destination_path: record.destination_path.clone(),
            source_size: record.source_size,
            destination_size: record.destination_size,
            source_modified: record.source_modified,
            destination_modified: record.destination_modified,
            size_difference: record.size_difference(),
            destination_is_newer: record.destination_is_newer(),
            is_directory: record.is_directory,
        }
    }
}

impl ChannelEvent for TransferEvent {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Cancelled { .. }
        )
    }

    fn is_progress(&self) -> bool {
        matches!(self, Self::Progress { .. })
    }
}

impl ChannelEvent for ScanEvent {
    fn is_terminal(&self) -> bool {
        ScanEvent::is_terminal(self)
    }

    fn is_progress(&self) -> bool {
        matches!(self, Self::Progress { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::SourceItem;

    #[test]
    fn test_conflict_event_from_record() {
        let item = SourceItem::new("a.txt", 4, None);
        let record = ConflictRecord::new(&item, Some("/s/a.txt".into()), "/d/a.txt".into(), 10, None, false);

        let event = TransferEvent::conflict(&record);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "conflict");
        assert_eq!(value["sizeDifference"], 6);
        assert_eq!(value["destinationIsNewer"], false);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        let complete = TransferEvent::Complete {
            files_processed: 1,
            bytes_processed: 10,
            files_skipped: 0,
        };
        assert!(complete.is_terminal());
        assert!(!complete.is_progress());

        let value = serde_json::to_value(&complete).unwrap();
        assert_eq!(value["event"], "complete");
        assert_eq!(value["filesProcessed"], 1);
    }

    #[test]
    fn test_phase_terminal() {
        assert!(TransferPhase::Cancelled.is_terminal());
        assert!(!TransferPhase::Deleting.is_terminal());
    }
}
