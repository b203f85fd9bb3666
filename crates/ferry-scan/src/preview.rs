//! Dry-run scan previews.

use std::ops::ControlFlow;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ferry_core::{PreviewId, SortSpec, TransferError};

use crate::plan::TransferPlan;
use crate::progress::{ProgressThrottle, ScanProgress};
use crate::walker::{WalkMode, WalkOutcome, Walker};

/// Events published by a scan preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ScanEvent {
    Progress {
        files_found: u64,
        dirs_found: u64,
        bytes_found: u64,
        current_path: PathBuf,
    },
    Complete {
        files_total: u64,
        dirs_total: u64,
        bytes_total: u64,
    },
    Error {
        error: TransferError,
    },
    Cancelled {
        files_found: u64,
        dirs_found: u64,
        bytes_found: u64,
    },
}

impl ScanEvent {
    /// Whether this event ends the preview.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    fn progress(progress: &ScanProgress) -> Self {
        Self::Progress {
            files_found: progress.files_found,
            dirs_found: progress.dirs_found,
            bytes_found: progress.bytes_found,
            current_path: progress.current_path.clone(),
        }
    }
}

/// One preview run: walks its sources without writing anything.
#[derive(Debug)]
pub struct ScanPreview {
    id: PreviewId,
    sources: Vec<PathBuf>,
    sort: SortSpec,
    interval_ms: u64,
    cancel: CancellationToken,
}

impl ScanPreview {
    pub fn new(
        id: PreviewId,
        sources: Vec<PathBuf>,
        sort: SortSpec,
        interval_ms: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            sources,
            sort,
            interval_ms,
            cancel,
        }
    }

    /// Run the walk to completion, passing throttled progress events to
    /// `emit`. The terminal event is returned rather than emitted so the
    /// caller can store the plan before announcing completion.
    ///
    /// Unreadable entries below a source are logged and skipped; totals
    /// reflect what was reachable.
    pub fn run(self, mut emit: impl FnMut(ScanEvent)) -> PreviewOutcome {
        let mut throttle = ProgressThrottle::from_millis(self.interval_ms);
        let cancel = &self.cancel;

        let result = Walker::new(WalkMode::Lenient).walk(&self.sources, self.sort, |progress| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            if throttle.ready() {
                emit(ScanEvent::progress(progress));
            }
            ControlFlow::Continue(())
        });

        match result {
            Ok(WalkOutcome::Completed(plan)) => {
                info!(
                    preview_id = %self.id,
                    files = plan.files_total(),
                    bytes = plan.bytes_total,
                    "Scan preview complete"
                );
                PreviewOutcome {
                    terminal: ScanEvent::Complete {
                        files_total: plan.files_total(),
                        dirs_total: plan.dirs_total(),
                        bytes_total: plan.bytes_total,
                    },
                    plan: Some(plan),
                }
            }
            Ok(WalkOutcome::Cancelled(progress)) => {
                info!(preview_id = %self.id, files = progress.files_found, "Scan preview cancelled");
                PreviewOutcome {
                    terminal: ScanEvent::Cancelled {
                        files_found: progress.files_found,
                        dirs_found: progress.dirs_found,
                        bytes_found: progress.bytes_found,
                    },
                    plan: None,
                }
            }
            Err(error) => {
                warn!(preview_id = %self.id, kind = error.kind(), error = %error, "Scan preview failed");
                PreviewOutcome {
                    terminal: ScanEvent::Error { error },
                    plan: None,
                }
            }
        }
    }
}

/// How a preview ended.
#[derive(Debug)]
pub struct PreviewOutcome {
    /// The single terminal event for this preview.
    pub terminal: ScanEvent,
    /// The ordered plan, present only when the walk completed.
    pub plan: Option<TransferPlan>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("photos");
        fs::create_dir_all(root.join("2024")).unwrap();
        fs::write(root.join("a.jpg"), vec![0u8; 100]).unwrap();
        fs::write(root.join("2024/b.jpg"), vec![0u8; 50]).unwrap();
        temp
    }

    fn run(preview: ScanPreview) -> (Option<TransferPlan>, Vec<ScanEvent>) {
        let mut events = Vec::new();
        let outcome = preview.run(|e| events.push(e));
        events.push(outcome.terminal);
        (outcome.plan, events)
    }

    #[test]
    fn test_preview_completes_with_totals() {
        let temp = tree();
        let preview = ScanPreview::new(
            PreviewId::new(),
            vec![temp.path().join("photos")],
            SortSpec::default(),
            0,
            CancellationToken::new(),
        );

        let (plan, events) = run(preview);
        assert!(plan.is_some());
        assert_eq!(
            events.last(),
            Some(&ScanEvent::Complete {
                files_total: 2,
                dirs_total: 2,
                bytes_total: 150
            })
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[test]
    fn test_preview_throttles_progress() {
        let temp = tree();
        let preview = ScanPreview::new(
            PreviewId::new(),
            vec![temp.path().join("photos")],
            SortSpec::default(),
            60_000,
            CancellationToken::new(),
        );

        let (_, events) = run(preview);
        let progress = events.iter().filter(|e| !e.is_terminal()).count();
        assert_eq!(progress, 1);
    }

    #[test]
    fn test_preview_cancelled_before_start() {
        let temp = tree();
        let token = CancellationToken::new();
        token.cancel();
        let preview = ScanPreview::new(
            PreviewId::new(),
            vec![temp.path().join("photos")],
            SortSpec::default(),
            0,
            token,
        );

        let (plan, events) = run(preview);
        assert!(plan.is_none());
        assert!(matches!(events.as_slice(), [ScanEvent::Cancelled { .. }]));
    }

    #[test]
    fn test_preview_cancelled_mid_walk_keeps_totals() {
        let temp = tree();
        let token = CancellationToken::new();
        let preview = ScanPreview::new(
            PreviewId::new(),
            vec![temp.path().join("photos")],
            SortSpec::default(),
            0,
            token.clone(),
        );

        let mut events = Vec::new();
        let outcome = preview.run(|e| {
            if matches!(e, ScanEvent::Progress { .. }) {
                token.cancel();
            }
            events.push(e);
        });

        assert!(outcome.plan.is_none());
        match outcome.terminal {
            ScanEvent::Cancelled {
                files_found,
                dirs_found,
                ..
            } => {
                assert!(files_found + dirs_found > 0);
                assert!(files_found < 2);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn test_preview_missing_source_errors() {
        let temp = TempDir::new().unwrap();
        let preview = ScanPreview::new(
            PreviewId::new(),
            vec![temp.path().join("gone")],
            SortSpec::default(),
            0,
            CancellationToken::new(),
        );

        let (plan, events) = run(preview);
        assert!(plan.is_none());
        assert!(matches!(
            events.as_slice(),
            [ScanEvent::Error {
                error: TransferError::SourceNotFound { .. }
            }]
        ));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = ScanEvent::Complete {
            files_total: 1,
            dirs_total: 0,
            bytes_total: 10,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "complete");
        assert_eq!(value["filesTotal"], 1);
    }
}
