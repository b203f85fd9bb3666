//! Source tree walking for ferry.
//!
//! This crate turns the top-level sources of a request into an ordered
//! [`TransferPlan`] using jwalk for traversal.
//!
//! # Overview
//!
//! - **Walker** visits every source depth-first, recording files, symlinks
//!   and directories. Special files are skipped.
//! - **TransferPlan** holds the flat file list in processing order plus the
//!   totals fixed at scan time.
//! - **ScanPreview** runs a dry walk with throttled progress events and a
//!   single terminal event, cancellable through a token.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::ops::ControlFlow;
//! use std::path::PathBuf;
//! use ferry_scan::{SortSpec, WalkMode, WalkOutcome, Walker};
//!
//! let sources = vec![PathBuf::from("/path/to/photos")];
//! let outcome = Walker::new(WalkMode::Strict)
//!     .walk(&sources, SortSpec::default(), |_| ControlFlow::Continue(()))
//!     .unwrap();
//!
//! if let WalkOutcome::Completed(plan) = outcome {
//!     println!("{} files, {} bytes", plan.files_total(), plan.bytes_total);
//! }
//! ```

mod inode;
mod plan;
mod preview;
mod progress;
mod walker;

pub use inode::DirTracker;
pub use plan::{EntryKind, PlannedDir, PlannedFile, TransferPlan};
pub use preview::{PreviewOutcome, ScanEvent, ScanPreview};
pub use progress::{ProgressThrottle, ScanProgress};
pub use walker::{WalkMode, WalkOutcome, Walker};

// Re-export core types for convenience
pub use ferry_core::{PreviewId, SortColumn, SortOrder, SortSpec, TransferError};
