//! Transfer execution for ferry.
//!
//! This crate validates requests, runs copies and moves on background
//! workers, publishes their events, and undoes what they created when asked.
//!
//! # Overview
//!
//! - **TransferEngine** is the command surface: scan previews, conflict
//!   checks, transfers, conflict resolution, cancellation, rollback and
//!   status queries.
//! - **EventChannel** carries `(id, event)` pairs to any number of
//!   listeners, buffering for listeners that learn their id late and
//!   replaying history for listeners that attach late.
//! - **PathPlanner** rejects impossible requests before any I/O.
//! - **ConflictDetector** matches incoming names against a destination.
//! - **RollbackManager** removes journaled creations in reverse order.
//!
//! # Example
//!
//! ```rust,no_run
//! use ferry_ops::{TransferEngine, TransferKind, TransferOptions};
//!
//! # async fn run() -> ferry_ops::Result<()> {
//! let engine = TransferEngine::default();
//! let mut events = engine.transfer_events();
//!
//! let id = engine.start_transfer(
//!     vec!["/home/me/photos".into()],
//!     "/media/backup".into(),
//!     TransferKind::Copy,
//!     TransferOptions::default(),
//! )?;
//! events.bind(id);
//!
//! while let Some(envelope) = events.recv().await {
//!     println!("{:?}", envelope.event);
//! }
//! # Ok(())
//! # }
//! ```

mod channel;
mod conflict;
mod copy;
mod engine;
mod events;
mod executor;
mod journal;
mod path_planner;
mod rollback;
mod space;
mod state;
mod volume;

pub use channel::{ChannelEvent, Envelope, EventChannel, EventListener};
pub use conflict::{ConflictDetector, ConflictPreview};
pub use copy::FileCopier;
pub use engine::{ScanListener, TransferEngine, TransferListener};
pub use events::{TransferEvent, TransferPhase};
pub use journal::{CreatedKind, CreatedPath, Journal};
pub use path_planner::PathPlanner;
pub use rollback::{RollbackManager, RollbackReport};
pub use space::{available_space, ensure_space};
pub use state::StatusSnapshot;
pub use volume::{LocalVolume, Volume, VolumeRegistry, same_device};

// Re-export core and scan types for convenience
pub use ferry_core::{
    Cancel, ConflictPolicy, ConflictRecord, EngineConfig, OperationId, PreviewId, Resolution,
    Result, SortColumn, SortOrder, SortSpec, SourceItem, TransferError, TransferKind,
    TransferOptions, TransferRequest, TransferRoute, VolumeId,
};
pub use ferry_scan::ScanEvent;
