//! Core types for ferry.
//!
//! This crate provides the plain data shared by the scanner, the executor
//! and the command surface: identifiers, ordering, conflict records,
//! requests, engine configuration and the structured error taxonomy.

mod config;
mod conflict;
mod error;
mod ids;
pub mod path;
mod request;
mod sort;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use conflict::{ConflictPolicy, ConflictRecord, Resolution, SourceItem};
pub use error::{Result, TransferError};
pub use ids::{InodeInfo, OperationId, PreviewId, VolumeId};
pub use request::{
    Cancel, TransferKind, TransferOptions, TransferOptionsBuilder, TransferRequest, TransferRoute,
};
pub use sort::{SortColumn, SortKey, SortOrder, SortSpec};
