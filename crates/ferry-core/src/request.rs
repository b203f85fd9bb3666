//! Transfer request types.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::EngineConfig;
use crate::conflict::ConflictPolicy;
use crate::ids::PreviewId;
use crate::sort::SortSpec;

/// Kind of transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransferKind {
    Copy,
    Move,
}

/// Whether source and destination are known to share a volume.
///
/// A cross-volume transfer never attempts a rename, even when the two
/// paths happen to share a filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferRoute {
    #[default]
    SameVolume,
    CrossVolume,
}

/// How to cancel a running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cancel {
    /// Stop at the next item boundary and leave written files in place.
    /// The caller does not wait.
    KeepPartial,
    /// Stop, then delete everything the operation created. The caller
    /// waits for the terminal cancelled event.
    Rollback,
}

impl Cancel {
    /// Map a boolean rollback flag to a cancel mode.
    pub fn from_rollback(rollback: bool) -> Self {
        if rollback {
            Self::Rollback
        } else {
            Self::KeepPartial
        }
    }

    pub fn rolls_back(self) -> bool {
        matches!(self, Self::Rollback)
    }
}

/// Per-operation options. Unset fields fall back to [`EngineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferOptions {
    /// How name collisions are handled.
    pub conflict_policy: ConflictPolicy,

    /// Minimum spacing between progress events.
    #[builder(setter(strip_option))]
    pub progress_interval_ms: Option<u64>,

    /// Cap on conflicts listed in the advisory preview.
    #[builder(setter(strip_option))]
    pub max_conflicts_to_show: Option<usize>,

    /// File-processing order.
    pub sort: SortSpec,

    /// A completed preview whose plan may be reused.
    #[builder(setter(strip_option))]
    pub preview_id: Option<PreviewId>,
}

impl TransferOptions {
    /// Create a new options builder.
    pub fn builder() -> TransferOptionsBuilder {
        TransferOptionsBuilder::default()
    }

    /// Progress interval, falling back to the engine default.
    pub fn progress_interval_ms(&self, config: &EngineConfig) -> u64 {
        self.progress_interval_ms
            .unwrap_or(config.progress_interval_ms)
    }

    /// Conflict cap, falling back to the engine default.
    pub fn max_conflicts_to_show(&self, config: &EngineConfig) -> usize {
        self.max_conflicts_to_show
            .unwrap_or(config.max_conflicts_to_show)
    }
}

/// A copy or move request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Ordered source paths.
    pub sources: Vec<PathBuf>,
    /// Destination directory.
    pub destination: PathBuf,
    pub kind: TransferKind,
    #[serde(default)]
    pub route: TransferRoute,
    #[serde(default)]
    pub options: TransferOptions,
}

impl TransferRequest {
    /// Create a same-volume request with default options.
    pub fn new(
        sources: impl IntoIterator<Item = impl Into<PathBuf>>,
        destination: impl Into<PathBuf>,
        kind: TransferKind,
    ) -> Self {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            destination: destination.into(),
            kind,
            route: TransferRoute::SameVolume,
            options: TransferOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the route.
    pub fn with_route(mut self, route: TransferRoute) -> Self {
        self.route = route;
        self
    }

    pub fn is_move(&self) -> bool {
        self.kind == TransferKind::Move
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::{SortColumn, SortOrder};

    #[test]
    fn test_options_builder() {
        let options = TransferOptions::builder()
            .conflict_policy(ConflictPolicy::Overwrite)
            .progress_interval_ms(50u64)
            .sort(SortSpec::new(SortColumn::Size, SortOrder::Descending))
            .build()
            .unwrap();

        let config = EngineConfig::default();
        assert_eq!(options.conflict_policy, ConflictPolicy::Overwrite);
        assert_eq!(options.progress_interval_ms(&config), 50);
        assert_eq!(
            options.max_conflicts_to_show(&config),
            config.max_conflicts_to_show
        );
        assert!(options.preview_id.is_none());
    }

    #[test]
    fn test_request_new() {
        let request = TransferRequest::new(["/a/x", "/a/y"], "/b", TransferKind::Move)
            .with_route(TransferRoute::CrossVolume);
        assert_eq!(request.sources.len(), 2);
        assert!(request.is_move());
        assert_eq!(request.route, TransferRoute::CrossVolume);
    }

    #[test]
    fn test_cancel_from_flag() {
        assert!(Cancel::from_rollback(true).rolls_back());
        assert_eq!(Cancel::from_rollback(false), Cancel::KeepPartial);
    }
}
