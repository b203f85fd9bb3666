//! Engine configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration shared by every operation an engine runs.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct EngineConfig {
    /// Default minimum spacing between progress events.
    #[builder(default = "200")]
    pub progress_interval_ms: u64,

    /// Default cap on conflicts listed by the advisory preview.
    #[builder(default = "100")]
    pub max_conflicts_to_show: usize,

    /// Slots in the broadcast ring shared by live subscribers.
    #[builder(default = "1024")]
    pub event_capacity: usize,

    /// Finished operations whose event history is kept for late subscribers.
    #[builder(default = "64")]
    pub retained_operations: usize,

    /// Seconds to wait for a conflict resolution (None = until resolved
    /// or cancelled).
    #[builder(default = "None")]
    pub conflict_timeout_secs: Option<u64>,

    /// Chunk size for byte-stream copies.
    #[builder(default = "1024 * 1024")]
    pub copy_buffer_size: usize,

    /// Check free space on the destination before copying.
    #[builder(default = "true")]
    pub check_disk_space: bool,

    /// Carry modification and access times over to copies.
    #[builder(default = "true")]
    pub preserve_timestamps: bool,
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.event_capacity == Some(0) {
            return Err("Event capacity must be greater than zero".to_string());
        }
        if self.copy_buffer_size == Some(0) {
            return Err("Copy buffer size must be greater than zero".to_string());
        }
        if self.conflict_timeout_secs == Some(Some(0)) {
            return Err("Conflict timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Conflict wait limit as a duration.
    pub fn conflict_timeout(&self) -> Option<Duration> {
        self.conflict_timeout_secs.map(Duration::from_secs)
    }

    /// Re-run the builder checks on a config obtained some other way
    /// (deserialized from a file, for instance).
    pub fn validate(&self) -> Result<(), String> {
        EngineConfigBuilder::from(self.clone()).validate()
    }
}

impl From<EngineConfig> for EngineConfigBuilder {
    fn from(config: EngineConfig) -> Self {
        Self {
            progress_interval_ms: Some(config.progress_interval_ms),
            max_conflicts_to_show: Some(config.max_conflicts_to_show),
            event_capacity: Some(config.event_capacity),
            retained_operations: Some(config.retained_operations),
            conflict_timeout_secs: Some(config.conflict_timeout_secs),
            copy_buffer_size: Some(config.copy_buffer_size),
            check_disk_space: Some(config.check_disk_space),
            preserve_timestamps: Some(config.preserve_timestamps),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 200,
            max_conflicts_to_show: 100,
            event_capacity: 1024,
            retained_operations: 64,
            conflict_timeout_secs: None,
            copy_buffer_size: 1024 * 1024,
            check_disk_space: true,
            preserve_timestamps: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .progress_interval_ms(10u64)
            .conflict_timeout_secs(Some(30u64))
            .build()
            .unwrap();

        assert_eq!(config.progress_interval_ms, 10);
        assert_eq!(config.max_conflicts_to_show, 100);
        assert_eq!(config.conflict_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_conflicts_wait_indefinitely_by_default() {
        assert!(EngineConfig::default().conflict_timeout().is_none());
    }

    #[test]
    fn test_config_default_matches_builder() {
        let built = EngineConfig::builder().build().unwrap();
        assert_eq!(built, EngineConfig::default());
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let result = EngineConfig::builder().event_capacity(0usize).build();
        assert!(result.is_err());

        let config = EngineConfig {
            copy_buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
