//! Conflict policy and conflict records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How an operation treats destination entries whose name matches an
/// incoming item.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ConflictPolicy {
    /// Leave the existing entry and move on.
    Skip,
    /// Replace the existing entry.
    Overwrite,
    /// Place the incoming item under a free name (`name (1).ext`, ...).
    Rename,
    /// Fail the operation with `destination_exists` on the first conflict.
    Stop,
    /// Pause and wait for a resolution.
    #[default]
    Ask,
}

/// Answer to a single conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Resolution {
    Skip,
    Overwrite,
    Rename,
}

impl ConflictPolicy {
    /// The resolution this policy applies without asking, if any.
    pub fn automatic(self) -> Option<Resolution> {
        match self {
            Self::Skip => Some(Resolution::Skip),
            Self::Overwrite => Some(Resolution::Overwrite),
            Self::Rename => Some(Resolution::Rename),
            Self::Stop | Self::Ask => None,
        }
    }
}

/// An incoming item as seen by the conflict detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    /// Entry name (final path component).
    pub name: CompactString,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl SourceItem {
    /// Create a source item.
    pub fn new(name: impl Into<CompactString>, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
        }
    }
}

/// One colliding destination name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub name: CompactString,
    pub source_path: Option<PathBuf>,
    pub destination_path: PathBuf,
    pub source_size: u64,
    pub destination_size: u64,
    pub source_modified: Option<DateTime<Utc>>,
    pub destination_modified: Option<DateTime<Utc>>,
    /// Incoming item is strictly newer than the existing one.
    pub is_newer: bool,
    /// Incoming item is strictly larger than the existing one.
    pub is_larger: bool,
    /// A directory is involved on either side (type conflict or an
    /// existing directory in the way of a file).
    pub is_directory: bool,
}

impl ConflictRecord {
    /// Build a record, deriving the comparison flags.
    pub fn new(
        item: &SourceItem,
        source_path: Option<PathBuf>,
        destination_path: PathBuf,
        destination_size: u64,
        destination_modified: Option<DateTime<Utc>>,
        is_directory: bool,
    ) -> Self {
        let is_newer = match (item.modified, destination_modified) {
            (Some(src), Some(dst)) => src > dst,
            _ => false,
        };
        Self {
            name: item.name.clone(),
            source_path,
            destination_path,
            source_size: item.size,
            destination_size,
            source_modified: item.modified,
            destination_modified,
            is_newer,
            is_larger: item.size > destination_size,
            is_directory,
        }
    }

    /// Existing size minus incoming size.
    pub fn size_difference(&self) -> i64 {
        self.destination_size as i64 - self.source_size as i64
    }

    /// The existing entry is strictly newer than the incoming one.
    pub fn destination_is_newer(&self) -> bool {
        match (self.source_modified, self.destination_modified) {
            (Some(src), Some(dst)) => dst > src,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(secs, 0).single()
    }

    #[test]
    fn test_comparisons_are_strict() {
        let item = SourceItem::new("a.txt", 10, at(100));
        let record = ConflictRecord::new(&item, None, "/d/a.txt".into(), 10, at(100), false);
        assert!(!record.is_newer);
        assert!(!record.is_larger);
        assert!(!record.destination_is_newer());
        assert_eq!(record.size_difference(), 0);
    }

    #[test]
    fn test_incoming_newer_and_larger() {
        let item = SourceItem::new("a.txt", 20, at(200));
        let record = ConflictRecord::new(&item, None, "/d/a.txt".into(), 5, at(100), false);
        assert!(record.is_newer);
        assert!(record.is_larger);
        assert_eq!(record.size_difference(), -15);
    }

    #[test]
    fn test_missing_times_are_not_newer() {
        let item = SourceItem::new("a.txt", 1, None);
        let record = ConflictRecord::new(&item, None, "/d/a.txt".into(), 1, at(5), false);
        assert!(!record.is_newer);
        assert!(!record.destination_is_newer());
    }

    #[test]
    fn test_policy_automatic() {
        assert_eq!(ConflictPolicy::Skip.automatic(), Some(Resolution::Skip));
        assert_eq!(ConflictPolicy::Rename.automatic(), Some(Resolution::Rename));
        assert_eq!(ConflictPolicy::Ask.automatic(), None);
        assert_eq!(ConflictPolicy::Stop.automatic(), None);
        assert_eq!("overwrite".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Overwrite);
    }
}
