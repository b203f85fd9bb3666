//! Scan progress reporting.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Running totals of a walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanProgress {
    /// Files found so far.
    pub files_found: u64,
    /// Directories found so far.
    pub dirs_found: u64,
    /// Cumulative size of the files found.
    pub bytes_found: u64,
    /// Entry most recently visited.
    pub current_path: PathBuf,
}

impl ScanProgress {
    /// Create initial progress state.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_file(&mut self, size: u64) {
        self.files_found += 1;
        self.bytes_found += size;
    }

    pub(crate) fn record_dir(&mut self) {
        self.dirs_found += 1;
    }
}

/// Coalesces progress reports to at most one per interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    /// A zero interval lets every report through.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Returns `true` if a report may be emitted now, and if so starts a
    /// new interval.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_always_ready() {
        let mut throttle = ProgressThrottle::from_millis(0);
        assert!(throttle.ready());
        assert!(throttle.ready());
        assert!(throttle.ready());
    }

    #[test]
    fn test_long_interval_coalesces() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(3600));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn test_progress_counters() {
        let mut progress = ScanProgress::new();
        progress.record_file(10);
        progress.record_file(5);
        progress.record_dir();
        assert_eq!(progress.files_found, 2);
        assert_eq!(progress.bytes_found, 15);
        assert_eq!(progress.dirs_found, 1);
    }
}
