//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::HEADER_SIZE;
use crate::types::TombstoneEncoding;
use std::time::Duration;

/// Hours of the day during which background merges may run.
///
/// Both ends are inclusive. A window whose start is after its end wraps past
/// midnight, so `22..=3` allows 22:00 through 03:59.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeWindow {
    /// First hour (0-23) of the window.
    pub start_hour: u32,
    /// Last hour (0-23) of the window.
    pub end_hour: u32,
}

impl MergeWindow {
    /// A window covering the whole day.
    pub const ALWAYS: Self = Self {
        start_hour: 0,
        end_hour: 23,
    };

    /// Creates a window from `start_hour` through `end_hour`.
    #[must_use]
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// Returns true if `hour` falls inside the window.
    #[must_use]
    pub const fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour <= self.end_hour
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }
}

impl Default for MergeWindow {
    fn default() -> Self {
        Self::ALWAYS
    }
}

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the storage directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to take an advisory lock on the storage directory.
    pub lock_directory: bool,

    /// Maximum size of a segment file before rotation.
    pub max_segment_size: u64,

    /// Whether to fsync the active segment after every write.
    pub sync_on_write: bool,

    /// Whether corruption in the middle of a segment fails the open.
    pub strict_recovery: bool,

    /// How deletions are written and recognised.
    pub tombstone_encoding: TombstoneEncoding,

    /// Whether to run the background compactor.
    pub compaction: bool,

    /// Dead/total record ratio above which a merge is triggered.
    pub merge_trigger: f64,

    /// Hours of the day during which background merges may run.
    pub merge_window: MergeWindow,

    /// How often the compactor wakes up to check the trigger.
    pub merge_interval: Duration,

    /// Pause between segments during a merge pass.
    pub merge_pause: Duration,

    /// Delay before retrying after a failed merge pass.
    pub merge_retry_delay: Duration,

    /// Log collaborator for engine and compactor events.
    ///
    /// `None` uses whatever default dispatcher is active when the engine opens.
    pub log_dispatch: Option<tracing::Dispatch>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            lock_directory: true,
            max_segment_size: 1024 * 1024 * 1024, // 1 GB
            sync_on_write: false,
            strict_recovery: false,
            tombstone_encoding: TombstoneEncoding::Flag,
            compaction: true,
            merge_trigger: 0.6,
            merge_window: MergeWindow::ALWAYS,
            merge_interval: Duration::from_secs(10 * 60),
            merge_pause: Duration::from_secs(10),
            merge_retry_delay: Duration::from_secs(60),
            log_dispatch: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to lock the storage directory.
    #[must_use]
    pub const fn lock_directory(mut self, value: bool) -> Self {
        self.lock_directory = value;
        self
    }

    /// Sets maximum segment file size.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets whether to fsync after every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets whether mid-segment corruption fails the open.
    #[must_use]
    pub const fn strict_recovery(mut self, value: bool) -> Self {
        self.strict_recovery = value;
        self
    }

    /// Sets the deletion marker encoding.
    #[must_use]
    pub const fn tombstone_encoding(mut self, encoding: TombstoneEncoding) -> Self {
        self.tombstone_encoding = encoding;
        self
    }

    /// Enables or disables the background compactor.
    #[must_use]
    pub const fn compaction(mut self, value: bool) -> Self {
        self.compaction = value;
        self
    }

    /// Sets the dead ratio that triggers a merge.
    #[must_use]
    pub const fn merge_trigger(mut self, ratio: f64) -> Self {
        self.merge_trigger = ratio;
        self
    }

    /// Sets the merge window.
    #[must_use]
    pub const fn merge_window(mut self, window: MergeWindow) -> Self {
        self.merge_window = window;
        self
    }

    /// Sets the compactor wake-up interval.
    #[must_use]
    pub const fn merge_interval(mut self, interval: Duration) -> Self {
        self.merge_interval = interval;
        self
    }

    /// Sets the pause between merged segments.
    #[must_use]
    pub const fn merge_pause(mut self, pause: Duration) -> Self {
        self.merge_pause = pause;
        self
    }

    /// Sets the retry delay after a failed merge.
    #[must_use]
    pub const fn merge_retry_delay(mut self, delay: Duration) -> Self {
        self.merge_retry_delay = delay;
        self
    }

    /// Sets the log collaborator.
    #[must_use]
    pub fn log_dispatch(mut self, dispatch: tracing::Dispatch) -> Self {
        self.log_dispatch = Some(dispatch);
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_segment_size <= HEADER_SIZE as u64 {
            return Err(CoreError::InvalidConfig {
                message: "max_segment_size must exceed the record header size",
            });
        }
        if !self.merge_trigger.is_finite() || self.merge_trigger < 0.0 {
            return Err(CoreError::InvalidConfig {
                message: "merge_trigger must be a non-negative number",
            });
        }
        if self.merge_window.start_hour > 23 || self.merge_window.end_hour > 23 {
            return Err(CoreError::InvalidConfig {
                message: "merge window hours must be between 0 and 23",
            });
        }
        if self.merge_interval.is_zero() {
            return Err(CoreError::InvalidConfig {
                message: "merge_interval must be non-zero",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.lock_directory);
        assert!(!config.sync_on_write);
        assert!((config.merge_trigger - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.merge_window, MergeWindow::ALWAYS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_segment_size(64)
            .sync_on_write(true)
            .compaction(false)
            .merge_window(MergeWindow::new(2, 5));

        assert_eq!(config.max_segment_size, 64);
        assert!(config.sync_on_write);
        assert!(!config.compaction);
        assert_eq!(config.merge_window.start_hour, 2);
    }

    #[test]
    fn window_contains() {
        let day = MergeWindow::new(2, 5);
        assert!(day.contains(2));
        assert!(day.contains(5));
        assert!(!day.contains(1));
        assert!(!day.contains(6));

        let night = MergeWindow::new(22, 3);
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(night.contains(3));
        assert!(!night.contains(12));

        assert!((0..24).all(|h| MergeWindow::ALWAYS.contains(h)));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(Config::new().max_segment_size(10).validate().is_err());
        assert!(Config::new().merge_trigger(f64::NAN).validate().is_err());
        assert!(Config::new().merge_trigger(-0.1).validate().is_err());
        assert!(Config::new()
            .merge_window(MergeWindow::new(0, 24))
            .validate()
            .is_err());
        assert!(Config::new()
            .merge_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
