//! Tunables of a field grid.

use std::time::Duration;

/// Default dense canvas edge length in pixels.
pub const DEFAULT_DENSE_SIZE: u32 = 1024;

/// Default number of persistence quadrants per layer.
pub const DEFAULT_QUADRANT_COUNT: u32 = 16;

/// Default flush debounce delay.
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Default number of write-and-verify attempts per key.
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;

/// Default base delay between write attempts (multiplied by attempt number).
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Dense-canvas and persistence settings for one grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSettings {
    /// Dense canvas width in pixels.
    pub dense_width: u32,
    /// Dense canvas height in pixels.
    pub dense_height: u32,
    /// Configured quadrant count. A stored zero template overrides it.
    pub quadrant_count: u32,
    /// Delay between the first pending write and the flush it triggers.
    pub flush_debounce: Duration,
    /// Write-and-verify attempts per key before giving up.
    pub max_write_attempts: u32,
    /// Base delay between attempts.
    pub retry_backoff: Duration,
    /// Resident layer bound. `None` keeps every materialized layer.
    pub max_resident_layers: Option<usize>,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            dense_width: DEFAULT_DENSE_SIZE,
            dense_height: DEFAULT_DENSE_SIZE,
            quadrant_count: DEFAULT_QUADRANT_COUNT,
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_resident_layers: None,
        }
    }
}
