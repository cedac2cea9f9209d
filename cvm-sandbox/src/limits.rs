//! Resource limits that are not per-execution budgets

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supervisor and engine limits for a sandbox.
///
/// Gas budget and deadline are set per sandbox / per call; these knobs
/// shape how they are enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Sleep between supervisor checks
    pub poll_interval: Duration,

    /// Maximum engine heap in bytes (for engines that support it)
    pub max_heap_bytes: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(10),
            max_heap_bytes: Some(100 * 1024 * 1024), // 100 MB default
        }
    }
}

impl ResourceLimits {
    /// Tight polling and a small heap for untrusted code
    pub fn strict() -> Self {
        Self {
            poll_interval: Duration::from_micros(10),
            max_heap_bytes: Some(16 * 1024 * 1024), // 16 MB
        }
    }

    /// Relaxed polling and a large heap for trusted code
    pub fn permissive() -> Self {
        Self {
            poll_interval: Duration::from_micros(500),
            max_heap_bytes: Some(512 * 1024 * 1024), // 512 MB
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_heap_bytes(mut self, bytes: Option<usize>) -> Self {
        self.max_heap_bytes = bytes;
        self
    }
}
