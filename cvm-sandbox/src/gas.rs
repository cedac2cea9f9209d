//! Gas accounting shared between in-engine instrumentation and the supervisor

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-sandbox gas counter and budget.
///
/// `charge` is only ever called from code running inside the engine; the
/// supervisor only reads. Relaxed loads are enough: a stale read delays
/// enforcement by one poll, it never turns a failure into a success.
#[derive(Debug, Default)]
pub struct GasMeter {
    used: AtomicU64,
    limit: AtomicU64,
}

impl GasMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the counter, saturating at `u64::MAX`.
    pub fn charge(&self, amount: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_add(amount))
            });
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.used.store(0, Ordering::Relaxed);
    }

    /// Whether the counter is strictly above the budget.
    pub fn exceeded(&self) -> bool {
        self.used() > self.limit()
    }
}
