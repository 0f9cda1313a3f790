//! Global atomic counters for harness observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    commands_executed: AtomicU64,
    command_failures: AtomicU64,
    subcases_passed: AtomicU64,
    subcases_failed: AtomicU64,
    cleanup_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            commands_executed: AtomicU64::new(0),
            command_failures: AtomicU64::new(0),
            subcases_passed: AtomicU64::new(0),
            subcases_failed: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
        }
    }

    /// Increment the commands-executed counter by one.
    pub fn inc_commands(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "commands_executed", "counter incremented");
    }

    pub fn inc_command_failures(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "command_failures", "counter incremented");
    }

    /// Count one finished verification sub-case.
    pub fn record_subcase(&self, passed: bool) {
        if passed {
            self.subcases_passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.subcases_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_cleanup_failures(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cleanup_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            commands_executed = self.commands_executed(),
            command_failures = self.command_failures(),
            subcases_passed = self.subcases_passed(),
            subcases_failed = self.subcases_failed(),
            cleanup_failures = self.cleanup_failures(),
        );
    }

    pub fn commands_executed(&self) -> u64 {
        self.commands_executed.load(Ordering::Relaxed)
    }

    pub fn command_failures(&self) -> u64 {
        self.command_failures.load(Ordering::Relaxed)
    }

    pub fn subcases_passed(&self) -> u64 {
        self.subcases_passed.load(Ordering::Relaxed)
    }

    pub fn subcases_failed(&self) -> u64 {
        self.subcases_failed.load(Ordering::Relaxed)
    }

    pub fn cleanup_failures(&self) -> u64 {
        self.cleanup_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Use a local instance so parallel tests touching METRICS don't interfere.
    #[test]
    fn test_counters_increment() {
        let m = Metrics::new();
        m.inc_commands();
        m.inc_commands();
        m.inc_command_failures();
        m.record_subcase(true);
        m.record_subcase(false);
        m.record_subcase(false);
        m.inc_cleanup_failures();

        assert_eq!(m.commands_executed(), 2);
        assert_eq!(m.command_failures(), 1);
        assert_eq!(m.subcases_passed(), 1);
        assert_eq!(m.subcases_failed(), 2);
        assert_eq!(m.cleanup_failures(), 1);
        m.flush();
    }
}
