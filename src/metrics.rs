// Scheduler metrics module
//
// Lightweight counters for what the restart scheduler has done since it started

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Scheduler metrics
///
/// Uses atomic operations so the counters can be shared through an `Arc`
/// without locks. Logged periodically by the scheduler loop and once on
/// shutdown.
#[derive(Debug)]
pub struct SchedulerMetrics {
    /// Loop iterations completed (including failed ones)
    pub iterations: AtomicU64,

    /// Pre-restart warnings broadcast to players
    pub warnings_sent: AtomicUsize,

    /// Restart sequences run (scheduled and mod-update)
    pub restarts: AtomicUsize,

    /// Restart sequences triggered by workshop updates
    pub mod_update_restarts: AtomicUsize,

    /// Workshop update checks performed
    pub update_checks: AtomicUsize,

    /// Backups that failed or were not configured
    pub backup_failures: AtomicUsize,

    /// Save files removed by map cleanup
    pub files_cleaned: AtomicUsize,

    /// Iterations that ended in an error
    pub loop_errors: AtomicU64,

    /// Scheduler start time
    start_time: Instant,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            iterations: AtomicU64::new(0),
            warnings_sent: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            mod_update_restarts: AtomicUsize::new(0),
            update_checks: AtomicUsize::new(0),
            backup_failures: AtomicUsize::new(0),
            files_cleaned: AtomicUsize::new(0),
            loop_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warning(&self) {
        self.warnings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed restart sequence
    pub fn record_restart(&self, mod_update: bool) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        if mod_update {
            self.mod_update_restarts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_update_check(&self) {
        self.update_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backup_failure(&self) {
        self.backup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_files_cleaned(&self, count: usize) {
        self.files_cleaned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_loop_error(&self) {
        self.loop_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Scheduler Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Iterations: {}, loop errors: {}",
            self.iterations.load(Ordering::Relaxed),
            self.loop_errors.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Restarts: {} ({} for mod updates), warnings sent: {}",
            self.restarts.load(Ordering::Relaxed),
            self.mod_update_restarts.load(Ordering::Relaxed),
            self.warnings_sent.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Update checks: {}, backup failures: {}, files cleaned: {}",
            self.update_checks.load(Ordering::Relaxed),
            self.backup_failures.load(Ordering::Relaxed),
            self.files_cleaned.load(Ordering::Relaxed)
        );
    }

    /// Log a one-line progress report
    pub fn log_periodic(&self) {
        tracing::info!(
            "Metrics: {} iterations, {} restarts, {} update checks, {} errors, uptime {:.0}s",
            self.iterations.load(Ordering::Relaxed),
            self.restarts.load(Ordering::Relaxed),
            self.update_checks.load(Ordering::Relaxed),
            self.loop_errors.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
