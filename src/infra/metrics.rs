//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the detection loop, the command listener and the
//! Prometheus endpoint can share one instance without locking.
//!
//! NOTE: All atomics use Relaxed ordering intentionally: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Valid distance samples fed to the debounce filter
    samples_total: AtomicU64,
    /// Samples rejected as noise or failed reads
    invalid_samples_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Confirmed entries (monotonic, survives resets)
    entries_total: AtomicU64,
    /// Current visitor count (gauge)
    visitor_count: AtomicU64,
    resets_accepted: AtomicU64,
    resets_rejected: AtomicU64,
    reports_sent: AtomicU64,
    reports_failed: AtomicU64,
    /// Report ticks skipped because a send was still in flight
    reports_skipped: AtomicU64,
    time_syncs_ok: AtomicU64,
    time_syncs_failed: AtomicU64,
    /// Field writes that actually reached storage
    storage_writes: AtomicU64,
    /// Last report time for rate calculation
    last_report: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            invalid_samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            entries_total: AtomicU64::new(0),
            visitor_count: AtomicU64::new(0),
            resets_accepted: AtomicU64::new(0),
            resets_rejected: AtomicU64::new(0),
            reports_sent: AtomicU64::new(0),
            reports_failed: AtomicU64::new(0),
            reports_skipped: AtomicU64::new(0),
            time_syncs_ok: AtomicU64::new(0),
            time_syncs_failed: AtomicU64::new(0),
            storage_writes: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_sample(&self) {
        self.invalid_samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry(&self) {
        self.entries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_visitor_count(&self, count: u32) {
        self.visitor_count.store(count as u64, Ordering::Relaxed);
    }

    pub fn record_reset(&self, accepted: bool) {
        if accepted {
            self.resets_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.resets_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_report(&self, ok: bool) {
        if ok {
            self.reports_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reports_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_report_skipped(&self) {
        self.reports_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_time_sync(&self, ok: bool) {
        if ok {
            self.time_syncs_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.time_syncs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_storage_writes(&self, n: u64) {
        self.storage_writes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn entries_total(&self) -> u64 {
        self.entries_total.load(Ordering::Relaxed)
    }

    pub fn visitor_count(&self) -> u64 {
        self.visitor_count.load(Ordering::Relaxed)
    }

    /// Build a summary. Only the per-interval sample counter is reset.
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_report.lock();
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };

        let samples_interval = self.samples_since_report.swap(0, Ordering::Relaxed);
        let elapsed_secs = elapsed.as_secs_f64();
        let samples_per_sec =
            if elapsed_secs > 0.0 { samples_interval as f64 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            invalid_samples_total: self.invalid_samples_total.load(Ordering::Relaxed),
            samples_per_sec,
            entries_total: self.entries_total.load(Ordering::Relaxed),
            visitor_count: self.visitor_count.load(Ordering::Relaxed),
            resets_accepted: self.resets_accepted.load(Ordering::Relaxed),
            resets_rejected: self.resets_rejected.load(Ordering::Relaxed),
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            reports_skipped: self.reports_skipped.load(Ordering::Relaxed),
            time_syncs_ok: self.time_syncs_ok.load(Ordering::Relaxed),
            time_syncs_failed: self.time_syncs_failed.load(Ordering::Relaxed),
            storage_writes: self.storage_writes.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub invalid_samples_total: u64,
    pub samples_per_sec: f64,
    pub entries_total: u64,
    pub visitor_count: u64,
    pub resets_accepted: u64,
    pub resets_rejected: u64,
    pub reports_sent: u64,
    pub reports_failed: u64,
    pub reports_skipped: u64,
    pub time_syncs_ok: u64,
    pub time_syncs_failed: u64,
    pub storage_writes: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            invalid_samples = %self.invalid_samples_total,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            entries_total = %self.entries_total,
            visitor_count = %self.visitor_count,
            reports_sent = %self.reports_sent,
            reports_failed = %self.reports_failed,
            reports_skipped = %self.reports_skipped,
            syncs_ok = %self.time_syncs_ok,
            syncs_failed = %self.time_syncs_failed,
            storage_writes = %self.storage_writes,
            "metrics"
        );
    }
}
