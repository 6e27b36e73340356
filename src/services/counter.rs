//! Counting engine: visitor total with persistence and a rate-limited reset
//!
//! The count is restored from storage at boot and written back whenever the
//! unsaved delta reaches `count_save_delta`. A reset is accepted at most once
//! per `min_reset_interval`. Within one boot the limit runs on the monotonic
//! clock, so network time corrections cannot shorten or lift it; the persisted
//! reset epoch only seeds the limit at boot.

use crate::infra::config::Config;
use crate::io::storage::{NvStorage, StorageError};
use crate::services::persistence::PersistentStore;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum CounterError {
    /// A reset was already accepted within the minimum interval
    ResetTooSoon { remaining: Duration },
    Storage(StorageError),
}

impl std::fmt::Display for CounterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterError::ResetTooSoon { remaining } => {
                write!(f, "reset rejected, next allowed in {}s", remaining.as_secs())
            }
            CounterError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for CounterError {}

impl From<StorageError> for CounterError {
    fn from(e: StorageError) -> Self {
        CounterError::Storage(e)
    }
}

pub struct CountingEngine {
    count: u32,
    /// Last value known to be in storage
    saved_count: u32,
    save_delta: u32,
    min_reset_interval: Duration,
    /// Epoch seconds of the last accepted reset
    last_reset: Option<i64>,
    saved_last_reset: Option<i64>,
    /// Monotonic instant before which resets are rejected
    reset_blocked_until: Option<Instant>,
    reset_limit_seeded: bool,
}

impl CountingEngine {
    /// Restore the count and reset history from storage
    pub fn load<S: NvStorage>(store: &mut PersistentStore<S>, config: &Config) -> Self {
        let count = store.load_count();
        let last_reset = store.load_last_reset();
        info!(count = count, last_reset = ?last_reset, "visitor_count_restored");
        Self {
            count,
            saved_count: count,
            save_delta: config.count_save_delta().max(1),
            min_reset_interval: config.min_reset_interval(),
            last_reset,
            saved_last_reset: last_reset,
            reset_blocked_until: None,
            reset_limit_seeded: false,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_reset(&self) -> Option<i64> {
        self.last_reset
    }

    /// Whether the in-memory count or reset time differs from storage
    pub fn is_dirty(&self) -> bool {
        self.count != self.saved_count || self.last_reset != self.saved_last_reset
    }

    /// Translate the persisted reset epoch into a monotonic deadline using
    /// the clock as restored at boot. Only the first call has an effect.
    /// A reset epoch in the future of that clock does not block resets.
    pub fn seed_reset_limit(&mut self, now_epoch: i64, at: Instant) {
        if self.reset_limit_seeded {
            return;
        }
        self.reset_limit_seeded = true;

        let Some(last) = self.last_reset else { return };
        let elapsed = now_epoch - last;
        let min = self.min_reset_interval.as_secs() as i64;
        if (0..min).contains(&elapsed) {
            let remaining = Duration::from_secs((min - elapsed) as u64);
            self.reset_blocked_until = Some(at + remaining);
            info!(remaining_secs = remaining.as_secs(), "reset_limit_restored");
        }
    }

    /// Count one confirmed entry and persist it per the save policy.
    /// A failed write is logged and retried on the next save.
    pub fn on_entry_confirmed<S: NvStorage>(&mut self, store: &mut PersistentStore<S>) -> u32 {
        self.count = self.count.saturating_add(1);
        info!(count = self.count, "visitor_counted");

        if self.count.abs_diff(self.saved_count) >= self.save_delta {
            if let Err(e) = self.flush(store) {
                error!(error = %e, count = self.count, "count_save_failed");
            }
        }
        self.count
    }

    /// Zero the count if the minimum interval since the last reset has
    /// elapsed on the monotonic clock.
    ///
    /// A storage failure still leaves the reset applied in memory, including
    /// the rate limit; `flush` retries the writes.
    pub fn reset<S: NvStorage>(
        &mut self,
        now_epoch: i64,
        at: Instant,
        store: &mut PersistentStore<S>,
    ) -> Result<u32, CounterError> {
        self.seed_reset_limit(now_epoch, at);
        if let Some(until) = self.reset_blocked_until {
            if at < until {
                let remaining = until.duration_since(at);
                warn!(remaining_secs = remaining.as_secs(), "reset_rejected");
                return Err(CounterError::ResetTooSoon { remaining });
            }
        }

        let previous = self.count;
        self.count = 0;
        self.last_reset = Some(now_epoch);
        self.reset_blocked_until = Some(at + self.min_reset_interval);
        info!(previous = previous, at = now_epoch, "visitor_count_reset");
        self.flush(store)?;
        Ok(previous)
    }

    /// Write the reset time (if changed) and then the current count;
    /// unchanged bytes are not rewritten. Returns the bytes that reached storage.
    pub fn flush<S: NvStorage>(&mut self, store: &mut PersistentStore<S>) -> Result<usize, StorageError> {
        let mut written = 0;
        if let Some(epoch) = self.last_reset.filter(|_| self.last_reset != self.saved_last_reset) {
            written += store.store_last_reset(epoch)?;
            self.saved_last_reset = self.last_reset;
        }
        written += store.store_count(self.count)?;
        self.saved_count = self.count;
        Ok(written)
    }
}
