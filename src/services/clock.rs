//! Time manager: monotonic wall clock with network correction
//!
//! Boots from the persisted date/time (or the epoch when storage holds
//! nothing valid), advances with the monotonic clock, and is re-based on
//! every successful network sync. Checkpoints write the date and time fields
//! separately so a torn write leaves at most one of them stale.

use crate::domain::time::{format_local, split_epoch};
use crate::io::ntp::SyncError;
use crate::io::storage::{NvStorage, StorageError};
use crate::services::persistence::PersistentStore;
use std::time::Instant;
use tracing::{info, warn};

pub struct TimeManager {
    /// Epoch seconds at `base_at`
    base_epoch: i64,
    base_at: Instant,
    synced: bool,
    offset_hours: i32,
}

impl TimeManager {
    pub fn boot<S: NvStorage>(store: &mut PersistentStore<S>, at: Instant, offset_hours: i32) -> Self {
        let base_epoch = match store.load_clock() {
            Some(epoch) => {
                info!(epoch = epoch, local = %format_local(epoch, offset_hours), "clock_restored");
                epoch
            }
            None => {
                warn!("clock_uninitialized");
                0
            }
        };
        Self { base_epoch, base_at: at, synced: false, offset_hours }
    }

    /// Current UTC epoch seconds
    pub fn now_epoch(&self, at: Instant) -> i64 {
        let elapsed = at.saturating_duration_since(self.base_at).as_secs();
        self.base_epoch.saturating_add(elapsed as i64)
    }

    pub fn now_local(&self, at: Instant) -> String {
        format_local(self.now_epoch(at), self.offset_hours)
    }

    /// Whether at least one network sync has succeeded since boot
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Re-base the clock on a network time; returns the correction in seconds
    pub fn apply_sync(&mut self, epoch: i64, at: Instant) -> i64 {
        let drift = epoch - self.now_epoch(at);
        self.base_epoch = epoch;
        self.base_at = at;
        self.synced = true;
        info!(epoch = epoch, drift_secs = drift, local = %format_local(epoch, self.offset_hours), "time_synced");
        drift
    }

    /// A failed sync keeps the local estimate running
    pub fn sync_failed(&self, error: &SyncError) {
        warn!(error = %error, synced = self.synced, "time_sync_failed");
    }

    /// Persist the current time. Both fields are attempted even if one fails.
    pub fn checkpoint<S: NvStorage>(
        &self,
        store: &mut PersistentStore<S>,
        at: Instant,
    ) -> Result<usize, StorageError> {
        let (date, time) = split_epoch(self.now_epoch(at));
        let date_written = store.store_date(date);
        let time_written = store.store_time(time);
        Ok(date_written? + time_written?)
    }
}
