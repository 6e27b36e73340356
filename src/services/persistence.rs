//! Typed access to the persisted record set
//!
//! Wraps a byte-level `NvStorage` with the `StorageLayout` schema. Loads never
//! fail: unreadable or out-of-range values are logged and replaced by the
//! uninitialized default (count 0, no clock, no previous reset).

use crate::domain::layout::{Field, FieldValue, LayoutError, StorageLayout};
use crate::domain::time::{join_epoch, PackedDate, PackedTime};
use crate::io::storage::{NvStorage, StorageError};
use tracing::{debug, warn};

/// Counts above this are treated as corrupt (erased cells read as u32::MAX)
pub const MAX_VALID_COUNT: u32 = 100_000_000;

/// Largest field width in the layout
const MAX_FIELD_WIDTH: usize = 8;

pub struct PersistentStore<S: NvStorage> {
    storage: S,
    layout: StorageLayout,
    /// Bytes physically written since the last `take_write_count`
    writes: u64,
}

impl<S: NvStorage> PersistentStore<S> {
    pub fn new(storage: S, layout: StorageLayout) -> Result<Self, LayoutError> {
        layout.validate(storage.capacity())?;
        Ok(Self { storage, layout, writes: 0 })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Drain the written-bytes counter (fed into metrics by the engine)
    pub fn take_write_count(&mut self) -> u64 {
        std::mem::take(&mut self.writes)
    }

    fn read_field<T: FieldValue>(&mut self, field: Field<T>) -> Result<T, StorageError> {
        let mut buf = [0u8; MAX_FIELD_WIDTH];
        self.storage.read(field.offset, &mut buf[..T::WIDTH])?;
        Ok(T::decode(&buf[..T::WIDTH]))
    }

    fn write_field<T: FieldValue>(&mut self, field: Field<T>, value: T) -> Result<usize, StorageError> {
        let mut buf = [0u8; MAX_FIELD_WIDTH];
        value.encode(&mut buf[..T::WIDTH]);
        let written = self.storage.write(field.offset, &buf[..T::WIDTH])?;
        self.writes += written as u64;
        debug!(field = %field.name, offset = field.offset, bytes = written, "field_stored");
        Ok(written)
    }

    /// Load the visitor count; corrupt or unreadable values yield 0
    pub fn load_count(&mut self) -> u32 {
        match self.read_field(self.layout.count) {
            Ok(count) if count <= MAX_VALID_COUNT => count,
            Ok(count) => {
                warn!(raw = count, "stored_count_invalid");
                0
            }
            Err(e) => {
                warn!(error = %e, "stored_count_unreadable");
                0
            }
        }
    }

    pub fn store_count(&mut self, count: u32) -> Result<usize, StorageError> {
        self.write_field(self.layout.count, count)
    }

    /// Load the persisted clock as UTC epoch seconds; None if either field is invalid
    pub fn load_clock(&mut self) -> Option<i64> {
        let date = self.read_field(self.layout.date);
        let time = self.read_field(self.layout.time);
        match (date, time) {
            (Ok(date), Ok(time)) => {
                let epoch = join_epoch(PackedDate(date), PackedTime(time));
                if epoch.is_none() {
                    warn!(date = date, time = time, "stored_clock_invalid");
                }
                epoch
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "stored_clock_unreadable");
                None
            }
        }
    }

    pub fn store_date(&mut self, date: PackedDate) -> Result<usize, StorageError> {
        self.write_field(self.layout.date, date.0)
    }

    pub fn store_time(&mut self, time: PackedTime) -> Result<usize, StorageError> {
        self.write_field(self.layout.time, time.0)
    }

    /// Epoch seconds of the last accepted reset, if one was recorded
    pub fn load_last_reset(&mut self) -> Option<i64> {
        match self.read_field(self.layout.last_reset) {
            Ok(epoch) if epoch > 0 => Some(epoch),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "stored_last_reset_unreadable");
                None
            }
        }
    }

    pub fn store_last_reset(&mut self, epoch: i64) -> Result<usize, StorageError> {
        self.write_field(self.layout.last_reset, epoch)
    }
}
