//! Non-volatile storage schema
//!
//! Each persisted value is a fixed-width field at a fixed byte offset. Widths
//! come from the field's value type; the layout is checked once at startup for
//! overlapping regions and for fitting inside the device capacity.

use std::marker::PhantomData;

/// A value that can live in a fixed-width storage field (little endian)
pub trait FieldValue: Sized + Copy {
    const WIDTH: usize;
    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl FieldValue for u32 {
    const WIDTH: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&buf[..4]);
        u32::from_le_bytes(raw)
    }
}

impl FieldValue for i64 {
    const WIDTH: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[..8]);
        i64::from_le_bytes(raw)
    }
}

/// Typed field descriptor: name, offset, and a width derived from `T`
#[derive(Debug)]
pub struct Field<T: FieldValue> {
    pub name: &'static str,
    pub offset: usize,
    _value: PhantomData<T>,
}

impl<T: FieldValue> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: FieldValue> Copy for Field<T> {}

impl<T: FieldValue> Field<T> {
    pub const fn new(name: &'static str, offset: usize) -> Self {
        Self { name, offset, _value: PhantomData }
    }

    pub const fn width(&self) -> usize {
        T::WIDTH
    }

    /// One past the last byte of this field
    pub const fn end(&self) -> usize {
        self.offset + T::WIDTH
    }

    fn region(&self) -> Region {
        Region { name: self.name, start: self.offset, end: self.end() }
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    name: &'static str,
    start: usize,
    end: usize,
}

/// Layout validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    Overlap { first: &'static str, second: &'static str },
    OutOfBounds { field: &'static str, end: usize, capacity: usize },
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::Overlap { first, second } => {
                write!(f, "storage fields '{first}' and '{second}' overlap")
            }
            LayoutError::OutOfBounds { field, end, capacity } => {
                write!(f, "storage field '{field}' ends at byte {end}, capacity is {capacity}")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

/// The device's persisted record set
#[derive(Debug, Clone, Copy)]
pub struct StorageLayout {
    /// Visitor count
    pub count: Field<u32>,
    /// UTC date, packed YYYYMMDD
    pub date: Field<u32>,
    /// UTC seconds since midnight
    pub time: Field<u32>,
    /// Epoch seconds of the last accepted reset
    pub last_reset: Field<i64>,
}

impl StorageLayout {
    pub const fn new(
        count_offset: usize,
        date_offset: usize,
        time_offset: usize,
        last_reset_offset: usize,
    ) -> Self {
        Self {
            count: Field::new("count", count_offset),
            date: Field::new("date", date_offset),
            time: Field::new("time", time_offset),
            last_reset: Field::new("last_reset", last_reset_offset),
        }
    }

    fn regions(&self) -> [Region; 4] {
        [self.count.region(), self.date.region(), self.time.region(), self.last_reset.region()]
    }

    /// Check that no two fields share a byte and every field fits in `capacity`
    pub fn validate(&self, capacity: usize) -> Result<(), LayoutError> {
        let mut regions = self.regions();
        regions.sort_by_key(|r| r.start);

        for pair in regions.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(LayoutError::Overlap { first: pair[0].name, second: pair[1].name });
            }
        }

        if let Some(last) = regions.iter().max_by_key(|r| r.end) {
            if last.end > capacity {
                return Err(LayoutError::OutOfBounds {
                    field: last.name,
                    end: last.end,
                    capacity,
                });
            }
        }

        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(0, 10, 20, 30)
    }
}
