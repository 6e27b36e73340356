//! Domain models - core types shared by the detection pipeline
//!
//! This module contains the canonical data types used throughout the system:
//! - `DistanceCm` - a raw range sample
//! - `DebouncedState` / `ZoneState` - detector states
//! - `EntryConfirmed` - one counted passage
//! - `PendingReport` - count snapshot sent to the server
//! - `time` - packed date/time fields and local formatting
//! - `layout` - fixed-offset storage schema

pub mod layout;
pub mod time;
pub mod types;

pub use types::{Debounced, DebouncedState, DistanceCm, EntryConfirmed, PendingReport, ZoneState};
