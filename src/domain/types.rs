//! Shared types for the visitor counter

use serde::Serialize;

/// Newtype wrapper for distances in centimeters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(transparent)]
pub struct DistanceCm(pub u32);

impl std::fmt::Display for DistanceCm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Confirmed (debounced) classification of the doorway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebouncedState {
    /// Nothing within the zone threshold
    Outside,
    /// Something within the zone threshold
    EnteringZone,
}

impl DebouncedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebouncedState::Outside => "outside",
            DebouncedState::EnteringZone => "entering_zone",
        }
    }
}

/// Output of the debounce filter for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounced {
    pub state: DebouncedState,
    /// Latest distance that agrees with `state` (None until the first confirmation)
    pub distance: Option<DistanceCm>,
    /// The valid raw sample behind this step, if there was one
    pub sample: Option<DistanceCm>,
    /// True only on the sample that flipped `state`
    pub changed: bool,
}

/// Detector state of the zone hysteresis machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    Idle,
    InZone,
    Confirmed,
}

impl ZoneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneState::Idle => "idle",
            ZoneState::InZone => "in_zone",
            ZoneState::Confirmed => "confirmed",
        }
    }
}

/// A single counted passage, emitted once per occupancy cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryConfirmed {
    pub distance: DistanceCm,
}

/// Report handed to the network layer: count snapshot plus timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReport {
    pub device_id: String,
    /// Cumulative count, not a delta
    pub visitor_count: u32,
    /// Local time with offset (RFC 3339)
    pub timestamp: String,
    /// UTC epoch seconds of the snapshot
    pub epoch: i64,
    pub status: &'static str,
    pub location: String,
}

impl PendingReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
