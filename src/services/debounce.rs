//! Debounce filter for raw distance samples
//!
//! Each valid sample is classified against the zone threshold. The confirmed
//! state only flips once `required` consecutive samples agree on the new
//! classification. Samples under the minimum distance are sensor noise and
//! leave the running streak untouched.

use crate::domain::types::{Debounced, DebouncedState, DistanceCm};
use crate::infra::config::Config;
use tracing::debug;

pub struct DebounceFilter {
    zone_threshold_cm: u32,
    min_distance_cm: u32,
    required: u32,
    /// Classification currently building a streak
    candidate: Option<DebouncedState>,
    streak: u32,
    confirmed: DebouncedState,
    /// Latest sample agreeing with `confirmed`
    distance: Option<DistanceCm>,
}

impl DebounceFilter {
    pub fn new(config: &Config) -> Self {
        Self {
            zone_threshold_cm: config.zone_threshold_cm(),
            min_distance_cm: config.min_distance_cm(),
            required: config.required_consecutive().max(1),
            candidate: None,
            streak: 0,
            confirmed: DebouncedState::Outside,
            distance: None,
        }
    }

    #[inline]
    fn classify(&self, distance: DistanceCm) -> DebouncedState {
        if distance.0 <= self.zone_threshold_cm {
            DebouncedState::EnteringZone
        } else {
            DebouncedState::Outside
        }
    }

    /// Whether a sample is a usable reading at all
    #[inline]
    pub fn is_valid(&self, distance: DistanceCm) -> bool {
        distance.0 >= self.min_distance_cm
    }

    /// Feed one raw sample. `None` means the sensor produced no reading.
    pub fn observe(&mut self, sample: Option<DistanceCm>) -> Debounced {
        let Some(distance) = sample.filter(|d| self.is_valid(*d)) else {
            return self.current(None, false);
        };

        let class = self.classify(distance);
        if self.candidate == Some(class) {
            self.streak = self.streak.saturating_add(1);
        } else {
            self.candidate = Some(class);
            self.streak = 1;
        }

        let mut changed = false;
        if self.streak >= self.required {
            if class != self.confirmed {
                debug!(
                    from = %self.confirmed.as_str(),
                    to = %class.as_str(),
                    distance_cm = %distance,
                    streak = self.streak,
                    "debounce_state_changed"
                );
                self.confirmed = class;
                changed = true;
            }
            self.distance = Some(distance);
        } else if class == self.confirmed {
            self.distance = Some(distance);
        }

        self.current(Some(distance), changed)
    }

    fn current(&self, sample: Option<DistanceCm>, changed: bool) -> Debounced {
        Debounced { state: self.confirmed, distance: self.distance, sample, changed }
    }

    pub fn state(&self) -> DebouncedState {
        self.confirmed
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
