//! Zone hysteresis state machine
//!
//! IDLE -> IN_ZONE when the debounced state enters the zone, IN_ZONE ->
//! CONFIRMED after `confirm_samples` further in-zone observations (emits the
//! entry), and back to IDLE only once the debounced state is outside and the
//! last `required` valid samples all cleared the exit threshold. The band
//! between the two thresholds holds the current state, so one visitor
//! produces one entry.

use crate::domain::types::{Debounced, DebouncedState, EntryConfirmed, ZoneState};
use crate::infra::config::Config;
use tracing::{debug, info};

pub struct ZoneStateMachine {
    state: ZoneState,
    exit_threshold_cm: u32,
    required: u32,
    confirm_samples: u32,
    /// In-zone observations since entering IN_ZONE
    dwell: u32,
    /// Consecutive valid samples above the exit threshold
    exit_streak: u32,
}

impl ZoneStateMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            state: ZoneState::Idle,
            exit_threshold_cm: config.exit_threshold_cm(),
            required: config.required_consecutive().max(1),
            confirm_samples: config.confirm_samples(),
            dwell: 0,
            exit_streak: 0,
        }
    }

    pub fn state(&self) -> ZoneState {
        self.state
    }

    /// Advance the machine by one debounced observation.
    /// Returns at most one entry per occupancy cycle.
    pub fn observe(&mut self, input: Debounced) -> Option<EntryConfirmed> {
        self.track_exit(&input);
        match (self.state, input.state) {
            (ZoneState::Idle, DebouncedState::EnteringZone) => {
                self.transition(ZoneState::InZone, &input);
                self.dwell = 0;
                self.try_confirm(&input)
            }
            (ZoneState::Idle, DebouncedState::Outside) => None,
            (ZoneState::InZone, DebouncedState::EnteringZone) => {
                self.dwell = self.dwell.saturating_add(1);
                self.try_confirm(&input)
            }
            (ZoneState::InZone, DebouncedState::Outside) => {
                // Left before the dwell completed: nothing counted
                self.transition(ZoneState::Idle, &input);
                None
            }
            (ZoneState::Confirmed, DebouncedState::Outside) => {
                if self.exit_streak >= self.required {
                    self.transition(ZoneState::Idle, &input);
                }
                None
            }
            (ZoneState::Confirmed, DebouncedState::EnteringZone) => None,
        }
    }

    /// Missing readings keep the streak, an in-band sample restarts it
    fn track_exit(&mut self, input: &Debounced) {
        match input.sample {
            Some(d) if d.0 > self.exit_threshold_cm => {
                self.exit_streak = self.exit_streak.saturating_add(1)
            }
            Some(_) => self.exit_streak = 0,
            None => {}
        }
    }

    fn try_confirm(&mut self, input: &Debounced) -> Option<EntryConfirmed> {
        if self.dwell < self.confirm_samples {
            return None;
        }
        self.transition(ZoneState::Confirmed, input);
        let distance = input.distance?;
        info!(distance_cm = %distance, "entry_confirmed");
        Some(EntryConfirmed { distance })
    }

    fn transition(&mut self, to: ZoneState, input: &Debounced) {
        debug!(
            from = %self.state.as_str(),
            to = %to.as_str(),
            distance_cm = ?input.distance.map(|d| d.0),
            "zone_transition"
        );
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DistanceCm;
    use crate::services::debounce::DebounceFilter;

    /// Feed raw samples through a debounce filter into the machine
    fn run(config: &Config, samples: &[u32]) -> (ZoneStateMachine, Vec<EntryConfirmed>) {
        let mut filter = DebounceFilter::new(config);
        let mut machine = ZoneStateMachine::new(config);
        let entries = samples
            .iter()
            .filter_map(|&cm| machine.observe(filter.observe(Some(DistanceCm(cm)))))
            .collect();
        (machine, entries)
    }

    fn repeat(pattern: &[(u32, usize)]) -> Vec<u32> {
        pattern.iter().flat_map(|&(cm, n)| std::iter::repeat(cm).take(n)).collect()
    }

    #[test]
    fn test_single_passage_counts_once() {
        let config = Config::default();
        let samples = repeat(&[(200, 3), (140, 4), (200, 3)]);
        let (machine, entries) = run(&config, &samples);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].distance, DistanceCm(140));
        assert_eq!(machine.state(), ZoneState::Idle);
    }

    #[test]
    fn test_entry_emitted_on_debounce_change() {
        let config = Config::default();
        let mut filter = DebounceFilter::new(&config);
        let mut machine = ZoneStateMachine::new(&config);

        assert!(machine.observe(filter.observe(Some(DistanceCm(140)))).is_none());
        assert!(machine.observe(filter.observe(Some(DistanceCm(140)))).is_none());
        assert!(machine.observe(filter.observe(Some(DistanceCm(140)))).is_some());
        assert_eq!(machine.state(), ZoneState::Confirmed);
        // Lingering in the zone never counts again
        for _ in 0..20 {
            assert!(machine.observe(filter.observe(Some(DistanceCm(140)))).is_none());
        }
    }

    #[test]
    fn test_oscillation_in_dead_band_stays_confirmed() {
        let config = Config::default();
        let mut samples = repeat(&[(140, 3)]);
        samples.extend([154, 156].iter().cycle().take(40));
        let (machine, entries) = run(&config, &samples);

        assert_eq!(entries.len(), 1);
        assert_eq!(machine.state(), ZoneState::Confirmed);
    }

    #[test]
    fn test_inverted_thresholds_hold_in_band() {
        // Exit above the zone threshold: 155 is outside the zone but not yet released
        let config = Config::default().with_thresholds(150, 160);
        let samples = repeat(&[(140, 3), (155, 10)]);
        let (machine, entries) = run(&config, &samples);
        assert_eq!(entries.len(), 1);
        assert_eq!(machine.state(), ZoneState::Confirmed);

        let samples = repeat(&[(140, 3), (155, 10), (170, 3)]);
        let (machine, _) = run(&config, &samples);
        assert_eq!(machine.state(), ZoneState::Idle);
    }

    #[test]
    fn test_single_spike_above_exit_does_not_release() {
        let config = Config::default().with_thresholds(150, 160);
        let samples = repeat(&[(140, 3), (155, 5), (170, 1), (155, 2), (140, 3)]);
        let (machine, entries) = run(&config, &samples);
        assert_eq!(entries.len(), 1);
        assert_eq!(machine.state(), ZoneState::Confirmed);
    }

    #[test]
    fn test_exit_spikes_shorter_than_required_hold() {
        let config = Config::default();
        let samples = repeat(&[(140, 3), (200, 2), (145, 1), (200, 2), (140, 3)]);
        let (machine, entries) = run(&config, &samples);
        assert_eq!(entries.len(), 1);
        assert_eq!(machine.state(), ZoneState::Confirmed);
    }

    #[test]
    fn test_two_visitors_count_twice() {
        let config = Config::default();
        let samples = repeat(&[(240, 5), (130, 5), (240, 5), (120, 5), (240, 5)]);
        let (machine, entries) = run(&config, &samples);
        assert_eq!(entries.len(), 2);
        assert_eq!(machine.state(), ZoneState::Idle);
    }

    #[test]
    fn test_short_blip_never_counts() {
        let config = Config::default();
        let samples = repeat(&[(240, 5), (130, 2), (240, 5), (130, 1), (240, 5)]);
        let (_, entries) = run(&config, &samples);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_confirm_samples_requires_dwell() {
        let config = Config::default().with_confirm_samples(2);
        let mut filter = DebounceFilter::new(&config);
        let mut machine = ZoneStateMachine::new(&config);

        for _ in 0..3 {
            assert!(machine.observe(filter.observe(Some(DistanceCm(140)))).is_none());
        }
        assert_eq!(machine.state(), ZoneState::InZone);
        assert!(machine.observe(filter.observe(Some(DistanceCm(140)))).is_none());
        assert!(machine.observe(filter.observe(Some(DistanceCm(140)))).is_some());
        assert_eq!(machine.state(), ZoneState::Confirmed);
    }

    #[test]
    fn test_leaving_before_dwell_aborts() {
        let config = Config::default().with_confirm_samples(5);
        let samples = repeat(&[(140, 4), (240, 3)]);
        let (machine, entries) = run(&config, &samples);
        assert!(entries.is_empty());
        assert_eq!(machine.state(), ZoneState::Idle);
    }
}
