//! Detection and counting engine
//!
//! The Engine owns every piece of mutable state and drives it from a single
//! loop:
//! - Sampling feeds the debounce filter and zone machine, entries bump the count
//! - Reports and time queries run as spawned tasks bounded by a timeout and
//!   hand their outcome back over a channel
//! - Storage is only touched from the loop
//! - RESET / STATUS commands arrive over a channel and are answered in place

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::types::ZoneState;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::commands::CommandRequest;
use crate::io::ntp::{SyncError, TimeSource};
use crate::io::report::{ReportError, ReportSink};
use crate::io::sensor::DistanceSensor;
use crate::io::storage::NvStorage;
use crate::services::clock::TimeManager;
use crate::services::counter::CountingEngine;
use crate::services::debounce::DebounceFilter;
use crate::services::persistence::PersistentStore;
use crate::services::reporter::ReportScheduler;
use crate::services::scheduler::Scheduler;
use crate::services::zone::ZoneStateMachine;
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Result of a network task, delivered back to the loop
#[derive(Debug)]
pub(crate) enum Outcome {
    Report { visitor_count: u32, result: Result<(), ReportError> },
    TimeSync { result: Result<i64, SyncError> },
}

/// Current instant on the runtime clock (virtual under paused test time)
#[inline]
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub struct Engine<S: DistanceSensor, N: NvStorage> {
    pub(crate) config: Config,
    pub(crate) sensor: S,
    pub(crate) store: PersistentStore<N>,
    pub(crate) filter: DebounceFilter,
    pub(crate) zone: ZoneStateMachine,
    pub(crate) counter: CountingEngine,
    pub(crate) clock: TimeManager,
    pub(crate) reports: ReportScheduler,
    pub(crate) reporter: Arc<dyn ReportSink>,
    pub(crate) time_source: Arc<dyn TimeSource>,
    pub(crate) metrics: Arc<Metrics>,
    /// A time query is outstanding
    pub(crate) sync_in_flight: bool,
}

impl<S: DistanceSensor, N: NvStorage> Engine<S, N> {
    /// Restore persisted state and assemble the pipeline
    pub fn new(
        config: Config,
        sensor: S,
        storage: N,
        reporter: Arc<dyn ReportSink>,
        time_source: Arc<dyn TimeSource>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let mut store = PersistentStore::new(storage, config.storage_layout())
            .context("storage layout does not fit the device")?;

        let mut counter = CountingEngine::load(&mut store, &config);
        let booted_at = now();
        let clock = TimeManager::boot(&mut store, booted_at, config.timezone_offset_hours());
        counter.seed_reset_limit(clock.now_epoch(booted_at), booted_at);
        metrics.set_visitor_count(counter.count());

        Ok(Self {
            filter: DebounceFilter::new(&config),
            zone: ZoneStateMachine::new(&config),
            reports: ReportScheduler::new(&config),
            config,
            sensor,
            store,
            counter,
            clock,
            reporter,
            time_source,
            metrics,
            sync_in_flight: false,
        })
    }

    pub fn visitor_count(&self) -> u32 {
        self.counter.count()
    }

    pub fn zone_state(&self) -> ZoneState {
        self.zone.state()
    }

    pub fn now_epoch(&self) -> i64 {
        self.clock.now_epoch(now())
    }

    /// Give back the storage device, e.g. to simulate a restart
    pub fn into_storage(self) -> N {
        self.store.into_inner()
    }

    /// Run until shutdown is signalled, then persist and return the engine
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<CommandRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(8);
        let mut scheduler = Scheduler::new(&self.config, now());
        let mut tick = interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            device_id = %self.config.device_id(),
            visitor_count = self.counter.count(),
            tick_ms = self.config.tick_interval().as_millis() as u64,
            "engine_started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for activity in scheduler.poll(now()) {
                        self.run_activity(activity, &outcome_tx).await;
                    }
                }
                Some(request) = cmd_rx.recv() => {
                    self.handle_command(request);
                }
                Some(outcome) = outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.persist_on_shutdown();
        self
    }
}
