//! Activity, command and outcome handlers for the Engine

use super::{now, Engine, Outcome};
use crate::domain::types::DistanceCm;
use crate::io::commands::{Command, CommandReply, CommandRequest, StatusSnapshot};
use crate::io::ntp::SyncError;
use crate::io::report::ReportError;
use crate::io::sensor::{DistanceSensor, SensorError};
use crate::io::storage::NvStorage;
use crate::services::counter::CounterError;
use crate::services::scheduler::Activity;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

impl<S: DistanceSensor, N: NvStorage> Engine<S, N> {
    pub(crate) async fn run_activity(&mut self, activity: Activity, outcome_tx: &mpsc::Sender<Outcome>) {
        match activity {
            Activity::Sample => self.sample().await,
            Activity::Report => self.begin_report(outcome_tx),
            Activity::TimeSync => self.begin_time_sync(outcome_tx),
            Activity::TimeSave => self.checkpoint(),
        }
        self.record_storage_writes();
    }

    /// Take one reading and push it through the detection pipeline
    async fn sample(&mut self) {
        let reading = match timeout(self.config.sensor_read_timeout(), self.sensor.measure()).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout),
        };

        let distance = match reading {
            Ok(distance) if self.filter.is_valid(distance) => distance,
            Ok(distance) => {
                self.metrics.record_invalid_sample();
                debug!(distance_cm = %distance, "sample_below_minimum");
                return;
            }
            Err(e) => {
                self.metrics.record_invalid_sample();
                debug!(error = %e, "sample_failed");
                return;
            }
        };

        self.metrics.record_sample();
        self.process_distance(distance);
    }

    pub(crate) fn process_distance(&mut self, distance: DistanceCm) {
        let debounced = self.filter.observe(Some(distance));
        debug!(
            distance_cm = %distance,
            debounced = %debounced.state.as_str(),
            zone = %self.zone.state().as_str(),
            "sample"
        );

        if self.zone.observe(debounced).is_some() {
            let count = self.counter.on_entry_confirmed(&mut self.store);
            self.metrics.record_entry();
            self.metrics.set_visitor_count(count);
        }
    }

    fn begin_report(&mut self, outcome_tx: &mpsc::Sender<Outcome>) {
        let epoch = self.clock.now_epoch(now());
        let Some(report) = self.reports.try_begin(self.counter.count(), epoch) else {
            self.metrics.record_report_skipped();
            return;
        };

        debug!(payload = %report.to_json(), "report_started");
        let sink = self.reporter.clone();
        let tx = outcome_tx.clone();
        let limit = self.config.server_timeout();
        tokio::spawn(async move {
            let result = match timeout(limit, sink.send(&report)).await {
                Ok(result) => result,
                Err(_) => Err(ReportError::Timeout),
            };
            let _ = tx.send(Outcome::Report { visitor_count: report.visitor_count, result }).await;
        });
    }

    fn begin_time_sync(&mut self, outcome_tx: &mpsc::Sender<Outcome>) {
        if self.sync_in_flight {
            debug!("time_sync_skipped_in_flight");
            return;
        }
        self.sync_in_flight = true;

        let source = self.time_source.clone();
        let tx = outcome_tx.clone();
        let limit = self.config.ntp_timeout();
        tokio::spawn(async move {
            let result = match timeout(limit, source.query()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            };
            let _ = tx.send(Outcome::TimeSync { result }).await;
        });
    }

    /// Persist the clock, and the count if it has unsaved entries
    fn checkpoint(&mut self) {
        match self.clock.checkpoint(&mut self.store, now()) {
            Ok(bytes) => {
                info!(local = %self.clock.now_local(now()), bytes = bytes, "time_checkpoint")
            }
            Err(e) => error!(error = %e, "time_checkpoint_failed"),
        }
        if self.counter.is_dirty() {
            if let Err(e) = self.counter.flush(&mut self.store) {
                error!(error = %e, "count_save_failed");
            }
        }
    }

    pub(crate) fn handle_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Report { visitor_count, result } => {
                self.metrics.record_report(result.is_ok());
                self.reports.complete(visitor_count, &result);
            }
            Outcome::TimeSync { result } => {
                self.sync_in_flight = false;
                match result {
                    Ok(epoch) => {
                        self.clock.apply_sync(epoch, now());
                        self.metrics.record_time_sync(true);
                    }
                    Err(e) => {
                        self.clock.sync_failed(&e);
                        self.metrics.record_time_sync(false);
                    }
                }
            }
        }
    }

    pub(crate) fn handle_command(&mut self, request: CommandRequest) {
        let reply = match request.command {
            Command::Reset => self.reset(),
            Command::Status => CommandReply::Status(StatusSnapshot {
                visitor_count: self.counter.count(),
                zone_state: self.zone.state(),
                local_time: self.clock.now_local(now()),
                synced: self.clock.is_synced(),
            }),
        };
        self.record_storage_writes();

        if request.reply.send(reply).is_err() {
            debug!(command = ?request.command, "command_requester_gone");
        }
    }

    fn reset(&mut self) -> CommandReply {
        let at = now();
        let now_epoch = self.clock.now_epoch(at);
        match self.counter.reset(now_epoch, at, &mut self.store) {
            Ok(previous) => {
                self.metrics.record_reset(true);
                self.metrics.set_visitor_count(0);
                CommandReply::ResetAccepted { previous }
            }
            Err(CounterError::ResetTooSoon { remaining }) => {
                self.metrics.record_reset(false);
                CommandReply::ResetRejected { remaining_secs: remaining.as_secs() }
            }
            Err(CounterError::Storage(e)) => {
                // Applied in memory; the next save retries the write
                self.metrics.record_reset(true);
                self.metrics.set_visitor_count(0);
                error!(error = %e, "reset_persist_failed");
                CommandReply::Failed("STORAGE_ERROR".to_string())
            }
        }
    }

    fn record_storage_writes(&mut self) {
        let written = self.store.take_write_count();
        if written > 0 {
            self.metrics.record_storage_writes(written);
        }
    }

    /// Final flush of count and clock before the loop returns
    pub(crate) fn persist_on_shutdown(&mut self) {
        if let Err(e) = self.counter.flush(&mut self.store) {
            error!(error = %e, "count_save_failed");
        }
        if let Err(e) = self.clock.checkpoint(&mut self.store, now()) {
            warn!(error = %e, "time_checkpoint_failed");
        }
        self.record_storage_writes();
        info!(
            visitor_count = self.counter.count(),
            local = %self.clock.now_local(now()),
            "engine_stopped"
        );
    }
}
