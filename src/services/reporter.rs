//! Report scheduler: at most one report in flight
//!
//! Each report tick snapshots the cumulative count. If the previous send has
//! not completed the tick is skipped. A failed send is dropped; the next tick
//! carries the newer total anyway.

use crate::domain::time::format_local;
use crate::domain::types::PendingReport;
use crate::infra::config::Config;
use crate::io::report::ReportError;
use tracing::{debug, info, warn};

const STATUS_ACTIVE: &str = "active";

pub struct ReportScheduler {
    device_id: String,
    location: String,
    offset_hours: i32,
    in_flight: bool,
    /// Count carried by the last report the server acknowledged
    last_acked: Option<u32>,
}

impl ReportScheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            device_id: config.device_id().to_string(),
            location: config.location().to_string(),
            offset_hours: config.timezone_offset_hours(),
            in_flight: false,
            last_acked: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    /// Build the next report, or None if one is still outstanding
    pub fn try_begin(&mut self, visitor_count: u32, epoch: i64) -> Option<PendingReport> {
        if self.in_flight {
            debug!(visitor_count = visitor_count, "report_skipped_in_flight");
            return None;
        }
        self.in_flight = true;
        Some(PendingReport {
            device_id: self.device_id.clone(),
            visitor_count,
            timestamp: format_local(epoch, self.offset_hours),
            epoch,
            status: STATUS_ACTIVE,
            location: self.location.clone(),
        })
    }

    /// Record the outcome of the outstanding report
    pub fn complete(&mut self, visitor_count: u32, result: &Result<(), ReportError>) {
        self.in_flight = false;
        match result {
            Ok(()) => {
                info!(visitor_count = visitor_count, "report_sent");
                self.last_acked = Some(visitor_count);
            }
            Err(e) => {
                warn!(visitor_count = visitor_count, error = %e, "report_failed");
            }
        }
    }
}
