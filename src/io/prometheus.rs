//! Prometheus metrics HTTP endpoint
//!
//! Exposes counter metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with device label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    device: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, device: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val:.6}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, device_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(2048);

    write_detection_metrics(&mut output, device_id, &summary);
    write_uplink_metrics(&mut output, device_id, &summary);

    output
}

fn write_detection_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_counter_samples_total",
        "Valid distance samples processed",
        MetricType::Counter,
        device,
        summary.samples_total,
    );
    write_metric(
        output,
        "visitor_counter_invalid_samples_total",
        "Samples rejected as noise or failed reads",
        MetricType::Counter,
        device,
        summary.invalid_samples_total,
    );
    write_gauge_f64(
        output,
        "visitor_counter_samples_per_sec",
        "Sample rate since the previous scrape",
        device,
        summary.samples_per_sec,
    );
    write_metric(
        output,
        "visitor_counter_entries_total",
        "Confirmed entries since start",
        MetricType::Counter,
        device,
        summary.entries_total,
    );
    write_metric(
        output,
        "visitor_counter_visitor_count",
        "Current persisted visitor count",
        MetricType::Gauge,
        device,
        summary.visitor_count,
    );
    write_metric(
        output,
        "visitor_counter_resets_accepted_total",
        "Count resets accepted",
        MetricType::Counter,
        device,
        summary.resets_accepted,
    );
    write_metric(
        output,
        "visitor_counter_resets_rejected_total",
        "Count resets rejected by the rate limit",
        MetricType::Counter,
        device,
        summary.resets_rejected,
    );
}

fn write_uplink_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_counter_reports_sent_total",
        "Reports acknowledged by the server",
        MetricType::Counter,
        device,
        summary.reports_sent,
    );
    write_metric(
        output,
        "visitor_counter_reports_failed_total",
        "Reports that failed or timed out",
        MetricType::Counter,
        device,
        summary.reports_failed,
    );
    write_metric(
        output,
        "visitor_counter_reports_skipped_total",
        "Report ticks skipped while a send was in flight",
        MetricType::Counter,
        device,
        summary.reports_skipped,
    );
    write_metric(
        output,
        "visitor_counter_time_syncs_ok_total",
        "Successful network time syncs",
        MetricType::Counter,
        device,
        summary.time_syncs_ok,
    );
    write_metric(
        output,
        "visitor_counter_time_syncs_failed_total",
        "Failed network time syncs",
        MetricType::Counter,
        device,
        summary.time_syncs_failed,
    );
    write_metric(
        output,
        "visitor_counter_storage_writes_total",
        "Bytes physically written to storage",
        MetricType::Counter,
        device,
        summary.storage_writes,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    device_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => (
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &device_id),
        ),
        (&Method::GET, "/health") => (StatusCode::OK, "text/plain", "ok".to_string()),
        _ => (StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    Ok(response)
}

/// Start the Prometheus metrics HTTP server. Port 0 disables it.
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    device_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if port == 0 {
        info!("prometheus_metrics_server_disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let device_id = Arc::new(device_id);

    info!(port = %port, device = %device_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let device_id = device_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let device_id = device_id.clone();
                                async move { handle_request(req, metrics, device_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
