//! Mock counting server
//!
//! Accepts visitor count reports for local testing without the real backend.
//!
//! Endpoints:
//! - POST /api/visitor-count  body: {device_id, visitor_count, timestamp, status, location}
//! - GET  /api/sensor-data    latest report per device
//!
//! Usage:
//!   cargo run --bin mock_server -- --port 1521
//!   cargo run --bin mock_server -- --port 1521 --reject-every 3

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock_server")]
#[command(about = "Mock counting server for local simulation")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "1521")]
    port: u16,

    /// Answer every Nth report with 500 (0 = never)
    #[arg(long, default_value = "0")]
    reject_every: u64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct VisitorReport {
    device_id: String,
    visitor_count: u32,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default = "default_location")]
    location: String,
}

fn default_status() -> String {
    "active".to_string()
}

fn default_location() -> String {
    "unknown".to_string()
}

struct State {
    latest: Mutex<HashMap<String, VisitorReport>>,
    received: AtomicU64,
    reject_every: u64,
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

async fn handle_report(req: Request<hyper::body::Incoming>, state: &State) -> Response<Full<Bytes>> {
    let n = state.received.fetch_add(1, Ordering::Relaxed) + 1;

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "report_body_read_failed");
            return json_response(StatusCode::BAD_REQUEST, r#"{"status":"error"}"#.to_string());
        }
    };

    let report: VisitorReport = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "report_invalid_json");
            let body = serde_json::json!({"status": "error", "message": e.to_string()});
            return json_response(StatusCode::BAD_REQUEST, body.to_string());
        }
    };

    if state.reject_every > 0 && n % state.reject_every == 0 {
        warn!(n = n, device_id = %report.device_id, "report_rejected_on_purpose");
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"status":"error","message":"simulated failure"}"#.to_string(),
        );
    }

    info!(
        n = n,
        device_id = %report.device_id,
        visitor_count = report.visitor_count,
        timestamp = ?report.timestamp,
        status = %report.status,
        location = %report.location,
        "report_received"
    );
    state.latest.lock().insert(report.device_id.clone(), report);

    json_response(
        StatusCode::OK,
        r#"{"status":"success","message":"Data received"}"#.to_string(),
    )
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<State>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/api/visitor-count") => handle_report(req, &state).await,
        (&Method::GET, "/api/sensor-data") => {
            let latest: Vec<VisitorReport> = state.latest.lock().values().cloned().collect();
            let body = serde_json::to_string(&latest).unwrap_or_else(|_| "[]".to_string());
            json_response(StatusCode::OK, body)
        }
        _ => json_response(StatusCode::NOT_FOUND, r#"{"status":"error"}"#.to_string()),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let state = Arc::new(State {
        latest: Mutex::new(HashMap::new()),
        received: AtomicU64::new(0),
        reject_every: args.reject_every,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %args.port, reject_every = args.reject_every, "mock_server_started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(peer = %peer, error = %e, "mock_server_http_error");
            }
        });
    }
}
