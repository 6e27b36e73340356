//! Report uplink to the counting server
//!
//! POSTs the current cumulative count as JSON to the configured endpoint.
//! The server upserts the sensor row and appends a visitor sample per request.

use crate::domain::types::PendingReport;
use crate::infra::config::Config;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

/// Error type for report delivery
#[derive(Debug, Clone, PartialEq)]
pub enum ReportError {
    /// Connection or transport failure
    Transport(String),
    /// Server answered with a non-success status
    Rejected(u16),
    /// No answer within the send timeout
    Timeout,
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Transport(e) => write!(f, "transport error: {e}"),
            ReportError::Rejected(status) => write!(f, "server rejected report with status {status}"),
            ReportError::Timeout => write!(f, "report send timed out"),
        }
    }
}

impl std::error::Error for ReportError {}

/// Network-send capability for reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send(&self, report: &PendingReport) -> Result<(), ReportError>;
}

/// HTTP reporter backed by a pooled reqwest client
pub struct HttpReporter {
    url: String,
    client: reqwest::Client,
}

impl HttpReporter {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(config.server_timeout())
            .connect_timeout(config.server_timeout())
            .http1_only()
            .build()?;

        let url = config.report_url();
        info!(url = %url, "http_reporter_initialized");
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReportSink for HttpReporter {
    async fn send(&self, report: &PendingReport) -> Result<(), ReportError> {
        let start = Instant::now();

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(report)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReportError::Timeout
                } else {
                    ReportError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(status = %status.as_u16(), latency_ms = %latency_ms, "report_response");

        if status.is_success() {
            Ok(())
        } else {
            Err(ReportError::Rejected(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn report() -> PendingReport {
        PendingReport {
            device_id: "ARDUINO_001".to_string(),
            visitor_count: 3,
            timestamp: "2026-10-18T15:00:00+03:00".to_string(),
            epoch: 1_760_788_800,
            status: "active",
            location: "unknown".to_string(),
        }
    }

    /// Accept one connection, capture the request, answer with `status_line`
    async fn one_shot_server(status_line: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = String::new();
            // Read until the JSON body has arrived
            while !request.contains('}') {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });
        (port, handle)
    }

    fn reporter_for(port: u16) -> HttpReporter {
        let client = reqwest::Client::builder().http1_only().build().unwrap();
        HttpReporter { url: format!("http://127.0.0.1:{port}/api/visitor-count"), client }
    }

    #[tokio::test]
    async fn test_report_posted_as_json() {
        let (port, server) = one_shot_server("HTTP/1.1 200 OK").await;
        let reporter = reporter_for(port);

        assert_eq!(reporter.send(&report()).await, Ok(()));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/visitor-count"));
        assert!(request.contains("\"device_id\":\"ARDUINO_001\""));
        assert!(request.contains("\"visitor_count\":3"));
    }

    #[tokio::test]
    async fn test_server_error_is_rejected() {
        let (port, _server) = one_shot_server("HTTP/1.1 400 Bad Request").await;
        let reporter = reporter_for(port);

        assert_eq!(reporter.send(&report()).await, Err(ReportError::Rejected(400)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let reporter = reporter_for(port);
        assert!(matches!(reporter.send(&report()).await, Err(ReportError::Transport(_))));
    }

    #[test]
    fn test_reporter_uses_config_url() {
        let reporter = HttpReporter::new(&Config::default()).unwrap();
        assert_eq!(reporter.url(), "http://172.20.10.4:1521/api/visitor-count");
    }
}
