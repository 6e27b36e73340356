//! SNTP client for wall-clock correction
//!
//! Protocol:
//! - One 48-byte request / 48-byte response over UDP
//! - Request byte 0: LI=3 (unsynchronized), VN=4, Mode=3 (client)
//! - Response transmit timestamp: bytes 40..44, seconds since 1900-01-01, big endian
//! - The 32-bit seconds field wraps in 2036; values below the 1970 offset are
//!   read as era 1, so results always fall between 1970 and 2106

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

pub const NTP_PACKET_SIZE: usize = 48;

/// Seconds between the NTP era start (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Length of one NTP era in seconds
const NTP_ERA_SECONDS: i64 = 1 << 32;

const CLIENT_HEADER: u8 = 0b1110_0011;
const MODE_MASK: u8 = 0b0000_0111;
const MODE_SERVER: u8 = 4;
const TRANSMIT_SECONDS_OFFSET: usize = 40;

/// Error type for time queries
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    Io(String),
    Timeout,
    /// Response was malformed or from a non-server peer
    InvalidResponse(&'static str),
    /// Stratum 0: server asked us to back off
    KissOfDeath,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Io(e) => write!(f, "ntp io error: {e}"),
            SyncError::Timeout => write!(f, "ntp query timed out"),
            SyncError::InvalidResponse(reason) => write!(f, "invalid ntp response: {reason}"),
            SyncError::KissOfDeath => write!(f, "ntp server sent kiss-of-death"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(e.to_string())
    }
}

/// Network time capability, returns UTC epoch seconds
#[async_trait]
pub trait TimeSource: Send + Sync {
    async fn query(&self) -> Result<i64, SyncError>;
}

pub fn build_request() -> [u8; NTP_PACKET_SIZE] {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    packet[0] = CLIENT_HEADER;
    packet[1] = 0; // Stratum
    packet[2] = 6; // Poll interval
    packet[3] = 0xEC; // Precision
    // Reference identifier
    packet[12] = 49;
    packet[13] = 0x4E;
    packet[14] = 49;
    packet[15] = 52;
    packet
}

pub fn parse_response(buf: &[u8]) -> Result<i64, SyncError> {
    if buf.len() < NTP_PACKET_SIZE {
        return Err(SyncError::InvalidResponse("short packet"));
    }
    if buf[0] & MODE_MASK != MODE_SERVER {
        return Err(SyncError::InvalidResponse("not a server reply"));
    }
    if buf[1] == 0 {
        return Err(SyncError::KissOfDeath);
    }

    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[TRANSMIT_SECONDS_OFFSET..TRANSMIT_SECONDS_OFFSET + 4]);
    let ntp_seconds = i64::from(u32::from_be_bytes(raw));
    if ntp_seconds == 0 {
        return Err(SyncError::InvalidResponse("zero transmit timestamp"));
    }

    Ok(unix_from_ntp(ntp_seconds))
}

/// Map era-relative NTP seconds to Unix seconds, pivoting on 1970
fn unix_from_ntp(ntp_seconds: i64) -> i64 {
    if ntp_seconds >= NTP_UNIX_OFFSET {
        ntp_seconds - NTP_UNIX_OFFSET
    } else {
        ntp_seconds + NTP_ERA_SECONDS - NTP_UNIX_OFFSET
    }
}

/// Minimal SNTP client
pub struct SntpClient {
    server: String,
}

impl SntpClient {
    pub fn new(server: &str) -> Self {
        Self { server: server.to_string() }
    }
}

#[async_trait]
impl TimeSource for SntpClient {
    async fn query(&self) -> Result<i64, SyncError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.server.as_str()).await?;
        socket.send(&build_request()).await?;

        let mut buf = [0u8; NTP_PACKET_SIZE];
        let n = socket.recv(&mut buf).await?;
        debug!(server = %self.server, bytes = n, "ntp_response_received");

        parse_response(&buf[..n])
    }
}
