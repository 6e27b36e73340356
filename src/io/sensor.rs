//! Distance sensor capability and adapters
//!
//! Serial protocol (UART ultrasonic module, 9600 8N1, streaming mode):
//! - Frame: 4 bytes [0xFF][DATA_H][DATA_L][SUM]
//! - Distance in millimetres: DATA_H * 256 + DATA_L
//! - SUM: low byte of 0xFF + DATA_H + DATA_L

use crate::domain::types::DistanceCm;
use crate::infra::config::Config;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

// Protocol constants
const FRAME_HEADER: u8 = 0xFF;
const FRAME_LEN: usize = 4;

/// Maximum read attempts per measurement before giving up
const MAX_READ_ATTEMPTS: usize = 8;

/// Error type for sensor reads
#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    /// No echo / no valid frame this cycle
    NoEcho,
    /// Port could not be opened
    Unavailable(String),
    /// Read failed; the port will be reopened next cycle
    Io(String),
    /// Read did not complete in time
    Timeout,
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::NoEcho => write!(f, "no echo"),
            SensorError::Unavailable(e) => write!(f, "sensor unavailable: {e}"),
            SensorError::Io(e) => write!(f, "sensor read error: {e}"),
            SensorError::Timeout => write!(f, "sensor read timed out"),
        }
    }
}

impl std::error::Error for SensorError {}

/// One distance sample per call
#[async_trait]
pub trait DistanceSensor: Send {
    async fn measure(&mut self) -> Result<DistanceCm, SensorError>;
}

#[inline]
fn frame_checksum(high: u8, low: u8) -> u8 {
    FRAME_HEADER.wrapping_add(high).wrapping_add(low)
}

/// Consume all complete frames in `buffer` and return the newest valid
/// distance in millimetres. Partial trailing frames stay buffered.
pub fn extract_latest_mm(buffer: &mut BytesMut) -> Option<u32> {
    let mut latest = None;

    loop {
        // Synchronize to the header byte
        match buffer.iter().position(|&b| b == FRAME_HEADER) {
            Some(0) => {}
            Some(idx) => {
                debug!(discarded = idx, "sensor_sync_discarded_bytes");
                buffer.advance(idx);
            }
            None => {
                buffer.clear();
                break;
            }
        }

        if buffer.len() < FRAME_LEN {
            break;
        }

        let (high, low, sum) = (buffer[1], buffer[2], buffer[3]);
        if sum == frame_checksum(high, low) {
            latest = Some(u32::from(high) << 8 | u32::from(low));
            buffer.advance(FRAME_LEN);
        } else {
            debug!(raw = %hex::encode(&buffer[..FRAME_LEN]), "sensor_checksum_failed");
            // Skip this header and resync on the next one
            buffer.advance(1);
        }
    }

    latest
}

/// Millimetres to whole centimetres, rounded to nearest
#[inline]
pub fn mm_to_cm(mm: u32) -> DistanceCm {
    DistanceCm((mm + 5) / 10)
}

/// UART ultrasonic range finder
pub struct SerialDistanceSensor {
    device: String,
    baud: u32,
    port: Option<tokio_serial::SerialStream>,
    /// Bytes carried over between reads; frames can arrive split
    buffer: BytesMut,
}

impl SerialDistanceSensor {
    pub fn new(config: &Config) -> Self {
        Self {
            device: config.sensor_device().to_string(),
            baud: config.sensor_baud(),
            port: None,
            buffer: BytesMut::with_capacity(64),
        }
    }

    fn ensure_open(&mut self) -> Result<&mut tokio_serial::SerialStream, SensorError> {
        if self.port.is_none() {
            let port = tokio_serial::new(&self.device, self.baud)
                .timeout(Duration::from_millis(100))
                .open_native_async()
                .map_err(|e| {
                    error!(device = %self.device, error = %e, "sensor_port_open_failed");
                    SensorError::Unavailable(e.to_string())
                })?;
            info!(device = %self.device, baud = %self.baud, "sensor_port_opened");
            self.buffer.clear();
            self.port = Some(port);
        }

        self.port.as_mut().ok_or_else(|| SensorError::Unavailable(self.device.clone()))
    }
}

#[async_trait]
impl DistanceSensor for SerialDistanceSensor {
    async fn measure(&mut self) -> Result<DistanceCm, SensorError> {
        let mut temp_buf = [0u8; 64];

        for _ in 0..MAX_READ_ATTEMPTS {
            let port = self.ensure_open()?;
            match port.read(&mut temp_buf).await {
                Ok(0) => {}
                Ok(n) => {
                    self.buffer.extend_from_slice(&temp_buf[..n]);
                    if let Some(mm) = extract_latest_mm(&mut self.buffer) {
                        return Ok(mm_to_cm(mm));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!(error = %e, "sensor_read_error");
                    self.port = None;
                    return Err(SensorError::Io(e.to_string()));
                }
            }
        }

        Err(SensorError::NoEcho)
    }
}

/// Deterministic sensor that cycles through a fixed pattern.
/// A 0 entry simulates a missing echo.
pub struct SimulatedSensor {
    pattern: Vec<u32>,
    pos: usize,
}

impl SimulatedSensor {
    pub fn from_pattern(pattern: Vec<u32>) -> Self {
        Self { pattern, pos: 0 }
    }

    /// Empty doorway with a visitor passing roughly every ten seconds,
    /// including a noise spike and a dropped echo
    pub fn walkthrough() -> Self {
        let mut pattern = vec![240; 40];
        pattern.extend([235, 5, 238, 0, 242]);
        pattern.extend([130, 125, 128, 131, 127, 126, 133]);
        pattern.extend(vec![245; 3]);
        Self::from_pattern(pattern)
    }
}

#[async_trait]
impl DistanceSensor for SimulatedSensor {
    async fn measure(&mut self) -> Result<DistanceCm, SensorError> {
        if self.pattern.is_empty() {
            return Err(SensorError::NoEcho);
        }
        let value = self.pattern[self.pos % self.pattern.len()];
        self.pos += 1;
        match value {
            0 => Err(SensorError::NoEcho),
            cm => Ok(DistanceCm(cm)),
        }
    }
}
