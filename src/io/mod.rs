//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `sensor` - Ultrasonic distance sensor (serial) and simulated pattern source
//! - `storage` - Byte-addressed non-volatile storage (EEPROM image)
//! - `report` - HTTP uplink for visitor count reports
//! - `ntp` - SNTP client for wall-clock correction
//! - `commands` - TCP listener for RESET / STATUS commands
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod commands;
pub mod ntp;
pub mod prometheus;
pub mod report;
pub mod sensor;
pub mod storage;

// Re-export commonly used types
pub use commands::{start_command_listener, Command, CommandReply, CommandRequest, CommandSender};
pub use ntp::{SntpClient, SyncError, TimeSource};
pub use report::{HttpReporter, ReportError, ReportSink};
pub use sensor::{DistanceSensor, SensorError, SerialDistanceSensor, SimulatedSensor};
pub use storage::{FileNvStorage, MemNvStorage, NvStorage, StorageError};
