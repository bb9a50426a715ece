//! Modbus RTU polling for RS-485 temperature/humidity sensors
//!
//! This library builds read-holding-registers requests, verifies and decodes
//! the sensor's answers into calibrated readings, and drives the periodic
//! polling loop that hands each reading (or failure) to a consumer.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use devices::{decode_response, Calibration, SensorReading, ThSensor};
pub use modbus::{build_request_frame, crc16_modbus, RegisterRequest, RequestFrame, SerialTransport, Transport};
pub use output::{DataFormatter, DataSender, OutputConsumer};
pub use services::{PollStats, Poller, PollerHandle, ReadingConsumer};
pub use utils::error::ModbusError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
