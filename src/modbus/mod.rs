pub mod client;
pub mod crc;
pub mod protocol;

pub use client::{describe_available_ports, SerialTransport, Transport};
pub use crc::{crc16_modbus, verify_crc};
pub use protocol::{build_request_frame, ExceptionCode, RegisterRequest, RequestFrame};
