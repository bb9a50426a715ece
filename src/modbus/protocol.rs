use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::crc::crc16_modbus;

pub const FUNCTION_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Set on the echoed function code when the device answers with an exception.
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const REQUEST_FRAME_LEN: usize = 8;

/// address + function + byte count + CRC
pub const RESPONSE_OVERHEAD: usize = 5;

/// address + function + exception code + CRC
pub const EXCEPTION_FRAME_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub device_address: u8,
    pub function_code: u8,
    pub start_address: u16,
    pub register_count: u16,
}

impl RegisterRequest {
    pub fn read_holding(device_address: u8, start_address: u16, register_count: u16) -> Self {
        Self {
            device_address,
            function_code: FUNCTION_READ_HOLDING_REGISTERS,
            start_address,
            register_count,
        }
    }

    pub fn to_frame(&self) -> RequestFrame {
        build_request_frame(
            self.device_address,
            self.function_code,
            self.start_address,
            self.register_count,
        )
    }

    /// Size of a normal (non-exception) answer to this request.
    pub fn expected_response_len(&self) -> usize {
        RESPONSE_OVERHEAD + self.register_count as usize * 2
    }
}

/// Eight bytes on the wire: big-endian request fields, then the CRC low byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame([u8; REQUEST_FRAME_LEN]);

impl RequestFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn crc(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl AsRef<[u8]> for RequestFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", bytes.join(" "))
    }
}

pub fn build_request_frame(
    device_address: u8,
    function_code: u8,
    start_address: u16,
    register_count: u16,
) -> RequestFrame {
    let mut bytes = [0u8; REQUEST_FRAME_LEN];
    bytes[0] = device_address;
    bytes[1] = function_code;
    bytes[2..4].copy_from_slice(&start_address.to_be_bytes());
    bytes[4..6].copy_from_slice(&register_count.to_be_bytes());

    // Modbus RTU sends the CRC low byte first even though the payload is big-endian
    let crc = crc16_modbus(&bytes[..6]);
    bytes[6..8].copy_from_slice(&crc.to_le_bytes());

    RequestFrame(bytes)
}

/// Exception codes a device may return in place of register data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetFailedToRespond,
            other => Self::Unknown(other),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> u8 {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailedToRespond => 0x0B,
            ExceptionCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
            Self::Acknowledge => "acknowledge",
            Self::ServerDeviceBusy => "server device busy",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailedToRespond => "gateway target failed to respond",
            Self::Unknown(_) => "unknown exception",
        };
        write!(f, "{} (0x{:02X})", name, u8::from(*self))
    }
}

/// Minimum bus silence (3.5 character times) that delimits RTU frames.
///
/// One character is 11 bits on the wire. Above 19200 baud the Modbus
/// serial line guide fixes the interval at 1.75 ms.
pub fn silent_interval(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate > 19_200 {
        Duration::from_micros(1_750)
    } else {
        Duration::from_micros(38_500_000 / baud_rate as u64)
    }
}
