use thiserror::Error;

use crate::modbus::protocol::ExceptionCode;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("No response within the read timeout")]
    TransportTimeout,

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("CRC checksum mismatch: computed 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch { expected: u16, received: u16 },

    #[error("Device exception: {0}")]
    DeviceException(ExceptionCode),

    #[error("Transport failure: {0}")]
    TransportFatal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Output error: {0}")]
    OutputError(String),
}

impl ModbusError {
    /// Only a dead transport ends polling; everything else is retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModbusError::TransportFatal(_))
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ModbusError {
    fn from(err: toml::ser::Error) -> Self {
        ModbusError::SerializationError(format!("TOML error: {}", err))
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        ModbusError::ConnectionError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_fatal_is_fatal() {
        assert!(ModbusError::TransportFatal("gone".into()).is_fatal());
        assert!(!ModbusError::TransportTimeout.is_fatal());
        assert!(!ModbusError::Truncated { expected: 9, actual: 3 }.is_fatal());
        assert!(!ModbusError::ChecksumMismatch { expected: 1, received: 2 }.is_fatal());
        assert!(!ModbusError::DeviceException(ExceptionCode::ServerDeviceBusy).is_fatal());
    }

    #[test]
    fn test_checksum_message_is_hex() {
        let err = ModbusError::ChecksumMismatch { expected: 0x0BC4, received: 0x00FF };
        assert_eq!(
            err.to_string(),
            "CRC checksum mismatch: computed 0x0BC4, received 0x00FF"
        );
    }
}
