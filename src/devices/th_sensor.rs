use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::modbus::crc::{crc16_modbus, verify_crc};
use crate::modbus::protocol::{
    ExceptionCode, RegisterRequest, EXCEPTION_FLAG, EXCEPTION_FRAME_LEN,
};
use crate::utils::error::ModbusError;

/// Length of the answer to a two-register read.
pub const RESPONSE_FRAME_LEN: usize = 9;

pub const TEMPERATURE_REGISTER: u16 = 0;
pub const REGISTER_COUNT: u16 = 2;

/// Linear mapping from raw register values to engineering units.
///
/// The defaults map a raw temperature of 0..=1650 onto -40..=125 °C and
/// read humidity in tenths of a percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub temperature_raw_span: f64,
    pub temperature_span_celsius: f64,
    pub temperature_offset_celsius: f64,
    pub humidity_divisor: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            temperature_raw_span: 1650.0,
            temperature_span_celsius: 165.0,
            temperature_offset_celsius: -40.0,
            humidity_divisor: 10.0,
        }
    }
}

impl Calibration {
    pub fn temperature_celsius(&self, raw: u16) -> f64 {
        (raw as f64 / self.temperature_raw_span) * self.temperature_span_celsius
            + self.temperature_offset_celsius
    }

    pub fn humidity_percent(&self, raw_tenths: u16) -> f64 {
        raw_tenths as f64 / self.humidity_divisor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_address: u8,
    pub timestamp: DateTime<Utc>,
    pub temperature_celsius: f64,
    pub relative_humidity_percent: f64,
    pub raw_temperature: u16,
    pub raw_humidity_tenths: u16,
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Temperature: {:.1}°C, Humidity: {:.1}%",
            self.temperature_celsius, self.relative_humidity_percent
        )
    }
}

/// The sensor as seen from the bus: where its registers live and how to scale them.
#[derive(Debug, Clone, PartialEq)]
pub struct ThSensor {
    pub address: u8,
    pub start_register: u16,
    pub calibration: Calibration,
}

impl ThSensor {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            start_register: TEMPERATURE_REGISTER,
            calibration: Calibration::default(),
        }
    }

    pub fn with_start_register(mut self, start_register: u16) -> Self {
        self.start_register = start_register;
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn request(&self) -> RegisterRequest {
        RegisterRequest::read_holding(self.address, self.start_register, REGISTER_COUNT)
    }

    pub fn decode(&self, frame: &[u8], timestamp: DateTime<Utc>) -> Result<SensorReading, ModbusError> {
        decode_response_at(frame, &self.calibration, timestamp)
    }
}

pub fn decode_response(frame: &[u8], calibration: &Calibration) -> Result<SensorReading, ModbusError> {
    decode_response_at(frame, calibration, Utc::now())
}

pub fn decode_response_default(frame: &[u8]) -> Result<SensorReading, ModbusError> {
    decode_response(frame, &Calibration::default())
}

/// Validates a read-holding-registers answer and scales its two registers.
///
/// Checks run in order and stop at the first failure: exception frame,
/// length, checksum. Bytes past the ninth are ignored.
pub fn decode_response_at(
    frame: &[u8],
    calibration: &Calibration,
    timestamp: DateTime<Utc>,
) -> Result<SensorReading, ModbusError> {
    // Exception answers are only five bytes long, so look for one before the length rule
    if frame.len() >= EXCEPTION_FRAME_LEN
        && frame[1] & EXCEPTION_FLAG != 0
        && verify_crc(&frame[..EXCEPTION_FRAME_LEN])
    {
        return Err(ModbusError::DeviceException(ExceptionCode::from(frame[2])));
    }

    if frame.len() < RESPONSE_FRAME_LEN {
        return Err(ModbusError::Truncated {
            expected: RESPONSE_FRAME_LEN,
            actual: frame.len(),
        });
    }

    let expected = crc16_modbus(&frame[..7]);
    let received = u16::from_le_bytes([frame[7], frame[8]]);
    if expected != received {
        return Err(ModbusError::ChecksumMismatch { expected, received });
    }

    if frame[1] & EXCEPTION_FLAG != 0 {
        return Err(ModbusError::DeviceException(ExceptionCode::from(frame[2])));
    }

    if frame[2] as usize != REGISTER_COUNT as usize * 2 {
        debug!("Unexpected byte count {} in response from device {}", frame[2], frame[0]);
    }

    let raw_temperature = u16::from_be_bytes([frame[3], frame[4]]);
    let raw_humidity_tenths = u16::from_be_bytes([frame[5], frame[6]]);

    Ok(SensorReading {
        device_address: frame[0],
        timestamp,
        temperature_celsius: calibration.temperature_celsius(raw_temperature),
        relative_humidity_percent: calibration.humidity_percent(raw_humidity_tenths),
        raw_temperature,
        raw_humidity_tenths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn with_crc(payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&crc16_modbus(payload).to_le_bytes());
        frame
    }

    fn response(raw_temperature: u16, raw_humidity: u16) -> Vec<u8> {
        let t = raw_temperature.to_be_bytes();
        let h = raw_humidity.to_be_bytes();
        with_crc(&[0x01, 0x03, 0x04, t[0], t[1], h[0], h[1]])
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_end_to_end_fifty_fifty() {
        let frame = [0x01, 0x03, 0x04, 0x03, 0x84, 0x01, 0xF4, 0xBA, 0x49];
        let reading = decode_response_default(&frame).unwrap();

        assert_eq!(reading.device_address, 1);
        assert_eq!(reading.raw_temperature, 900);
        assert_eq!(reading.raw_humidity_tenths, 500);
        assert!((reading.temperature_celsius - 50.0).abs() < 1e-9);
        assert!((reading.relative_humidity_percent - 50.0).abs() < 1e-9);
        assert_eq!(reading.to_string(), "Temperature: 50.0°C, Humidity: 50.0%");
    }

    #[test]
    fn test_scaling_boundaries() {
        let cal = Calibration::default();
        assert_eq!(cal.temperature_celsius(0), -40.0);
        assert!((cal.temperature_celsius(1650) - 125.0).abs() < 1e-9);
        assert_eq!(cal.humidity_percent(1000), 100.0);

        let reading = decode_response_default(&response(0, 1000)).unwrap();
        assert_eq!(reading.temperature_celsius, -40.0);
        assert_eq!(reading.relative_humidity_percent, 100.0);
    }

    #[test]
    fn test_custom_calibration() {
        let cal = Calibration {
            temperature_raw_span: 1000.0,
            temperature_span_celsius: 100.0,
            temperature_offset_celsius: 0.0,
            humidity_divisor: 100.0,
        };
        let reading = decode_response(&response(250, 4550), &cal).unwrap();
        assert!((reading.temperature_celsius - 25.0).abs() < 1e-9);
        assert!((reading.relative_humidity_percent - 45.5).abs() < 1e-9);
    }

    #[test]
    fn test_every_short_length_is_truncated() {
        let full = response(900, 500);
        for len in 0..RESPONSE_FRAME_LEN {
            match decode_response_default(&full[..len]) {
                Err(ModbusError::Truncated { expected, actual }) => {
                    assert_eq!(expected, RESPONSE_FRAME_LEN);
                    assert_eq!(actual, len);
                }
                other => panic!("length {}: unexpected {:?}", len, other),
            }
        }
    }

    #[test]
    fn test_corrupted_byte_is_checksum_mismatch() {
        let mut frame = response(900, 500);
        frame[4] ^= 0x01;
        match decode_response_default(&frame) {
            Err(ModbusError::ChecksumMismatch { expected, received }) => {
                assert_ne!(expected, received);
                assert_eq!(received, u16::from_le_bytes([frame[7], frame[8]]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_swapped_checksum_bytes_rejected() {
        let mut frame = response(900, 500);
        frame.swap(7, 8);
        assert!(matches!(
            decode_response_default(&frame),
            Err(ModbusError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_exception_frame_is_device_exception() {
        let frame = with_crc(&[0x01, 0x83, 0x02]);
        assert_eq!(frame, vec![0x01, 0x83, 0x02, 0xC0, 0xF1]);
        match decode_response_default(&frame) {
            Err(ModbusError::DeviceException(code)) => {
                assert_eq!(code, ExceptionCode::IllegalDataAddress)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exception_flag_with_bad_crc_is_truncated() {
        assert!(matches!(
            decode_response_default(&[0x01, 0x83, 0x02, 0x00, 0x00]),
            Err(ModbusError::Truncated { actual: 5, .. })
        ));
    }

    #[test]
    fn test_nine_byte_exception_is_not_read_as_data() {
        let frame = with_crc(&[0x01, 0x83, 0x04, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(
            decode_response_default(&frame),
            Err(ModbusError::DeviceException(ExceptionCode::ServerDeviceFailure))
        ));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut frame = response(900, 500);
        frame.extend_from_slice(&[0xAA, 0xBB]);
        let reading = decode_response_default(&frame).unwrap();
        assert_eq!(reading.raw_temperature, 900);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let cal = Calibration::default();
        for (t, h) in [(0u16, 0u16), (900, 500), (1650, 1000), (0xFFFF, 0xFFFF), (1234, 321)] {
            let frame = response(t, h);
            let first = decode_response_at(&frame, &cal, fixed_time()).unwrap();
            let second = decode_response_at(&frame, &cal, fixed_time()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_sensor_request_and_decode() {
        let sensor = ThSensor::new(7).with_start_register(0x10);
        let request = sensor.request();
        assert_eq!(request.device_address, 7);
        assert_eq!(request.start_address, 0x10);
        assert_eq!(request.register_count, 2);
        assert_eq!(request.expected_response_len(), RESPONSE_FRAME_LEN);

        let reading = sensor.decode(&response(900, 500), fixed_time()).unwrap();
        assert_eq!(reading.timestamp, fixed_time());
    }
}
