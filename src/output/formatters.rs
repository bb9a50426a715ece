use chrono::Utc;
use serde_json::{json, Value};
use std::fmt;

use crate::config::BandThresholds;
use crate::devices::SensorReading;
use crate::utils::error::ModbusError;

/// Where a value sits relative to its comfort band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Low,
    Normal,
    High,
}

impl Band {
    pub fn classify(value: f64, thresholds: &BandThresholds) -> Self {
        if value < thresholds.low {
            Band::Low
        } else if value > thresholds.high {
            Band::High
        } else {
            Band::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Low => "low",
            Band::Normal => "normal",
            Band::High => "high",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub temperature: BandThresholds,
    pub humidity: BandThresholds,
}

impl Bands {
    pub fn classify(&self, reading: &SensorReading) -> (Band, Band) {
        (
            Band::classify(reading.temperature_celsius, &self.temperature),
            Band::classify(reading.relative_humidity_percent, &self.humidity),
        )
    }
}

pub trait DataFormatter: Send + Sync {
    fn format_reading(&self, reading: &SensorReading) -> String;

    /// `last` is the most recent good reading when the caller wants it kept on screen.
    fn format_failure(&self, error: &ModbusError, last: Option<&SensorReading>) -> String;

    fn format_header(&self) -> String;
}

pub struct ConsoleFormatter {
    bands: Bands,
}

impl ConsoleFormatter {
    pub fn new(bands: Bands) -> Self {
        Self { bands }
    }
}

impl DataFormatter for ConsoleFormatter {
    fn format_reading(&self, reading: &SensorReading) -> String {
        let (t_band, h_band) = self.bands.classify(reading);
        format!(
            "[{}] {} (temperature {}, humidity {})",
            reading.timestamp.format("%H:%M:%S"),
            reading,
            t_band,
            h_band
        )
    }

    fn format_failure(&self, error: &ModbusError, last: Option<&SensorReading>) -> String {
        match last {
            Some(reading) => format!(
                "Failed to read data from sensor: {} (showing last: {})",
                error, reading
            ),
            None => format!("Failed to read data from sensor: {} (no data)", error),
        }
    }

    fn format_header(&self) -> String {
        format!("🚀 RS-485 Sensor Monitor - {}", Utc::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

pub struct JsonFormatter {
    bands: Bands,
}

impl JsonFormatter {
    pub fn new(bands: Bands) -> Self {
        Self { bands }
    }

    fn reading_value(&self, reading: &SensorReading) -> Value {
        let (t_band, h_band) = self.bands.classify(reading);
        json!({
            "device_address": reading.device_address,
            "timestamp": reading.timestamp.to_rfc3339(),
            "temperature_celsius": reading.temperature_celsius,
            "relative_humidity_percent": reading.relative_humidity_percent,
            "raw_temperature": reading.raw_temperature,
            "raw_humidity_tenths": reading.raw_humidity_tenths,
            "temperature_band": t_band.as_str(),
            "humidity_band": h_band.as_str(),
        })
    }
}

impl DataFormatter for JsonFormatter {
    fn format_reading(&self, reading: &SensorReading) -> String {
        let mut value = self.reading_value(reading);
        value["status"] = json!("ok");
        value.to_string()
    }

    fn format_failure(&self, error: &ModbusError, last: Option<&SensorReading>) -> String {
        let result = json!({
            "status": "error",
            "timestamp": Utc::now().to_rfc3339(),
            "error": error.to_string(),
            "last": last.map(|reading| self.reading_value(reading)),
        });
        result.to_string()
    }

    fn format_header(&self) -> String {
        String::new() // JSON lines don't need a header
    }
}

pub struct CsvFormatter;

pub const CSV_HEADER: &str =
    "timestamp,device_address,temperature_celsius,relative_humidity_percent,raw_temperature,raw_humidity_tenths,status";

impl CsvFormatter {
    fn row(reading: &SensorReading, status: &str) -> String {
        format!(
            "{},{},{:.1},{:.1},{},{},{}",
            reading.timestamp.to_rfc3339(),
            reading.device_address,
            reading.temperature_celsius,
            reading.relative_humidity_percent,
            reading.raw_temperature,
            reading.raw_humidity_tenths,
            status
        )
    }
}

impl DataFormatter for CsvFormatter {
    fn format_reading(&self, reading: &SensorReading) -> String {
        Self::row(reading, "ok")
    }

    fn format_failure(&self, error: &ModbusError, last: Option<&SensorReading>) -> String {
        let status = format!("error: {}", error).replace(',', ";");
        match last {
            Some(reading) => Self::row(reading, &format!("stale; {}", status)),
            None => format!("{},,,,,,{}", Utc::now().to_rfc3339(), status),
        }
    }

    fn format_header(&self) -> String {
        CSV_HEADER.to_string()
    }
}
