use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::devices::{Calibration, ThSensor};
use crate::utils::error::ModbusError;

/// Highest unicast address on a Modbus serial line.
pub const MAX_DEVICE_ADDRESS: u8 = 247;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub sensor: SensorConfig,
    pub polling: PollingConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub stop_bits: StopBitsConfig,
    pub data_bits: u8,
    pub timeout_ms: u64,
    /// Extra wait between request and response read, for devices that need one.
    pub turnaround_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBitsConfig {
    One,
    Two,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub device_address: u8,
    pub start_register: u16,
    pub calibration: Calibration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub file: Option<String>,
    pub on_failure: FailurePolicy,
    pub temperature_band: BandThresholds,
    pub humidity_band: BandThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Console,
    Json,
    Csv,
}

/// What the console shows when a poll cycle yields no reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    KeepLast,
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let port = if cfg!(target_os = "windows") {
            "COM1"
        } else if cfg!(target_os = "macos") {
            "/dev/tty.usbserial-0001"
        } else {
            "/dev/ttyUSB0"
        };

        Self {
            port: port.to_string(),
            baud_rate: 9600,
            parity: ParityConfig::None,
            stop_bits: StopBitsConfig::One,
            data_bits: 8,
            timeout_ms: 1000,
            turnaround_delay_ms: 0,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device_address: 1,
            start_register: 0,
            calibration: Calibration::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 3000 }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Console,
            file: None,
            on_failure: FailurePolicy::KeepLast,
            temperature_band: BandThresholds { low: 20.0, high: 30.0 },
            humidity_band: BandThresholds { low: 30.0, high: 60.0 },
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(OutputFormat::Console),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(ModbusError::ConfigError(format!("Unknown output format: {}", other))),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("📄 Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModbusError> {
        let path = path.as_ref();
        // Create directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ModbusError::ConfigError(format!("Cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            ModbusError::ConfigError(format!("Cannot write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Command-line values win over whatever the file said.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), ModbusError> {
        if let Some(port) = matches.get_one::<String>("port") {
            self.serial.port = port.clone();
        }
        if let Some(baud) = matches.get_one::<u32>("baud") {
            self.serial.baud_rate = *baud;
        }
        if let Some(timeout) = matches.get_one::<u64>("timeout-ms") {
            self.serial.timeout_ms = *timeout;
        }
        if let Some(address) = matches.get_one::<u8>("address") {
            self.sensor.device_address = *address;
        }
        if let Some(interval) = matches.get_one::<u64>("interval-ms") {
            self.polling.interval_ms = *interval;
        }
        if let Some(format) = matches.get_one::<String>("format") {
            self.output.format = format.parse()?;
        }
        if let Some(file) = matches.get_one::<String>("output-file") {
            self.output.file = Some(file.clone());
        }

        debug!("Effective configuration: {:?}", self);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        let address = self.sensor.device_address;
        if address == 0 || address > MAX_DEVICE_ADDRESS {
            return Err(ModbusError::ConfigError(format!(
                "Device address {} out of range 1-{}",
                address, MAX_DEVICE_ADDRESS
            )));
        }
        if self.serial.baud_rate == 0 {
            return Err(ModbusError::ConfigError("Baud rate must be positive".to_string()));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(ModbusError::ConfigError(format!(
                "Data bits must be 5-8, got {}",
                self.serial.data_bits
            )));
        }
        if self.serial.timeout_ms == 0 {
            return Err(ModbusError::ConfigError("Read timeout must be positive".to_string()));
        }
        if self.polling.interval_ms == 0 {
            return Err(ModbusError::ConfigError("Polling interval must be positive".to_string()));
        }

        let cal = &self.sensor.calibration;
        if cal.temperature_raw_span == 0.0 || cal.humidity_divisor == 0.0 {
            return Err(ModbusError::ConfigError(
                "Calibration span and humidity divisor must be non-zero".to_string(),
            ));
        }

        for (name, band) in [
            ("temperature_band", &self.output.temperature_band),
            ("humidity_band", &self.output.humidity_band),
        ] {
            if band.low > band.high {
                return Err(ModbusError::ConfigError(format!(
                    "{}: low {} is above high {}",
                    name, band.low, band.high
                )));
            }
        }

        Ok(())
    }

    pub fn sensor(&self) -> ThSensor {
        ThSensor::new(self.sensor.device_address)
            .with_start_register(self.sensor.start_register)
            .with_calibration(self.sensor.calibration)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }
}
