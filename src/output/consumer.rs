use async_trait::async_trait;
use log::{error, info};

use super::formatters::{Bands, ConsoleFormatter, CsvFormatter, DataFormatter, JsonFormatter};
use super::senders::{ConsoleSender, DataSender, FileSender};
use crate::config::{FailurePolicy, OutputConfig, OutputFormat};
use crate::devices::SensorReading;
use crate::services::poller::ReadingConsumer;
use crate::utils::error::ModbusError;

/// Formats every poll outcome and fans it out to the configured senders.
pub struct OutputConsumer {
    formatter: Box<dyn DataFormatter>,
    senders: Vec<Box<dyn DataSender>>,
    on_failure: FailurePolicy,
    last_reading: Option<SensorReading>,
}

impl OutputConsumer {
    pub fn new(formatter: Box<dyn DataFormatter>, on_failure: FailurePolicy) -> Self {
        Self {
            formatter,
            senders: Vec::new(),
            on_failure,
            last_reading: None,
        }
    }

    /// Console output plus an optional append-only file, as configured.
    pub fn from_config(config: &OutputConfig) -> Self {
        let bands = Bands {
            temperature: config.temperature_band,
            humidity: config.humidity_band,
        };
        let formatter: Box<dyn DataFormatter> = match config.format {
            OutputFormat::Console => Box::new(ConsoleFormatter::new(bands)),
            OutputFormat::Json => Box::new(JsonFormatter::new(bands)),
            OutputFormat::Csv => Box::new(CsvFormatter),
        };

        let mut consumer = Self::new(formatter, config.on_failure);
        consumer.add_sender(Box::new(ConsoleSender));
        if let Some(path) = &config.file {
            consumer.add_sender(Box::new(FileSender::new(path)));
        }
        consumer
    }

    pub fn add_sender(&mut self, sender: Box<dyn DataSender>) {
        info!("📤 Added {} sender to {}", sender.sender_type(), sender.destination());
        self.senders.push(sender);
    }

    pub fn last_reading(&self) -> Option<&SensorReading> {
        self.last_reading.as_ref()
    }

    pub async fn send_header(&self) {
        let header = self.formatter.format_header();
        if !header.is_empty() {
            self.broadcast(&header).await;
        }
    }

    async fn broadcast(&self, data: &str) {
        for sender in &self.senders {
            if let Err(e) = sender.send(data).await {
                error!(
                    "❌ Failed to send data via {} to {}: {}",
                    sender.sender_type(),
                    sender.destination(),
                    e
                );
            }
        }
    }
}

#[async_trait]
impl ReadingConsumer for OutputConsumer {
    async fn on_reading(&mut self, reading: &SensorReading) {
        let line = self.formatter.format_reading(reading);
        self.broadcast(&line).await;
        self.last_reading = Some(reading.clone());
    }

    async fn on_failure(&mut self, error: &ModbusError) {
        let last = match self.on_failure {
            FailurePolicy::KeepLast => self.last_reading.as_ref(),
            FailurePolicy::NoData => None,
        };
        let line = self.formatter.format_failure(error, last);
        self.broadcast(&line).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandThresholds;
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MemorySender {
        lines: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DataSender for MemorySender {
        async fn send(&self, data: &str) -> Result<(), ModbusError> {
            self.lines.lock().unwrap().push(data.to_string());
            Ok(())
        }

        fn sender_type(&self) -> &str {
            "memory"
        }

        fn destination(&self) -> &str {
            "vec"
        }
    }

    struct FailingSender;

    #[async_trait]
    impl DataSender for FailingSender {
        async fn send(&self, _data: &str) -> Result<(), ModbusError> {
            Err(ModbusError::OutputError("disk full".to_string()))
        }

        fn sender_type(&self) -> &str {
            "failing"
        }

        fn destination(&self) -> &str {
            "nowhere"
        }
    }

    fn console() -> Box<dyn DataFormatter> {
        Box::new(ConsoleFormatter::new(Bands {
            temperature: BandThresholds { low: 20.0, high: 30.0 },
            humidity: BandThresholds { low: 30.0, high: 60.0 },
        }))
    }

    fn reading() -> SensorReading {
        SensorReading {
            device_address: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            temperature_celsius: 24.5,
            relative_humidity_percent: 41.0,
            raw_temperature: 1065,
            raw_humidity_tenths: 410,
        }
    }

    #[tokio::test]
    async fn test_keep_last_shows_previous_values() {
        let memory = MemorySender::default();
        let mut consumer = OutputConsumer::new(console(), FailurePolicy::KeepLast);
        consumer.add_sender(Box::new(memory.clone()));

        consumer.on_failure(&ModbusError::TransportTimeout).await;
        consumer.on_reading(&reading()).await;
        consumer.on_failure(&ModbusError::TransportTimeout).await;

        let lines = memory.lines.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("(no data)"));
        assert!(lines[1].contains("Temperature: 24.5°C, Humidity: 41.0%"));
        assert!(lines[2].ends_with("(showing last: Temperature: 24.5°C, Humidity: 41.0%)"));
        assert_eq!(consumer.last_reading(), Some(&reading()));
    }

    #[tokio::test]
    async fn test_no_data_policy_hides_previous_values() {
        let memory = MemorySender::default();
        let mut consumer = OutputConsumer::new(console(), FailurePolicy::NoData);
        consumer.add_sender(Box::new(memory.clone()));

        consumer.on_reading(&reading()).await;
        consumer.on_failure(&ModbusError::TransportTimeout).await;

        let lines = memory.lines.lock().unwrap();
        assert!(lines[1].ends_with("(no data)"));
    }

    #[tokio::test]
    async fn test_failing_sender_does_not_block_others() {
        let memory = MemorySender::default();
        let mut consumer = OutputConsumer::new(Box::new(CsvFormatter), FailurePolicy::KeepLast);
        consumer.add_sender(Box::new(FailingSender));
        consumer.add_sender(Box::new(memory.clone()));

        consumer.send_header().await;
        consumer.on_reading(&reading()).await;

        let lines = memory.lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,"));
        assert!(lines[1].ends_with(",ok"));
    }

    #[tokio::test]
    async fn test_json_has_no_header_line() {
        let memory = MemorySender::default();
        let config = OutputConfig {
            format: OutputFormat::Json,
            ..OutputConfig::default()
        };
        let mut consumer = OutputConsumer::from_config(&config);
        consumer.add_sender(Box::new(memory.clone()));

        consumer.send_header().await;
        assert!(memory.lines.lock().unwrap().is_empty());
    }
}
