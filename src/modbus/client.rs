use async_trait::async_trait;
use log::{debug, error, info};
use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::protocol::silent_interval;
use crate::config::settings::{ParityConfig, SerialConfig, StopBitsConfig};
use crate::utils::error::ModbusError;

/// Raw byte channel to the bus. `read` may return fewer bytes than asked for,
/// and an empty buffer when the read window elapsed without data.
#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, frame: &[u8]) -> Result<(), ModbusError>;

    async fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, ModbusError>;

    async fn close(&mut self) -> Result<(), ModbusError> {
        Ok(())
    }

    fn describe(&self) -> String;
}

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

pub struct SerialTransport {
    port: Option<SharedPort>,
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    silent_interval: Duration,
    turnaround_delay: Duration,
    last_activity: Option<Instant>,
}

impl SerialTransport {
    pub fn open(settings: &SerialConfig) -> Result<Self, ModbusError> {
        info!("🔌 Connecting to Modbus RTU port: {}", settings.port);
        info!(
            "⚙️  Configuration: {} baud, {} data bits, parity {:?}, stop bits {:?}, timeout {} ms",
            settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits, settings.timeout_ms
        );

        let serial_parity = match settings.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };
        let stop_bits = match settings.stop_bits {
            StopBitsConfig::One => serialport::StopBits::One,
            StopBitsConfig::Two => serialport::StopBits::Two,
        };
        let data_bits = match settings.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(ModbusError::ConfigError(format!("Unsupported data bits: {}", other)));
            }
        };

        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(serial_parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", settings.port, e);
                ModbusError::ConnectionError(format!("Failed to open port {}: {}", settings.port, e))
            })?;

        info!("✅ Modbus RTU connection established successfully");
        Ok(Self::from_port(port, settings))
    }

    /// Wraps an already opened port; `settings` supplies the name and timing.
    pub fn from_port(port: Box<dyn SerialPort>, settings: &SerialConfig) -> Self {
        Self {
            port: Some(Arc::new(Mutex::new(port))),
            port_name: settings.port.clone(),
            baud_rate: settings.baud_rate,
            timeout: Duration::from_millis(settings.timeout_ms),
            silent_interval: silent_interval(settings.baud_rate),
            turnaround_delay: Duration::from_millis(settings.turnaround_delay_ms),
            last_activity: None,
        }
    }

    fn shared_port(&self) -> Result<SharedPort, ModbusError> {
        self.port
            .clone()
            .ok_or_else(|| ModbusError::TransportFatal(format!("Port {} is closed", self.port_name)))
    }

    // Only the part of the inter-frame silence not already spent idle is waited out.
    async fn wait_for_bus_silence(&self) {
        if let Some(last) = self.last_activity {
            let elapsed = last.elapsed();
            if elapsed < self.silent_interval {
                tokio::time::sleep(self.silent_interval - elapsed).await;
            }
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, frame: &[u8]) -> Result<(), ModbusError> {
        let port = self.shared_port()?;
        self.wait_for_bus_silence().await;

        let request = frame.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), ModbusError> {
            let mut port = port
                .lock()
                .map_err(|_| ModbusError::TransportFatal("Serial port lock poisoned".to_string()))?;
            // Late bytes from an earlier answer must not prefix this one
            port.clear(ClearBuffer::Input)
                .map_err(|e| ModbusError::TransportFatal(format!("Clearing input failed: {}", e)))?;
            port.write_all(&request)
                .map_err(|e| ModbusError::TransportFatal(format!("Write failed: {}", e)))?;
            port.flush()
                .map_err(|e| ModbusError::TransportFatal(format!("Flush failed: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| ModbusError::TransportFatal(format!("Serial worker failed: {}", e)))??;

        self.last_activity = Some(Instant::now());

        if !self.turnaround_delay.is_zero() {
            tokio::time::sleep(self.turnaround_delay).await;
        }
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, ModbusError> {
        let port = self.shared_port()?;
        let timeout = self.timeout;

        let response = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ModbusError> {
            let mut port = port
                .lock()
                .map_err(|_| ModbusError::TransportFatal("Serial port lock poisoned".to_string()))?;

            let mut response = Vec::with_capacity(max_bytes);
            let mut buffer = [0u8; 64];

            // The whole frame shares one timeout window, however the bytes trickle in
            let deadline = std::time::Instant::now() + timeout;
            let outcome = loop {
                if response.len() >= max_bytes {
                    break Ok(());
                }
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    break Ok(());
                }
                if let Err(e) = port.set_timeout(remaining) {
                    break Err(ModbusError::TransportFatal(format!("Setting timeout failed: {}", e)));
                }

                let wanted = (max_bytes - response.len()).min(buffer.len());
                match port.read(&mut buffer[..wanted]) {
                    Ok(0) => break Ok(()),
                    Ok(n) => response.extend_from_slice(&buffer[..n]),
                    Err(ref e) if e.kind() == ErrorKind::TimedOut => break Ok(()),
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => break Err(ModbusError::TransportFatal(format!("Read failed: {}", e))),
                }
            };

            port.set_timeout(timeout)
                .map_err(|e| ModbusError::TransportFatal(format!("Restoring timeout failed: {}", e)))?;
            outcome.map(|()| response)
        })
        .await
        .map_err(|e| ModbusError::TransportFatal(format!("Serial worker failed: {}", e)))??;

        self.last_activity = Some(Instant::now());
        debug!("📥 Received {} bytes: [{}]", response.len(), hex::encode_upper(&response));
        Ok(response)
    }

    async fn close(&mut self) -> Result<(), ModbusError> {
        if self.port.take().is_some() {
            info!("✅ Serial port {} closed", self.port_name);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}

/// One line per available serial port, with USB details when the OS reports them.
pub fn describe_available_ports() -> Result<Vec<String>, ModbusError> {
    let ports: Vec<SerialPortInfo> = serialport::available_ports()?;

    Ok(ports
        .iter()
        .map(|port| match &port.port_type {
            SerialPortType::UsbPort(usb_info) => {
                let mut line = format!(
                    "{} (USB {:04x}:{:04x})",
                    port.port_name, usb_info.vid, usb_info.pid
                );
                if let Some(manufacturer) = &usb_info.manufacturer {
                    line.push_str(&format!(", manufacturer: {}", manufacturer));
                }
                if let Some(serial_number) = &usb_info.serial_number {
                    line.push_str(&format!(", serial: {}", serial_number));
                }
                line
            }
            _ => port.port_name.clone(),
        })
        .collect())
}
