use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::devices::{SensorReading, ThSensor};
use crate::modbus::client::Transport;
use crate::utils::error::ModbusError;

/// Anything that wants the outcome of each poll cycle.
#[async_trait]
pub trait ReadingConsumer: Send {
    async fn on_reading(&mut self, reading: &SensorReading);
    async fn on_failure(&mut self, error: &ModbusError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
}

impl PollStats {
    pub fn success_rate(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.successes as f64 / self.cycles as f64 * 100.0
        }
    }
}

/// Drives request → response → decode cycles against one sensor.
///
/// The transport is owned exclusively, so at most one request is ever in
/// flight. A cycle that fails for any reason other than a dead transport is
/// reported to the consumer and the next tick simply tries again.
pub struct Poller<T: Transport> {
    transport: T,
    sensor: ThSensor,
    consumer: Box<dyn ReadingConsumer>,
    state: PollerState,
    stats: PollStats,
}

impl<T: Transport> Poller<T> {
    pub fn new(transport: T, sensor: ThSensor, consumer: Box<dyn ReadingConsumer>) -> Self {
        Self {
            transport,
            sensor,
            consumer,
            state: PollerState::Idle,
            stats: PollStats::default(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Runs one cycle and publishes its outcome to the consumer.
    pub async fn poll_once(&mut self) -> Result<SensorReading, ModbusError> {
        self.stats.cycles += 1;

        let result = self.exchange().await;
        match &result {
            Ok(reading) => {
                self.stats.successes += 1;
                debug!("✅ {}", reading);
                self.consumer.on_reading(reading).await;
            }
            Err(e) => {
                self.stats.failures += 1;
                if e.is_fatal() {
                    error!("💥 Transport {} failed: {}", self.transport.describe(), e);
                } else {
                    warn!("📵 Poll cycle {} failed: {}", self.stats.cycles, e);
                }
                self.consumer.on_failure(e).await;
            }
        }
        result
    }

    async fn exchange(&mut self) -> Result<SensorReading, ModbusError> {
        let request = self.sensor.request();
        let frame = request.to_frame();
        debug!("📤 Sending frame: [{}]", frame);

        self.state = PollerState::AwaitingResponse;
        let response = match self.transport.write(frame.as_bytes()).await {
            Ok(()) => self.transport.read(request.expected_response_len()).await,
            Err(e) => Err(e),
        };
        self.state = PollerState::Idle;

        let response = response?;
        if response.is_empty() {
            return Err(ModbusError::TransportTimeout);
        }

        let reading = self.sensor.decode(&response, Utc::now())?;
        if reading.device_address != request.device_address {
            warn!(
                "Response echoes address {} but request went to {}",
                reading.device_address, request.device_address
            );
        }
        Ok(reading)
    }

    /// Polls every `period` until `token` is cancelled or the transport dies.
    pub async fn run(
        &mut self,
        period: Duration,
        token: CancellationToken,
    ) -> Result<PollStats, ModbusError> {
        info!(
            "🔄 Polling device {} on {} every {:?}",
            self.sensor.address,
            self.transport.describe(),
            period
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if token.is_cancelled() {
                break;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once().await {
                if e.is_fatal() {
                    // Best effort; the read or write error is what gets returned
                    if let Err(close_err) = self.transport.close().await {
                        warn!("Closing transport after failure: {}", close_err);
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "🛑 Polling stopped after {} cycles ({} ok, {} failed)",
            self.stats.cycles, self.stats.successes, self.stats.failures
        );
        self.transport.close().await?;
        Ok(self.stats)
    }
}

impl<T: Transport + 'static> Poller<T> {
    /// Moves the poller onto its own task.
    pub fn start(mut self, period: Duration) -> PollerHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move { self.run(period, child).await });
        PollerHandle { token, task }
    }
}

pub struct PollerHandle {
    token: CancellationToken,
    task: JoinHandle<Result<PollStats, ModbusError>>,
}

impl PollerHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the loop and waits for the in-flight cycle, if any, to finish.
    pub async fn stop(self) -> Result<PollStats, ModbusError> {
        self.token.cancel();
        self.join().await
    }

    /// Waits for the loop to end on its own (cancellation elsewhere or a fatal error).
    pub async fn join(self) -> Result<PollStats, ModbusError> {
        self.task
            .await
            .map_err(|e| ModbusError::TransportFatal(format!("Polling task failed: {}", e)))?
    }
}
