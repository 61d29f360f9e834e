//! Typed command facade over the daemon's RPC channel.
//!
//! Each operation auto-starts the worker if it is not running and carries
//! its own timeout budget: short for metadata reads, longer for operations
//! that touch a real device over the network. The low-level
//! [`crate::CastDaemon::send`] never auto-starts; that behavior lives here
//! only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::protocol::{Payload, WorkerCommand};
use crate::daemon::CastDaemon;
use crate::error::DaemonError;
use crate::health::WorkerState;

/// Budget for reads that only touch worker-side state.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(3);
/// Budget for operations that reach out to a device.
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(15);
/// Budget for a reachability probe.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Seam between the facade and the daemon, so facade behavior tests with a
/// mock transport.
#[async_trait]
pub trait WorkerRpc: Send + Sync {
    /// Start the worker if necessary and wait for readiness.
    async fn ensure_ready(&self) -> Result<(), DaemonError>;

    /// Issue one correlated request. Does not start the worker.
    async fn call(
        &self,
        command: WorkerCommand,
        timeout: Duration,
    ) -> Result<Payload, DaemonError>;
}

#[async_trait]
impl WorkerRpc for CastDaemon {
    async fn ensure_ready(&self) -> Result<(), DaemonError> {
        if self.state() == WorkerState::Ready {
            return Ok(());
        }
        self.start().await
    }

    async fn call(
        &self,
        command: WorkerCommand,
        timeout: Duration,
    ) -> Result<Payload, DaemonError> {
        self.send(command, timeout).await
    }
}

/// One speaker as reported by the worker's `status` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerStatus {
    pub name: String,
    pub connected: bool,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Typed operations on cast speakers, layered on [`WorkerRpc`].
pub struct SpeakerControl {
    rpc: Arc<dyn WorkerRpc>,
}

impl SpeakerControl {
    pub fn new(rpc: Arc<dyn WorkerRpc>) -> Self {
        Self { rpc }
    }

    async fn request(
        &self,
        command: WorkerCommand,
        timeout: Duration,
    ) -> Result<Payload, DaemonError> {
        self.rpc.ensure_ready().await?;
        self.rpc.call(command, timeout).await
    }

    pub async fn set_volume(&self, target: &str, level: f64) -> Result<(), DaemonError> {
        self.request(
            WorkerCommand::SetVolume {
                target: target.to_string(),
                level,
            },
            DEVICE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    pub async fn volume(&self, target: &str) -> Result<f64, DaemonError> {
        let payload = self
            .request(
                WorkerCommand::GetVolume {
                    target: target.to_string(),
                },
                METADATA_TIMEOUT,
            )
            .await?;
        required_f64(&payload, "volume")
    }

    /// Probe a speaker; returns the round-trip latency in milliseconds as
    /// reported by the worker.
    pub async fn ping(&self, target: &str) -> Result<f64, DaemonError> {
        let payload = self
            .request(
                WorkerCommand::Ping {
                    target: target.to_string(),
                },
                PING_TIMEOUT,
            )
            .await?;
        required_f64(&payload, "latencyMs")
    }

    pub async fn connect(&self, target: &str) -> Result<(), DaemonError> {
        self.request(
            WorkerCommand::Connect {
                target: target.to_string(),
            },
            DEVICE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    pub async fn disconnect(&self, target: &str) -> Result<(), DaemonError> {
        self.request(
            WorkerCommand::Disconnect {
                target: target.to_string(),
            },
            DEVICE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    pub async fn status(&self) -> Result<Vec<SpeakerStatus>, DaemonError> {
        let payload = self.request(WorkerCommand::Status, METADATA_TIMEOUT).await?;
        let speakers = payload
            .get("speakers")
            .cloned()
            .ok_or_else(|| DaemonError::Protocol("status response missing speakers".to_string()))?;
        serde_json::from_value(speakers)
            .map_err(|e| DaemonError::Protocol(format!("bad speakers payload: {e}")))
    }
}

fn required_f64(payload: &Payload, field: &str) -> Result<f64, DaemonError> {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| DaemonError::Protocol(format!("response missing numeric {field}")))
}
