//! castlet: supervised worker bridge for casting host audio to networked
//! speakers.
//!
//! The casting application keeps one long-lived speaker-control helper
//! process alive instead of paying a multi-second spawn per operation. This
//! crate owns that process: newline-delimited JSON RPC over its standard
//! streams, request/response correlation with per-request timeouts, and
//! bounded crash-restart supervision.

pub mod bridge;
mod commands;
mod config;
mod correlator;
mod daemon;
mod error;
mod health;
mod supervisor;
mod timer;
mod worker;

pub use bridge::protocol::{Payload, RequestFrame, ResponseFrame, WorkerCommand};
pub use commands::{
    DEVICE_TIMEOUT, METADATA_TIMEOUT, PING_TIMEOUT, SpeakerControl, SpeakerStatus, WorkerRpc,
};
pub use config::DaemonConfig;
pub use daemon::CastDaemon;
pub use error::DaemonError;
pub use health::{DaemonSnapshot, WorkerExitInfo, WorkerState};
pub use worker::{ExecSpawner, WorkerSpawner};
