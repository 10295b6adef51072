//! State synchronization between the controller and the broker
//!
//! Two independent paths share only the [`TopicRegistry`](crate::mapping::TopicRegistry):
//!
//! ```text
//! interval ──► SyncEngine::tick ──► ApexClient::get_status ──► diff ──► StatusPublisher
//! MqttHandler ──[MQTTMessage]──► CommandWorker ──► CommandTranslator ──► ApexClient
//! ```
//!
//! [`engine::SyncEngine`] is a typestate machine
//! (`Stopped → Starting → Running → Stopping → Stopped`) driven by
//! [`handle::SyncHandle`], which runs it in a background task.

pub mod command_worker;
pub mod engine;
pub mod handle;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;

use crate::error::BridgeError;

pub use command_worker::CommandWorker;
pub use engine::{SyncEngine, TickReport};
pub use handle::SyncHandle;

/// Outbound side of the broker
///
/// Implementations publish retained messages with at-least-once delivery.
#[async_trait]
pub trait StatusPublisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError>;
}

/// Lifecycle phase reported on the status channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Stopped => write!(f, "stopped"),
            SyncPhase::Starting => write!(f, "starting"),
            SyncPhase::Running => write!(f, "running"),
            SyncPhase::Stopping => write!(f, "stopping"),
        }
    }
}

/// Health of the poll loop, observable through a `watch` channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub ticks: u64,
    pub consecutive_failures: u32,
    pub published: u64,
    pub publish_failures: u64,
    pub last_success: Option<DateTime<Local>>,
    /// Raised after `failure_threshold` consecutive failed polls
    pub degraded: bool,
}
