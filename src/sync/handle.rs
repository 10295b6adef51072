//! Public interface for the sync engine
//!
//! [`SyncHandle::start`] runs the initial synchronization in the caller's
//! task so a failure there can abort startup, then moves the running engine
//! into a background task.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::engine::SyncEngine;
use super::{StatusPublisher, SyncStatus};
use crate::config::SyncSettings;
use crate::controller::ApexClient;
use crate::error::BridgeError;
use crate::mapping::{TopicLayout, TopicRegistry};

pub struct SyncHandle {
    task_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    status_rx: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Performs the initial fetch and publish, then spawns the poll loop
    ///
    /// The loop stops when either [`SyncHandle::shutdown`] is called or
    /// `parent` is cancelled.
    pub async fn start(
        controller: Arc<dyn ApexClient>,
        publisher: Arc<dyn StatusPublisher>,
        topics: Arc<TopicRegistry>,
        layout: TopicLayout,
        settings: SyncSettings,
        parent: &CancellationToken,
    ) -> Result<Self, BridgeError> {
        let engine = SyncEngine::create(controller, publisher, topics, layout, settings);
        let status_rx = engine.status();

        let running = engine.start().initialize().await?;

        let shutdown = parent.child_token();
        let token = shutdown.clone();
        let task_handle = tokio::spawn(async move {
            let stopping = running.run_until_cancelled(token).await;
            stopping.shutdown();
        });

        Ok(Self {
            task_handle: Some(task_handle),
            shutdown,
            status_rx,
        })
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the poll loop and waits for an in-flight tick to finish
    pub async fn shutdown(&mut self) -> Result<(), BridgeError> {
        let Some(handle) = self.task_handle.take() else {
            return Ok(());
        };

        info!("Shutting down sync engine");
        self.shutdown.cancel();

        handle.await.map_err(|e| {
            error!("Sync task ended abnormally: {}", e);
            BridgeError::Task(e.to_string())
        })
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
