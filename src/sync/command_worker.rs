//! Inbound command path
//!
//! Consumes messages forwarded by the MQTT handler, resolves them through the
//! current topic map and applies them to the controller. Commands are never
//! retried; the next poll reports whatever state the controller ended up in.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::ApexClient;
use crate::error::BridgeError;
use crate::mapping::{Command, CommandTranslator, TopicLayout, TopicRegistry};
use crate::mqtt::MQTTMessage;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CommandWorker {
    controller: Arc<dyn ApexClient>,
    topics: Arc<TopicRegistry>,
    translator: CommandTranslator,
}

impl CommandWorker {
    pub fn new(
        controller: Arc<dyn ApexClient>,
        topics: Arc<TopicRegistry>,
        layout: &TopicLayout,
    ) -> Self {
        Self {
            controller,
            topics,
            translator: CommandTranslator::new(layout),
        }
    }

    /// Translates and applies one message
    ///
    /// Returns the applied command, or `None` when the message did not map
    /// to one.
    pub async fn handle_message(
        &self,
        topic: &str,
        payload: &str,
    ) -> Result<Option<Command>, BridgeError> {
        let Some(command) = self.translator.translate(topic, payload, &self.topics.load()) else {
            return Ok(None);
        };

        info!("Applying command: {}", command);
        let request = async {
            match &command {
                Command::SetOutlet { name, state } => self.controller.set_outlet(name, *state).await,
                Command::SetFeedCycle(cycle) => self.controller.set_feed_cycle(*cycle).await,
            }
        };
        tokio::time::timeout(COMMAND_TIMEOUT, request).await??;

        Ok(Some(command))
    }

    pub async fn run(self, mut messages: mpsc::Receiver<MQTTMessage>, shutdown: CancellationToken) {
        info!("Command worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received for command worker");
                    break;
                }

                msg = messages.recv() => {
                    let Some(msg) = msg else {
                        debug!("Inbound message channel closed");
                        break;
                    };

                    if let Err(e) = self.handle_message(msg.topic(), msg.content()).await {
                        warn!("Command from {} failed: {}", msg.topic(), e);
                    }
                }
            }
        }

        info!("Command worker stopped");
    }
}
