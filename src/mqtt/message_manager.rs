use chrono::NaiveDateTime;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

const PREVIEW_CHARS: usize = 32;

/// Inbound message handed from the MQTT event loop to the command worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    topic: String,
    content: String,
    timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.content.chars().take(PREVIEW_CHARS).collect();
        if preview.len() < self.content.len() {
            write!(f, "{} {} - {}…", self.timestamp, self.topic, preview)
        } else {
            write!(f, "{} {} - {}", self.timestamp, self.topic, preview)
        }
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: impl Into<String>, content: impl Into<String>) -> Self {
        MQTTMessage {
            topic: topic.into(),
            content: content.into(),
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Decodes a raw payload; invalid UTF-8 is replaced rather than rejected
    pub fn from_payload(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self::from_topic(topic, String::from_utf8_lossy(payload).into_owned())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Forwards received messages to the consumer side
#[derive(Debug, Clone)]
pub struct MsgManager {
    pub received_msg: mpsc::Sender<MQTTMessage>,
}

impl MsgManager {
    /// Hands a message to the consumer without waiting
    ///
    /// Returns false when the message was dropped because the channel is full
    /// or the consumer has gone away.
    pub fn forward(&self, msg: MQTTMessage) -> bool {
        match self.received_msg.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!("Inbound message dropped, command queue full: {}", msg);
                false
            }
            Err(TrySendError::Closed(msg)) => {
                warn!("Inbound message dropped, receiver closed: {}", msg);
                false
            }
        }
    }
}
