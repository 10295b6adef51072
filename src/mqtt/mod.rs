//! # MQTT Integration Module
//!
//! Connects the bridge to the broker through `rumqttc`. The broker protocol
//! itself is the crate's business; this module only owns the connection
//! lifecycle and the two directions of traffic:
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker endpoint and session settings
//! ├── message_manager.rs  - Inbound message representation and forwarding
//! └── mqtt_handler.rs     - Event loop task, connection status, publisher
//! ```
//!
//! ## Traffic
//!
//! - **Outbound**: [`mqtt_handler::MqttPublisher`] publishes retained,
//!   at-least-once messages on behalf of the sync loop.
//! - **Inbound**: the handler subscribes to the command topics on every
//!   (re)connect and forwards each received publish as an
//!   [`message_manager::MQTTMessage`] over an `mpsc` channel to the command
//!   worker.
//!
//! Connection errors never end the handler; it records the error on its
//! status channel, waits for the configured reconnect delay and polls again.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::MqttConfig;
pub use message_manager::MQTTMessage;
pub use mqtt_handler::{ConnectionState, MQTTStatus, MqttHandler, MqttPublisher};
