//! # Apex ⇄ MQTT bridge
//!
//! Mirrors the outlets and probes of a Neptune Apex aquarium controller onto
//! retained MQTT topics and turns commands published under the same root
//! back into controller requests.
//!
//! ```text
//! apex/{instance}/outlets/{slug}        retained outlet state (on/off/auto)
//! apex/{instance}/probes/{slug}         retained probe reading
//! apex/{instance}/outlets/{slug}/set    outlet command
//! apex/{instance}/feedCycle/set         feed cycle command (A-D, CANCEL)
//! ```
//!
//! - [`controller`] - Controller data model and the [`controller::ApexClient`] seam
//! - [`mapping`] - Slugs, topic map, snapshot diff and command translation
//! - [`mqtt`] - Broker connection, inbound forwarding, retained publisher
//! - [`sync`] - Poll loop state machine and command worker
//! - [`config`] - TOML configuration

pub mod config;
pub mod controller;
pub mod error;
pub mod mapping;
pub mod mqtt;
pub mod sync;

pub use config::BridgeConfig;
pub use error::BridgeError;
