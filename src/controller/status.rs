use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Power state of an outlet as reported by the controller
///
/// The controller distinguishes between manually forced states and states
/// chosen by its own program (`AON`/`AOF`). Externally both program states
/// are published as `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutletState {
    On,
    Off,
    AutoOn,
    AutoOff,
}

impl OutletState {
    /// Value published on `{root}/outlets/{slug}`
    pub fn wire_value(self) -> &'static str {
        match self {
            OutletState::On => "on",
            OutletState::Off => "off",
            OutletState::AutoOn | OutletState::AutoOff => "auto",
        }
    }

    /// Controller vocabulary (`ON`, `OFF`, `AON`, `AOF`)
    pub fn source_code(self) -> &'static str {
        match self {
            OutletState::On => "ON",
            OutletState::Off => "OFF",
            OutletState::AutoOn => "AON",
            OutletState::AutoOff => "AOF",
        }
    }

    /// Whether the outlet is physically energized
    pub fn is_energized(self) -> bool {
        matches!(self, OutletState::On | OutletState::AutoOn)
    }
}

impl FromStr for OutletState {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ON" => Ok(OutletState::On),
            "OFF" => Ok(OutletState::Off),
            "AON" => Ok(OutletState::AutoOn),
            "AOF" => Ok(OutletState::AutoOff),
            other => Err(BridgeError::ProtocolMismatch(format!(
                "Unknown outlet state: {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for OutletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outlet {
    pub name: String,
    pub state: OutletState,
}

impl Outlet {
    pub fn new(name: impl Into<String>, state: OutletState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

/// Read-only sensor channel. Values are kept verbatim apart from trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub value: String,
}

impl Probe {
    pub fn new(name: impl Into<String>, value: impl AsRef<str>) -> Self {
        Self {
            name: name.into(),
            value: value.as_ref().trim().to_string(),
        }
    }

    /// Value as published, with surrounding whitespace removed
    ///
    /// Backends may build probes without [`Probe::new`], so every outbound
    /// path reads through this.
    pub fn reading(&self) -> &str {
        self.value.trim()
    }
}

/// Outlet and probe readings captured by a single poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub outlets: Vec<Outlet>,
    pub probes: Vec<Probe>,
}

impl StatusSnapshot {
    pub fn new(outlets: Vec<Outlet>, probes: Vec<Probe>) -> Self {
        Self { outlets, probes }
    }

    pub fn outlet(&self, name: &str) -> Option<&Outlet> {
        self.outlets.iter().find(|o| o.name == name)
    }

    pub fn probe(&self, name: &str) -> Option<&Probe> {
        self.probes.iter().find(|p| p.name == name)
    }
}

/// Preset feeding sequence, or cancellation of the running one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedCycle {
    A,
    B,
    C,
    D,
    Cancel,
}

impl FeedCycle {
    /// Case-insensitive match against `A|B|C|D|CANCEL`
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload.trim().to_uppercase().as_str() {
            "A" => Some(FeedCycle::A),
            "B" => Some(FeedCycle::B),
            "C" => Some(FeedCycle::C),
            "D" => Some(FeedCycle::D),
            "CANCEL" => Some(FeedCycle::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for FeedCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedCycle::A => write!(f, "A"),
            FeedCycle::B => write!(f, "B"),
            FeedCycle::C => write!(f, "C"),
            FeedCycle::D => write!(f, "D"),
            FeedCycle::Cancel => write!(f, "CANCEL"),
        }
    }
}

/// Requested outlet mode sent to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutletCommandState {
    On,
    Off,
    Auto,
}

impl OutletCommandState {
    /// Classifies a command payload. Only `on` and `off` (any case) force the
    /// outlet; every other payload hands it back to the controller program.
    pub fn from_payload(payload: &str) -> Self {
        match payload.trim().to_lowercase().as_str() {
            "on" => OutletCommandState::On,
            "off" => OutletCommandState::Off,
            _ => OutletCommandState::Auto,
        }
    }
}

impl fmt::Display for OutletCommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutletCommandState::On => write!(f, "on"),
            OutletCommandState::Off => write!(f, "off"),
            OutletCommandState::Auto => write!(f, "auto"),
        }
    }
}
