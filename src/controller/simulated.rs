//! In-memory Apex controller
//!
//! Behaves like a controller whose program never changes anything on its own:
//! outlets move only when commanded, probes only when a caller updates them.
//! Used as the binary's controller backend and as the test double for the
//! sync loop and command worker.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::client::ApexClient;
use super::status::{FeedCycle, Outlet, OutletCommandState, OutletState, Probe, StatusSnapshot};
use crate::config::ControllerConfig;
use crate::error::BridgeError;

#[derive(Debug, Default)]
struct SimulatedState {
    snapshot: StatusSnapshot,
    active_feed: Option<FeedCycle>,
    latency: Duration,
}

#[derive(Debug, Default)]
pub struct SimulatedApex {
    host: String,
    state: Mutex<SimulatedState>,
    pending_failures: AtomicUsize,
    status_requests: AtomicUsize,
}

impl SimulatedApex {
    pub fn new(host: impl Into<String>, snapshot: StatusSnapshot) -> Self {
        Self {
            host: host.into(),
            state: Mutex::new(SimulatedState {
                snapshot,
                ..SimulatedState::default()
            }),
            pending_failures: AtomicUsize::new(0),
            status_requests: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        info!(
            "Using simulated controller for {} (user {})",
            config.host, config.username
        );
        Self::new(config.host.clone(), default_layout())
    }

    /// Makes the next `count` status requests fail with a transport error
    pub fn fail_next_requests(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Delay applied to every status request
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    pub fn status_requests(&self) -> usize {
        self.status_requests.load(Ordering::SeqCst)
    }

    pub async fn set_probe_value(&self, name: &str, value: &str) {
        let mut state = self.state.lock().await;
        if let Some(probe) = state.snapshot.probes.iter_mut().find(|p| p.name == name) {
            *probe = Probe::new(name, value);
        }
    }

    /// Changes an outlet as the controller program would
    pub async fn set_outlet_state(&self, name: &str, outlet_state: OutletState) {
        let mut state = self.state.lock().await;
        if let Some(outlet) = state.snapshot.outlets.iter_mut().find(|o| o.name == name) {
            outlet.state = outlet_state;
        }
    }

    /// Swaps the whole outlet/probe configuration
    pub async fn replace_snapshot(&self, snapshot: StatusSnapshot) {
        self.state.lock().await.snapshot = snapshot;
    }

    pub async fn active_feed(&self) -> Option<FeedCycle> {
        self.state.lock().await.active_feed
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ApexClient for SimulatedApex {
    async fn get_status(&self) -> Result<StatusSnapshot, BridgeError> {
        self.status_requests.fetch_add(1, Ordering::SeqCst);

        let latency = self.state.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.take_failure() {
            return Err(BridgeError::Transport(format!(
                "Controller {} did not respond",
                self.host
            )));
        }

        Ok(self.state.lock().await.snapshot.clone())
    }

    async fn set_outlet(&self, name: &str, command: OutletCommandState) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let outlet = state
            .snapshot
            .outlets
            .iter_mut()
            .find(|o| o.name == name)
            .ok_or_else(|| {
                BridgeError::Transport(format!("Controller rejected unknown outlet {:?}", name))
            })?;

        outlet.state = match command {
            OutletCommandState::On => OutletState::On,
            OutletCommandState::Off => OutletState::Off,
            OutletCommandState::Auto if outlet.state.is_energized() => OutletState::AutoOn,
            OutletCommandState::Auto => OutletState::AutoOff,
        };
        debug!("Simulated outlet {} is now {}", name, outlet.state);
        Ok(())
    }

    async fn set_feed_cycle(&self, cycle: FeedCycle) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        state.active_feed = match cycle {
            FeedCycle::Cancel => None,
            other => Some(other),
        };
        debug!("Simulated feed cycle set to {}", cycle);
        Ok(())
    }
}

/// Typical small reef tank
pub fn default_layout() -> StatusSnapshot {
    StatusSnapshot::new(
        vec![
            Outlet::new("Return Pump", OutletState::AutoOn),
            Outlet::new("Heater", OutletState::AutoOff),
            Outlet::new("Skimmer", OutletState::AutoOn),
            Outlet::new("Lights", OutletState::AutoOn),
            Outlet::new("ATO Pump", OutletState::Off),
        ],
        vec![
            Probe::new("Temp", "25.6"),
            Probe::new("pH", "8.12"),
            Probe::new("ORP", "362"),
            Probe::new("Salt", "35.0"),
        ],
    )
}
