use async_trait::async_trait;

use super::status::{FeedCycle, OutletCommandState, StatusSnapshot};
use crate::error::BridgeError;

/// Operations the bridge needs from an Apex controller
///
/// Implementations own the wire protocol and its credentials. Every failure to
/// reach the controller is reported as [`BridgeError::Transport`].
#[async_trait]
pub trait ApexClient: Send + Sync + 'static {
    /// Reads all outlet states and probe values in one request
    async fn get_status(&self) -> Result<StatusSnapshot, BridgeError>;

    /// Forces an outlet on/off or returns it to program control
    async fn set_outlet(&self, name: &str, state: OutletCommandState) -> Result<(), BridgeError>;

    /// Starts a feed cycle, or cancels the active one
    async fn set_feed_cycle(&self, cycle: FeedCycle) -> Result<(), BridgeError>;
}
