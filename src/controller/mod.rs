//! Apex controller domain model and client seam
//!
//! 1. [`status`] - Outlet, probe and snapshot types plus command vocabularies
//! 2. [`client`] - [`ApexClient`] trait implemented by controller backends
//! 3. [`simulated`] - In-memory backend
//!
//! # Data Flow
//!
//! ```text
//! ApexClient::get_status ──► StatusSnapshot ──► Diff / Topic Mapper
//! Command Worker ──► ApexClient::set_outlet / set_feed_cycle
//! ```

pub mod client;
pub mod simulated;
pub mod status;

pub use client::ApexClient;
pub use simulated::SimulatedApex;
pub use status::{
    FeedCycle, Outlet, OutletCommandState, OutletState, Probe, StatusSnapshot,
};
