//! Poll/diff/publish engine with statum state machine
//!
//! # State Machine
//!
//! ```text
//! Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
//!                │
//!                └── initial fetch/publish failed ──► (error to caller)
//! ```
//!
//! `Starting` performs one full fetch, publishes every retained value and
//! then installs the topic map. `Running` owns the cached snapshot and
//! replaces it after every successful fetch, whether or not anything was
//! published.
//!
//! Both the fetch and the publishes of one poll are each bounded by the
//! refresh interval, so a stalled controller or broker costs a bounded
//! amount of time per poll and never blocks shutdown.

use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{StatusPublisher, SyncPhase, SyncStatus};
use crate::config::SyncSettings;
use crate::controller::{ApexClient, StatusSnapshot};
use crate::error::BridgeError;
use crate::mapping::{
    check_shape, diff, initial_publish_set, retired_topics, TopicLayout, TopicRegistry,
};

#[state]
#[derive(Debug, Clone)]
pub enum SyncState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What a single poll did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub published: usize,
    pub failed: usize,
    /// The outlet/probe set changed and the topic map was rebuilt
    pub rebuilt: bool,
}

#[machine]
pub struct SyncEngine<S: SyncState> {
    controller: Arc<dyn ApexClient>,
    publisher: Arc<dyn StatusPublisher>,
    topics: Arc<TopicRegistry>,
    layout: TopicLayout,
    settings: SyncSettings,
    cached: Option<StatusSnapshot>,
    status_tx: watch::Sender<SyncStatus>,
}

impl<S: SyncState> SyncEngine<S> {
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Last successfully fetched snapshot
    pub fn cached(&self) -> Option<&StatusSnapshot> {
        self.cached.as_ref()
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.status_tx.send_modify(|status| status.phase = phase);
    }

    /// Fetch bounded by the refresh interval, so a slow controller costs at
    /// most one tick
    async fn fetch(&self) -> Result<StatusSnapshot, BridgeError> {
        tokio::time::timeout(self.settings.refresh_interval, self.controller.get_status()).await?
    }

    fn publish_deadline(&self) -> Instant {
        Instant::now() + self.settings.refresh_interval
    }

    /// A publish still pending at `deadline` fails with a transport error
    async fn publish_by(
        &self,
        deadline: Instant,
        topic: &str,
        payload: &str,
    ) -> Result<(), BridgeError> {
        tokio::time::timeout_at(deadline, self.publisher.publish(topic, payload)).await?
    }
}

impl SyncEngine<Stopped> {
    pub fn create(
        controller: Arc<dyn ApexClient>,
        publisher: Arc<dyn StatusPublisher>,
        topics: Arc<TopicRegistry>,
        layout: TopicLayout,
        settings: SyncSettings,
    ) -> Self {
        info!("Creating sync engine for {}", layout.root());
        let (status_tx, _) = watch::channel(SyncStatus::default());

        Self::new(controller, publisher, topics, layout, settings, None, status_tx)
    }

    pub fn start(self) -> SyncEngine<Starting> {
        info!("Starting synchronization for {}", self.layout.root());
        self.set_phase(SyncPhase::Starting);
        self.transition()
    }
}

impl SyncEngine<Starting> {
    /// Initial fetch, full publish and topic map rebuild
    ///
    /// Every failure here is fatal: the engine is dropped, the topic map is
    /// left untouched and the error is returned to the caller.
    pub async fn initialize(mut self) -> Result<SyncEngine<Running>, BridgeError> {
        let snapshot = match self.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Initial status fetch failed: {}", e);
                self.set_phase(SyncPhase::Stopped);
                return Err(e);
            }
        };
        info!(
            "Controller reports {} outlets and {} probes",
            snapshot.outlets.len(),
            snapshot.probes.len()
        );

        let messages = initial_publish_set(&self.layout, &snapshot);
        let deadline = self.publish_deadline();
        for (topic, payload) in &messages {
            if let Err(e) = self.publish_by(deadline, topic, payload).await {
                error!("Initial publish to {} failed: {}", topic, e);
                self.set_phase(SyncPhase::Stopped);
                return Err(e);
            }
        }
        debug!("Published {} initial values", messages.len());

        self.topics.refresh(&self.layout, &snapshot.outlets);

        self.cached = Some(snapshot);
        self.status_tx.send_modify(|status| {
            status.phase = SyncPhase::Running;
            status.published += messages.len() as u64;
            status.last_success = Some(chrono::Local::now());
        });

        info!("Synchronization running for {}", self.layout.root());
        Ok(self.transition())
    }
}

impl SyncEngine<Running> {
    /// One poll: fetch, diff against the cache, publish, replace the cache
    ///
    /// A failed fetch leaves the cache untouched. Failed or timed out
    /// publishes are logged and counted; the remaining updates are still sent.
    pub async fn tick(&mut self) -> Result<TickReport, BridgeError> {
        self.status_tx.send_modify(|status| status.ticks += 1);

        let current = match self.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.record_failure();
                return Err(e);
            }
        };

        let previous = self.cached.take().unwrap_or_default();
        let mut report = TickReport::default();

        let messages: Vec<(String, String)> = match check_shape(&previous, &current) {
            Ok(()) => diff(&previous, &current, self.settings.policy)
                .into_iter()
                .map(|update| (self.layout.absolute(&update.suffix), update.value))
                .collect(),
            Err(e) => {
                warn!("{}; rebuilding topic map", e);
                self.topics.refresh(&self.layout, &current.outlets);
                report.rebuilt = true;

                // Empty retained payloads clear topics of removed entities
                retired_topics(&self.layout, &previous, &current)
                    .into_iter()
                    .map(|topic| (topic, String::new()))
                    .chain(initial_publish_set(&self.layout, &current))
                    .collect()
            }
        };

        let deadline = self.publish_deadline();
        for (topic, payload) in &messages {
            match self.publish_by(deadline, topic, payload).await {
                Ok(()) => {
                    debug!("Published {} = {}", topic, payload);
                    report.published += 1;
                }
                Err(e) => {
                    warn!("Failed to publish {}: {}", topic, e);
                    report.failed += 1;
                }
            }
        }

        self.cached = Some(current);
        self.record_success(&report);
        Ok(report)
    }

    /// Ticks every refresh interval until `shutdown` is cancelled
    ///
    /// Ticks never overlap; a tick that overruns its interval makes the timer
    /// skip the missed deadlines instead of bursting. Cancellation is only
    /// observed between ticks, so an in-flight tick always completes.
    pub async fn run_until_cancelled(mut self, shutdown: CancellationToken) -> SyncEngine<Stopping> {
        let period = self.settings.refresh_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Polling controller every {:?}", period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received for {}", self.layout.root());
                    break;
                }

                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) => debug!(
                            "Tick done: {} published, {} failed, rebuilt: {}",
                            report.published, report.failed, report.rebuilt
                        ),
                        Err(e) if e.is_transient() => warn!("Status poll failed: {}", e),
                        Err(e) => error!("Status poll failed: {}", e),
                    }
                }
            }
        }

        self.stop()
    }

    pub fn stop(self) -> SyncEngine<Stopping> {
        info!("Stopping synchronization for {}", self.layout.root());
        self.set_phase(SyncPhase::Stopping);
        self.transition()
    }

    fn record_failure(&self) {
        let threshold = self.settings.failure_threshold;
        self.status_tx.send_modify(|status| {
            status.consecutive_failures += 1;
            if status.consecutive_failures >= threshold && !status.degraded {
                status.degraded = true;
                error!(
                    "Controller unreachable for {} consecutive polls",
                    status.consecutive_failures
                );
            }
        });
    }

    fn record_success(&self, report: &TickReport) {
        self.status_tx.send_modify(|status| {
            if status.degraded {
                info!(
                    "Controller reachable again after {} failed polls",
                    status.consecutive_failures
                );
            }
            status.degraded = false;
            status.consecutive_failures = 0;
            status.published += report.published as u64;
            status.publish_failures += report.failed as u64;
            status.last_success = Some(chrono::Local::now());
        });
    }
}

impl SyncEngine<Stopping> {
    pub fn shutdown(self) -> SyncEngine<Stopped> {
        self.set_phase(SyncPhase::Stopped);
        info!("Synchronization stopped for {}", self.layout.root());
        self.transition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::simulated::default_layout;
    use crate::controller::{OutletState, SimulatedApex};
    use crate::mapping::DiffPolicy;
    use crate::sync::test_support::RecordingPublisher;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Fixture {
        apex: Arc<SimulatedApex>,
        publisher: Arc<RecordingPublisher>,
        topics: Arc<TopicRegistry>,
    }

    fn fixture() -> Fixture {
        Fixture {
            apex: Arc::new(SimulatedApex::new("sim", default_layout())),
            publisher: Arc::new(RecordingPublisher::default()),
            topics: Arc::new(TopicRegistry::new()),
        }
    }

    fn settings(policy: DiffPolicy) -> SyncSettings {
        SyncSettings {
            refresh_interval: Duration::from_secs(5),
            policy,
            failure_threshold: 3,
        }
    }

    fn engine(f: &Fixture, policy: DiffPolicy) -> SyncEngine<Stopped> {
        SyncEngine::create(
            f.apex.clone(),
            f.publisher.clone(),
            f.topics.clone(),
            TopicLayout::new("reef"),
            settings(policy),
        )
    }

    #[tokio::test]
    async fn initialize_publishes_everything_and_maps_outlets() {
        let f = fixture();
        let running = engine(&f, DiffPolicy::default()).start().initialize().await.unwrap();

        let published = f.publisher.take();
        assert_eq!(published.len(), 9);
        assert_eq!(
            published[0],
            ("apex/reef/outlets/return-pump".to_string(), "auto".to_string())
        );
        assert_eq!(published[4], ("apex/reef/outlets/ato-pump".to_string(), "off".to_string()));
        assert_eq!(published[5], ("apex/reef/probes/temp".to_string(), "25.6".to_string()));

        assert_eq!(f.topics.load().len(), 5);
        assert_eq!(
            f.topics.load().resolve("apex/reef/outlets/return-pump/set"),
            Some("Return Pump")
        );
        assert_eq!(running.cached(), Some(&default_layout()));
        assert_eq!(running.status().borrow().phase, SyncPhase::Running);
    }

    #[tokio::test]
    async fn initialize_fails_when_controller_unreachable() {
        let f = fixture();
        f.apex.fail_next_requests(1);
        let starting = engine(&f, DiffPolicy::default()).start();
        let status = starting.status();

        let result = starting.initialize().await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert!(f.publisher.take().is_empty());
        assert!(f.topics.load().is_empty());
        assert_eq!(status.borrow().phase, SyncPhase::Stopped);
    }

    #[tokio::test]
    async fn initialize_fails_when_publish_fails() {
        let f = fixture();
        f.publisher.fail_topic("apex/reef/probes/ph");

        let result = engine(&f, DiffPolicy::default()).start().initialize().await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert!(f.topics.load().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_gives_up_on_stalled_broker() {
        let f = fixture();
        f.publisher.stall_topic("apex/reef/outlets/heater");

        let started = Instant::now();
        let result = engine(&f, DiffPolicy::default()).start().initialize().await;

        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(f.topics.load().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_publish_fails_and_batch_continues() {
        let f = fixture();
        let mut running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        f.publisher.take();

        f.apex.set_outlet_state("Heater", OutletState::On).await;
        f.apex.set_outlet_state("Lights", OutletState::Off).await;
        f.publisher.stall_topic("apex/reef/outlets/heater");

        let started = Instant::now();
        let report = running.tick().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(report.failed, 1);
        assert_eq!(report.published, 1);
        assert_eq!(
            f.publisher.take(),
            vec![("apex/reef/outlets/lights".to_string(), "off".to_string())]
        );
        assert_eq!(running.status().borrow().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn tick_publishes_only_changes() {
        let f = fixture();
        let mut running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        f.publisher.take();

        assert_eq!(running.tick().await.unwrap(), TickReport::default());
        assert!(f.publisher.take().is_empty());

        f.apex.set_outlet_state("Heater", OutletState::On).await;
        f.apex.set_probe_value("Temp", "25.9").await;

        let report = running.tick().await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(
            f.publisher.take(),
            vec![
                ("apex/reef/outlets/heater".to_string(), "on".to_string()),
                ("apex/reef/probes/temp".to_string(), "25.9".to_string()),
            ]
        );
        assert_eq!(running.cached().unwrap().outlet("Heater").unwrap().state, OutletState::On);
    }

    #[tokio::test]
    async fn default_policy_republishes_probes_every_tick() {
        let f = fixture();
        let mut running = engine(&f, DiffPolicy::default()).start().initialize().await.unwrap();
        f.publisher.take();

        let report = running.tick().await.unwrap();
        assert_eq!(report.published, 4);
        assert!(f
            .publisher
            .take()
            .iter()
            .all(|(topic, _)| topic.starts_with("apex/reef/probes/")));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_cache_and_counts_failures() {
        let f = fixture();
        let mut running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        let status = running.status();

        f.apex.set_outlet_state("Skimmer", OutletState::Off).await;
        f.apex.fail_next_requests(3);

        for _ in 0..3 {
            assert!(running.tick().await.is_err());
        }
        assert_eq!(running.cached(), Some(&default_layout()));
        assert_eq!(status.borrow().consecutive_failures, 3);
        assert!(status.borrow().degraded);

        let report = running.tick().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(status.borrow().consecutive_failures, 0);
        assert!(!status.borrow().degraded);
        assert_eq!(status.borrow().ticks, 4);
    }

    #[tokio::test]
    async fn publish_failure_does_not_abort_batch() {
        let f = fixture();
        let mut running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        f.publisher.take();

        f.apex.set_outlet_state("Heater", OutletState::On).await;
        f.apex.set_outlet_state("Lights", OutletState::Off).await;
        f.publisher.fail_topic("apex/reef/outlets/heater");

        let report = running.tick().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            f.publisher.take(),
            vec![("apex/reef/outlets/lights".to_string(), "off".to_string())]
        );
        assert_eq!(running.status().borrow().publish_failures, 1);
    }

    #[tokio::test]
    async fn changed_outlet_set_rebuilds_topic_map() {
        let f = fixture();
        let mut running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        f.publisher.take();

        let mut layout = default_layout();
        layout.outlets.retain(|o| o.name != "Heater");
        f.apex.replace_snapshot(layout).await;

        let report = running.tick().await.unwrap();
        assert!(report.rebuilt);
        assert_eq!(report.published, 9);

        let published = f.publisher.take();
        assert_eq!(published[0], ("apex/reef/outlets/heater".to_string(), String::new()));
        assert!(published[1..]
            .iter()
            .all(|(topic, _)| topic != "apex/reef/outlets/heater"));

        let map = f.topics.load();
        assert!(!map.contains("apex/reef/outlets/heater/set"));
        assert_eq!(map.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out_and_keeps_cache() {
        let f = fixture();
        let mut running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();

        f.apex.set_latency(Duration::from_secs(60)).await;
        f.apex.set_outlet_state("Heater", OutletState::On).await;

        assert!(matches!(running.tick().await, Err(BridgeError::Transport(_))));
        assert_eq!(running.cached(), Some(&default_layout()));
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_cancelled() {
        let f = fixture();
        let running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        let status = running.status();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(running.run_until_cancelled(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(16)).await;
        shutdown.cancel();
        let stopped = task.await.unwrap().shutdown();

        assert_eq!(status.borrow().ticks, 3);
        assert_eq!(status.borrow().phase, SyncPhase::Stopped);
        assert_eq!(f.apex.status_requests(), 4);
        assert!(stopped.cached().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_controller_never_overlaps_polls() {
        let f = fixture();
        let running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        let status = running.status();
        let shutdown = CancellationToken::new();

        f.apex.set_latency(Duration::from_secs(8)).await;
        let task = tokio::spawn(running.run_until_cancelled(shutdown.clone()));

        // Each poll times out after one interval; six intervals fit at most
        // six polls after the initial fetch.
        tokio::time::sleep(Duration::from_secs(31)).await;
        shutdown.cancel();
        task.await.unwrap().shutdown();

        let polls = f.apex.status_requests() - 1;
        assert!(polls >= 2, "only {} polls", polls);
        assert!(polls <= 6, "{} polls in six intervals", polls);
        assert_eq!(status.borrow().ticks as usize, polls);
        assert!(status.borrow().degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn run_recovers_after_failed_polls() {
        let f = fixture();
        let running = engine(&f, DiffPolicy::changed_only()).start().initialize().await.unwrap();
        let status = running.status();
        let shutdown = CancellationToken::new();
        f.publisher.take();

        f.apex.fail_next_requests(2);
        f.apex.set_outlet_state("Heater", OutletState::On).await;
        let task = tokio::spawn(running.run_until_cancelled(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(status.borrow().consecutive_failures, 2);
        assert!(f.publisher.take().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        task.await.unwrap().shutdown();

        assert_eq!(
            f.publisher.take(),
            vec![("apex/reef/outlets/heater".to_string(), "on".to_string())]
        );
        assert_eq!(status.borrow().ticks, 3);
        assert_eq!(status.borrow().consecutive_failures, 0);
    }
}
