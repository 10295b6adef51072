//! Topic namespace and the command-topic → outlet map
//!
//! # Namespace
//!
//! ```text
//! {root}/outlets/{slug}           retained state: on|off|auto
//! {root}/outlets/{slug}/set       command: on|off|anything else (= auto)
//! {root}/probes/{slug}            retained probe value
//! {root}/feedCycle/set            command: A|B|C|D|CANCEL
//! ```
//!
//! The map is rebuilt as a whole and swapped in atomically, so the command
//! worker never sees a half-populated map while the sync loop refreshes it.

use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::slug::slug;
use crate::controller::{Outlet, StatusSnapshot};

pub const OUTLETS_SEGMENT: &str = "/outlets/";
pub const PROBES_SEGMENT: &str = "/probes/";
pub const FEED_CYCLE_SUFFIX: &str = "/feedCycle/set";
const COMMAND_SUFFIX: &str = "/set";

/// Builds every topic string below `apex/{instance_name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    root: String,
}

impl TopicLayout {
    pub fn new(instance_name: &str) -> Self {
        Self {
            root: format!("apex/{}", instance_name),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefixes a suffix such as `/outlets/heater` with the root
    pub fn absolute(&self, suffix: &str) -> String {
        format!("{}{}", self.root, suffix)
    }

    pub fn outlet_suffix(name: &str) -> String {
        format!("{}{}", OUTLETS_SEGMENT, slug(name))
    }

    pub fn probe_suffix(name: &str) -> String {
        format!("{}{}", PROBES_SEGMENT, slug(name))
    }

    pub fn outlet_state_topic(&self, name: &str) -> String {
        self.absolute(&Self::outlet_suffix(name))
    }

    pub fn outlet_command_topic(&self, name: &str) -> String {
        format!("{}{}", self.outlet_state_topic(name), COMMAND_SUFFIX)
    }

    pub fn probe_topic(&self, name: &str) -> String {
        self.absolute(&Self::probe_suffix(name))
    }

    pub fn feed_cycle_topic(&self) -> String {
        self.absolute(FEED_CYCLE_SUFFIX)
    }

    /// Topic filters the bridge subscribes to
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            format!("{}{}+{}", self.root, OUTLETS_SEGMENT, COMMAND_SUFFIX),
            self.feed_cycle_topic(),
        ]
    }
}

/// Inbound command topic → outlet name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicMap {
    by_topic: HashMap<String, String>,
}

impl TopicMap {
    /// Maps `{root}/outlets/{slug(name)}/set` to `name` for every outlet
    ///
    /// When two names share a slug the first outlet keeps the topic.
    pub fn build(layout: &TopicLayout, outlets: &[Outlet]) -> Self {
        let mut by_topic = HashMap::with_capacity(outlets.len());

        for outlet in outlets {
            let topic = layout.outlet_command_topic(&outlet.name);
            if let Some(existing) = by_topic.get(&topic) {
                warn!(
                    "Outlet {:?} maps to the same topic as {:?}, ignoring: {}",
                    outlet.name, existing, topic
                );
                continue;
            }
            debug!("Mapped {} -> {}", topic, outlet.name);
            by_topic.insert(topic, outlet.name.clone());
        }

        Self { by_topic }
    }

    pub fn resolve(&self, topic: &str) -> Option<&str> {
        self.by_topic.get(topic).map(String::as_str)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.by_topic.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }
}

/// Shared handle to the current [`TopicMap`]
///
/// Written by the sync loop, read by the command worker.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    current: ArcSwap<TopicMap>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole map; previous entries are discarded
    pub fn refresh(&self, layout: &TopicLayout, outlets: &[Outlet]) -> usize {
        let map = TopicMap::build(layout, outlets);
        let count = map.len();
        self.current.store(Arc::new(map));
        info!("Topic map rebuilt with {} command topics", count);
        count
    }

    /// Consistent view of the map at the time of the call
    pub fn load(&self) -> Arc<TopicMap> {
        self.current.load_full()
    }
}

/// Full retained state: outlets first, then probes, in snapshot order
pub fn initial_publish_set(layout: &TopicLayout, snapshot: &StatusSnapshot) -> Vec<(String, String)> {
    let outlets = snapshot.outlets.iter().map(|outlet| {
        (
            layout.outlet_state_topic(&outlet.name),
            outlet.state.wire_value().to_string(),
        )
    });
    let probes = snapshot
        .probes
        .iter()
        .map(|probe| (layout.probe_topic(&probe.name), probe.reading().to_string()));

    outlets.chain(probes).collect()
}

/// State topics published for `previous` that nothing in `current` claims
///
/// Clearing these removes the retained values of deleted outlets and probes.
pub fn retired_topics(
    layout: &TopicLayout,
    previous: &StatusSnapshot,
    current: &StatusSnapshot,
) -> Vec<String> {
    let live: HashSet<String> = initial_publish_set(layout, current)
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();

    let mut retired: Vec<String> = Vec::new();
    for (topic, _) in initial_publish_set(layout, previous) {
        if !live.contains(&topic) && !retired.contains(&topic) {
            retired.push(topic);
        }
    }
    retired
}
