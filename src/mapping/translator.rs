//! Inbound MQTT message → controller command

use std::fmt;
use tracing::debug;

use super::topics::{TopicLayout, TopicMap};
use crate::controller::{FeedCycle, OutletCommandState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetOutlet {
        name: String,
        state: OutletCommandState,
    },
    SetFeedCycle(FeedCycle),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetOutlet { name, state } => write!(f, "set outlet {:?} to {}", name, state),
            Command::SetFeedCycle(cycle) => write!(f, "set feed cycle {}", cycle),
        }
    }
}

/// Resolves `(topic, payload)` pairs against the fixed feed topic and the
/// dynamic outlet topics
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    feed_topic: String,
}

impl CommandTranslator {
    pub fn new(layout: &TopicLayout) -> Self {
        Self {
            feed_topic: layout.feed_cycle_topic(),
        }
    }

    /// The fixed feed-cycle topic is checked before the outlet map, so an
    /// outlet whose name slugs to `feedcycle` can never shadow it.
    /// Unknown topics and unknown feed payloads yield `None`.
    pub fn translate(&self, topic: &str, payload: &str, topics: &TopicMap) -> Option<Command> {
        if topic == self.feed_topic {
            if let Some(cycle) = FeedCycle::from_payload(payload) {
                return Some(Command::SetFeedCycle(cycle));
            }
        }

        if let Some(name) = topics.resolve(topic) {
            return Some(Command::SetOutlet {
                name: name.to_string(),
                state: OutletCommandState::from_payload(payload),
            });
        }

        debug!("Ignoring message on {}: {:?}", topic, payload);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Outlet, OutletState};
    use pretty_assertions::assert_eq;

    fn setup(names: &[&str]) -> (CommandTranslator, TopicMap) {
        let layout = TopicLayout::new("reef");
        let outlets: Vec<Outlet> = names
            .iter()
            .map(|n| Outlet::new(*n, OutletState::AutoOff))
            .collect();
        (CommandTranslator::new(&layout), TopicMap::build(&layout, &outlets))
    }

    #[test]
    fn outlet_command_resolves_name() {
        let (translator, map) = setup(&["Return Pump"]);

        let command = translator.translate("apex/reef/outlets/return-pump/set", "OFF", &map);
        assert_eq!(
            command,
            Some(Command::SetOutlet {
                name: "Return Pump".to_string(),
                state: OutletCommandState::Off,
            })
        );
    }

    #[test]
    fn unknown_payload_sets_auto() {
        let (translator, map) = setup(&["Heater"]);

        let command = translator.translate("apex/reef/outlets/heater/set", "whatever", &map);
        assert_eq!(
            command,
            Some(Command::SetOutlet {
                name: "Heater".to_string(),
                state: OutletCommandState::Auto,
            })
        );
    }

    #[test]
    fn feed_cycle_payload_is_case_insensitive() {
        let (translator, map) = setup(&[]);

        assert_eq!(
            translator.translate("apex/reef/feedCycle/set", "b", &map),
            Some(Command::SetFeedCycle(FeedCycle::B))
        );
        assert_eq!(
            translator.translate("apex/reef/feedCycle/set", "CANCEL", &map),
            Some(Command::SetFeedCycle(FeedCycle::Cancel))
        );
    }

    #[test]
    fn feed_topic_wins_over_colliding_outlet() {
        // "Feed Cycle" slugs to "feed-cycle", "feedCycle" to "feedcycle";
        // neither may capture the fixed feed topic.
        let (translator, map) = setup(&["feedCycle", "Feed Cycle"]);

        assert_eq!(
            translator.translate("apex/reef/feedCycle/set", "cancel", &map),
            Some(Command::SetFeedCycle(FeedCycle::Cancel))
        );
        assert_eq!(
            translator.translate("apex/reef/outlets/feedcycle/set", "on", &map),
            Some(Command::SetOutlet {
                name: "feedCycle".to_string(),
                state: OutletCommandState::On,
            })
        );
    }

    #[test]
    fn invalid_feed_payload_is_ignored() {
        let (translator, map) = setup(&["Heater"]);
        assert_eq!(translator.translate("apex/reef/feedCycle/set", "E", &map), None);
    }

    #[test]
    fn unknown_topic_is_ignored() {
        let (translator, map) = setup(&["Heater"]);

        assert_eq!(translator.translate("apex/reef/outlets/chiller/set", "on", &map), None);
        assert_eq!(translator.translate("apex/other/outlets/heater/set", "on", &map), None);
        assert_eq!(translator.translate("apex/reef/outlets/heater", "on", &map), None);
    }
}
