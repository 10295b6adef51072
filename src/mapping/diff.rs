//! Change detection between two consecutive status snapshots
//!
//! Entities are matched by name, not by position, so a controller that
//! reorders its lists between polls does not produce misattributed updates.
//! A change in the *set* of names is reported separately by [`check_shape`];
//! the sync loop treats that as a configuration reload.

use std::collections::{HashMap, HashSet};

use super::topics::TopicLayout;
use crate::controller::StatusSnapshot;
use crate::error::BridgeError;

/// Whether unchanged values are re-published on every poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    ChangedOnly,
    Always,
}

impl Emission {
    pub fn from_changed_only(changed_only: bool) -> Self {
        if changed_only {
            Emission::ChangedOnly
        } else {
            Emission::Always
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffPolicy {
    pub outlets: Emission,
    pub probes: Emission,
}

impl Default for DiffPolicy {
    /// Outlets only on change, probes always (live telemetry)
    fn default() -> Self {
        Self {
            outlets: Emission::ChangedOnly,
            probes: Emission::Always,
        }
    }
}

impl DiffPolicy {
    pub fn changed_only() -> Self {
        Self {
            outlets: Emission::ChangedOnly,
            probes: Emission::ChangedOnly,
        }
    }
}

/// Topic suffix (relative to the root) and payload to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub suffix: String,
    pub value: String,
}

impl Update {
    pub fn new(suffix: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            value: value.into(),
        }
    }
}

/// Updates needed to move subscribers from `previous` to `current`
///
/// Outlets come first, then probes, each in `current` order. Entities absent
/// from `previous` are always emitted.
pub fn diff(previous: &StatusSnapshot, current: &StatusSnapshot, policy: DiffPolicy) -> Vec<Update> {
    let mut updates = Vec::new();

    let previous_outlets: HashMap<&str, _> = previous
        .outlets
        .iter()
        .map(|o| (o.name.as_str(), o.state))
        .collect();
    for outlet in &current.outlets {
        let unchanged = previous_outlets.get(outlet.name.as_str()) == Some(&outlet.state);
        if unchanged && policy.outlets == Emission::ChangedOnly {
            continue;
        }
        updates.push(Update::new(
            TopicLayout::outlet_suffix(&outlet.name),
            outlet.state.wire_value(),
        ));
    }

    let previous_probes: HashMap<&str, &str> = previous
        .probes
        .iter()
        .map(|p| (p.name.as_str(), p.reading()))
        .collect();
    for probe in &current.probes {
        let unchanged = previous_probes.get(probe.name.as_str()) == Some(&probe.reading());
        if unchanged && policy.probes == Emission::ChangedOnly {
            continue;
        }
        updates.push(Update::new(
            TopicLayout::probe_suffix(&probe.name),
            probe.reading(),
        ));
    }

    updates
}

/// Fails when the outlet or probe names differ between the two snapshots
pub fn check_shape(previous: &StatusSnapshot, current: &StatusSnapshot) -> Result<(), BridgeError> {
    let before = names(previous.outlets.iter().map(|o| o.name.as_str()));
    let after = names(current.outlets.iter().map(|o| o.name.as_str()));
    if before != after || previous.outlets.len() != current.outlets.len() {
        return Err(BridgeError::ProtocolMismatch(format!(
            "outlet list changed from {} to {} entries (added: {:?}, removed: {:?})",
            previous.outlets.len(),
            current.outlets.len(),
            sorted(after.difference(&before)),
            sorted(before.difference(&after)),
        )));
    }

    let before = names(previous.probes.iter().map(|p| p.name.as_str()));
    let after = names(current.probes.iter().map(|p| p.name.as_str()));
    if before != after || previous.probes.len() != current.probes.len() {
        return Err(BridgeError::ProtocolMismatch(format!(
            "probe list changed from {} to {} entries (added: {:?}, removed: {:?})",
            previous.probes.len(),
            current.probes.len(),
            sorted(after.difference(&before)),
            sorted(before.difference(&after)),
        )));
    }

    Ok(())
}

fn names<'a>(items: impl Iterator<Item = &'a str>) -> HashSet<&'a str> {
    items.collect()
}

fn sorted<'a, 'b>(names: impl Iterator<Item = &'b &'a str>) -> Vec<&'a str>
where
    'a: 'b,
{
    let mut names: Vec<&str> = names.copied().collect();
    names.sort_unstable();
    names
}
