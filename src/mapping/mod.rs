//! Translation between controller state and the MQTT topic namespace.
//!
//! Outbound, snapshots are compared by the [`diff`] engine and turned into
//! topic/value pairs below the layout root. Inbound, the [`translator`]
//! resolves command topics through the current [`TopicMap`] maintained in the
//! [`TopicRegistry`].

pub mod diff;
pub mod slug;
pub mod topics;
pub mod translator;

pub use diff::{check_shape, diff, DiffPolicy, Emission, Update};
pub use slug::slug;
pub use topics::{initial_publish_set, retired_topics, TopicLayout, TopicMap, TopicRegistry};
pub use translator::{Command, CommandTranslator};
