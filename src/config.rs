//! Bridge configuration file
//!
//! ```toml
//! [bridge]
//! instance_name = "reef"
//! refresh_interval_seconds = 5
//!
//! [controller]
//! host = "192.168.1.40"
//! username = "admin"
//! password = "1234"
//!
//! [mqtt]
//! host = "broker.local"
//! ```
//!
//! Every key apart from the three hosts and the instance name has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::mapping::{DiffPolicy, Emission};
use crate::mqtt::config::MqttConfig;

pub const CONFIG_ENV_VAR: &str = "APEX_BRIDGE_CONFIG";
const CONFIG_DIR: &str = "apex-mqtt-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BridgeConfig {
    pub bridge: BridgeSettings,
    pub controller: ControllerConfig,
    pub mqtt: MqttConfig,
}

/// Synchronization behaviour (`[bridge]` table)
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BridgeSettings {
    /// Topic root becomes `apex/{instance_name}`
    pub instance_name: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// Suppress outlet updates whose state did not change since the last poll
    #[serde(default = "default_true")]
    pub publish_only_changed_values: bool,
    /// Re-publish probe values on every poll even when unchanged
    #[serde(default = "default_true")]
    pub publish_unchanged_probes: bool,
    /// Consecutive failed polls before the bridge reports itself degraded
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

/// Controller endpoint (`[controller]` table)
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Runtime view of [`BridgeSettings`] consumed by the sync loop
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub refresh_interval: Duration,
    pub policy: DiffPolicy,
    pub failure_threshold: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(default_refresh_interval()),
            policy: DiffPolicy::default(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl BridgeSettings {
    pub fn sync_settings(&self) -> SyncSettings {
        let probes = if self.publish_unchanged_probes {
            Emission::Always
        } else {
            Emission::ChangedOnly
        };

        SyncSettings {
            refresh_interval: Duration::from_secs(self.refresh_interval_seconds),
            policy: DiffPolicy {
                outlets: Emission::from_changed_only(self.publish_only_changed_values),
                probes,
            },
            failure_threshold: self.failure_threshold,
        }
    }
}

impl BridgeConfig {
    /// Reads, parses and validates the file at `path`
    pub async fn load(path: &Path) -> Result<Self, BridgeError> {
        info!("Loading configuration from {}", path.display());

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BridgeError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::from_toml(&content)?;
        debug!(
            "Configuration loaded for instance {} (controller {}, broker {}:{})",
            config.bridge.instance_name, config.controller.host, config.mqtt.host, config.mqtt.port
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        let name = &self.bridge.instance_name;
        if name.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "bridge.instance_name must not be empty".to_string(),
            ));
        }
        if name.contains(['/', '+', '#']) {
            return Err(BridgeError::Configuration(format!(
                "bridge.instance_name {:?} must not contain '/', '+' or '#'",
                name
            )));
        }
        if self.bridge.refresh_interval_seconds == 0 {
            return Err(BridgeError::Configuration(
                "bridge.refresh_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.bridge.failure_threshold == 0 {
            return Err(BridgeError::Configuration(
                "bridge.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.controller.host.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "controller.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(BridgeError::Configuration(
                "mqtt.port must not be 0".to_string(),
            ));
        }
        if self.mqtt.username.is_some() && self.mqtt.password.is_none() {
            return Err(BridgeError::Configuration(
                "mqtt.username is set but mqtt.password is missing".to_string(),
            ));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(BridgeError::Configuration(
                "mqtt.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Config path from the command line, then the environment, then the user
/// config directory
pub fn resolve_config_path(arg: Option<String>) -> Result<PathBuf, BridgeError> {
    if let Some(path) = arg {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let mut path = dirs::config_dir().ok_or_else(|| {
        BridgeError::Configuration(format!(
            "No config directory found; pass a path or set {}",
            CONFIG_ENV_VAR
        ))
    })?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_username() -> String {
    "admin".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [bridge]
        instance_name = "reef"

        [controller]
        host = "192.168.1.40"

        [mqtt]
        host = "broker.local"
    "#;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = BridgeConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(config.bridge.refresh_interval_seconds, 5);
        assert!(config.bridge.publish_only_changed_values);
        assert!(config.bridge.publish_unchanged_probes);
        assert_eq!(config.controller.username, "admin");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "apex-mqtt-bridge");
        assert_eq!(config.mqtt.username, None);
        assert_eq!(config.bridge.sync_settings(), SyncSettings::default());
    }

    #[test]
    fn sync_settings_follow_flags() {
        let mut config = BridgeConfig::from_toml(MINIMAL).unwrap();
        config.bridge.refresh_interval_seconds = 30;
        config.bridge.publish_only_changed_values = false;
        config.bridge.publish_unchanged_probes = false;

        let settings = config.bridge.sync_settings();
        assert_eq!(settings.refresh_interval, Duration::from_secs(30));
        assert_eq!(
            settings.policy,
            DiffPolicy {
                outlets: Emission::Always,
                probes: Emission::ChangedOnly,
            }
        );
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let result = BridgeConfig::from_toml("[bridge]\ninstance_name = \"reef\"\n");
        assert!(matches!(result, Err(BridgeError::Parse(_))));
    }

    fn rejected(mutate: impl Fn(&mut BridgeConfig)) -> bool {
        let mut config = BridgeConfig::from_toml(MINIMAL).unwrap();
        mutate(&mut config);
        matches!(config.validate(), Err(BridgeError::Configuration(_)))
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(rejected(|c| c.bridge.instance_name = " ".into()));
        assert!(rejected(|c| c.bridge.instance_name = "reef/#".into()));
        assert!(rejected(|c| c.bridge.refresh_interval_seconds = 0));
        assert!(rejected(|c| c.bridge.failure_threshold = 0));
        assert!(rejected(|c| c.controller.host = String::new()));
        assert!(rejected(|c| c.mqtt.host = String::new()));
        assert!(rejected(|c| c.mqtt.port = 0));
        assert!(rejected(|c| c.mqtt.username = Some("bridge".into())));
        assert!(rejected(|c| c.mqtt.channel_capacity = 0));
        assert!(!rejected(|c| c.mqtt.password = Some("secret".into())));
    }

    #[tokio::test]
    async fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = BridgeConfig::load(file.path()).await.unwrap();
        assert_eq!(config.bridge.instance_name, "reef");
        assert_eq!(config.mqtt.host, "broker.local");
    }

    #[tokio::test]
    async fn load_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeConfig::load(&dir.path().join("absent.toml")).await;
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_config_path(Some("/etc/apex/bridge.toml".to_string())).unwrap();
        assert_eq!(path, PathBuf::from("/etc/apex/bridge.toml"));
    }
}
