//! Server configuration file.
//!
//! Read from the path in `FWCONSOLE_CONFIG`, else `fwconsole.toml` in the
//! working directory.

use std::{collections::HashSet, net::SocketAddr, path::PathBuf};

use anyhow::{Context, bail};
use fwconsole_core::{
    AlertDefinition, Credentials, DeviceKind, DeviceProfile, EngineConfig, RemoteTarget, TargetId,
};
use fwconsole_monitor::SchedulerConfig;
use secrecy::SecretString;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "FWCONSOLE_CONFIG";
const DEFAULT_PATH: &str = "fwconsole.toml";

/// Top-level configuration.
///
/// Fields left out of `[engine]` or `[scheduler.engine]` take the
/// interactive engine defaults.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Engine timing for browser terminals.
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub alerts: Vec<AlertDefinition>,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// One device in the static inventory.
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    pub id: TargetId,
    #[serde(default)]
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub kind: DeviceKind,
    pub username: String,
    pub password: SecretString,
    /// Replaces the built-in prompt patterns when non-empty.
    #[serde(default)]
    pub prompt_patterns: Vec<String>,
    /// Replaces the built-in pager patterns when non-empty.
    #[serde(default)]
    pub pager_patterns: Vec<String>,
    #[serde(default)]
    pub continuation_key: Option<String>,
}

const fn default_port() -> u16 {
    22
}

impl TargetConfig {
    #[must_use]
    pub fn to_target(&self) -> RemoteTarget {
        let mut profile = DeviceProfile::for_kind(self.kind);
        if !self.prompt_patterns.is_empty() {
            profile.prompt_patterns.clone_from(&self.prompt_patterns);
        }
        if !self.pager_patterns.is_empty() {
            profile.pager_patterns.clone_from(&self.pager_patterns);
        }
        if let Some(key) = &self.continuation_key {
            profile.continuation_key.clone_from(key);
        }
        RemoteTarget {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.to_string()),
            host: self.host.clone(),
            port: self.port,
            credentials: Credentials {
                username: self.username.clone(),
                secret: self.password.clone(),
            },
            profile,
        }
    }
}

/// Operator allowed to open terminals.
#[derive(Debug, Deserialize)]
pub struct OperatorConfig {
    pub name: String,
    pub token: SecretString,
}

impl ServerConfig {
    /// Load from `FWCONSOLE_CONFIG` or `fwconsole.toml`.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&text).with_context(|| format!("Invalid config in {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            targets = config.targets.len(),
            alerts = config.alerts.len(),
            operators = config.operators.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns error on malformed TOML or inconsistent content.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut ids = HashSet::new();
        for target in &self.targets {
            if !ids.insert(&target.id) {
                bail!("Duplicate target id: {}", target.id);
            }
        }
        let mut alert_ids = HashSet::new();
        for alert in &self.alerts {
            if !alert_ids.insert(&alert.id) {
                bail!("Duplicate alert id: {}", alert.id);
            }
            if alert.check_interval.is_zero() {
                bail!("Alert {} has a zero check interval", alert.id);
            }
            if let Some(missing) = alert.targets.iter().find(|t| !ids.contains(t)) {
                bail!("Alert {} refers to unknown target {missing}", alert.id);
            }
        }
        if self.scheduler.max_parallel == 0 {
            bail!("scheduler.max_parallel must be at least 1");
        }
        Ok(())
    }

    /// Inventory as connectable targets.
    #[must_use]
    pub fn remote_targets(&self) -> Vec<RemoteTarget> {
        self.targets.iter().map(TargetConfig::to_target).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fwconsole_core::PagerPolicy;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
bind = "0.0.0.0:8080"

[engine]
quiet_window_ms = 600
pager_policy = "manual"

[scheduler]
tick_interval_secs = 15
max_parallel = 4

[[targets]]
id = "fw-01"
name = "Branch firewall"
host = "192.0.2.10"
kind = "fortigate"
username = "admin"
password = "secret"

[[targets]]
id = "asa-01"
host = "192.0.2.20"
port = 2222
kind = "cisco_asa"
username = "monitor"
password = "secret"
prompt_patterns = ['^asa-01[#>]$']

[[alerts]]
id = "wan"
name = "WAN links"
targets = ["fw-01", "asa-01"]
commands = []
device_kind = "fortigate"
interfaces = ["wan1", "wan2"]
check_interval_secs = 300
cooldown_secs = 3600
recipients = ["noc@example.net"]

[[operators]]
name = "alice"
token = "alice-token"
"#;

    #[test]
    fn test_sample_config() {
        let config = ServerConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.engine.quiet_window, Duration::from_millis(600));
        assert_eq!(config.engine.command_timeout, Duration::from_secs(30));
        assert_eq!(config.engine.pager_policy, PagerPolicy::Manual);

        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(15));
        assert_eq!(config.scheduler.max_parallel, 4);
        assert_eq!(config.scheduler.per_target_timeout, Duration::from_secs(90));
        assert_eq!(config.scheduler.engine, EngineConfig::polling());

        let targets = config.remote_targets();
        assert_eq!(targets[0].name, "Branch firewall");
        assert_eq!(targets[0].port, 22);
        assert_eq!(targets[0].credentials.secret.expose_secret(), "secret");
        assert_eq!(targets[1].name, "asa-01");
        assert_eq!(targets[1].address(), "192.0.2.20:2222");
        assert_eq!(targets[1].profile.kind, DeviceKind::CiscoAsa);
        assert_eq!(targets[1].profile.prompt_patterns, vec!["^asa-01[#>]$".to_string()]);

        assert_eq!(config.alerts[0].cooldown, Duration::from_secs(3600));
        assert!(config.alerts[0].watches("wan1"));
        assert!(!config.alerts[0].watches("port5"));
        assert_eq!(config.operators[0].name, "alice");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.bind, default_bind());
        assert_eq!(config.engine, EngineConfig::interactive());
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_alert_with_unknown_target_is_rejected() {
        let text = r#"
[[alerts]]
id = "wan"
name = "WAN"
targets = ["fw-missing"]
commands = []
check_interval_secs = 60
"#;
        let err = ServerConfig::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("unknown target fw-missing"));
    }

    #[test]
    fn test_duplicate_target_is_rejected() {
        let text = r#"
[[targets]]
id = "fw-01"
host = "192.0.2.1"
username = "a"
password = "b"

[[targets]]
id = "fw-01"
host = "192.0.2.2"
username = "a"
password = "b"
"#;
        assert!(ServerConfig::from_toml(text).is_err());
    }
}
