//! Server settings.
//!
//! Layered: built-in defaults, then an optional TOML file, then `RELAY__*`
//! environment variables (`RELAY__SERVER__PORT=9000`).

use std::time::Duration;

use config::{Config, Environment, File};
use relay_core::AdminKey;
use relay_gateway::{GatewayConfig, objects::DEFAULT_MAX_BYTES};
use relay_hub::HubConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable holding the administrative key seed.
pub const ADMIN_KEY_VAR: &str = "RELAY_ADMIN_KEY";

/// Startup configuration error. Fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RELAY_ADMIN_KEY must be set to a non-empty value")]
    MissingAdminKey,
    #[error("invalid settings: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub max_history: usize,
    pub max_upload_bytes: usize,
    pub max_object_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        let gateway = GatewayConfig::default();
        Self {
            max_history: gateway.max_history,
            max_upload_bytes: gateway.max_upload_bytes,
            max_object_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub rotation_secs: u64,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self { rotation_secs: 300 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
    pub send_timeout_ms: u64,
    pub session_queue: usize,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            send_timeout_ms: 2000,
            session_queue: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    pub pull_ttl_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self { pull_ttl_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PurgeSettings {
    pub daily: bool,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self { daily: true }
    }
}

/// All server settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub credentials: CredentialSettings,
    pub heartbeat: HeartbeatSettings,
    pub presence: PresenceSettings,
    pub purge: PurgeSettings,
}

impl Settings {
    /// Load settings from `path` (extension optional, file optional) and the
    /// process environment.
    ///
    /// # Errors
    /// Returns error if the file or an environment override does not parse,
    /// or a period is zero.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`Settings::load`], reading overrides from `env` instead of the
    /// process environment when given.
    ///
    /// # Errors
    /// Returns error if the file or an environment override does not parse,
    /// or a period is zero.
    pub fn load_with_env(
        path: &str,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize::<Self>()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::Zero("heartbeat.interval_secs"));
        }
        if self.credentials.rotation_secs == 0 {
            return Err(ConfigError::Zero("credentials.rotation_secs"));
        }
        Ok(())
    }

    /// Gateway tuning derived from these settings.
    #[must_use]
    pub const fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_history: self.relay.max_history,
            max_upload_bytes: self.relay.max_upload_bytes,
            pull_presence_ttl: Duration::from_secs(self.presence.pull_ttl_secs),
            hub: HubConfig {
                send_timeout: Duration::from_millis(self.heartbeat.send_timeout_ms),
                queue_capacity: self.heartbeat.session_queue,
            },
        }
    }

    /// Heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    /// Maximum credential age.
    #[must_use]
    pub const fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.credentials.rotation_secs)
    }
}

/// Build the administrative key from the seed variable's value.
///
/// # Errors
/// Returns error if the seed is unset or blank.
pub fn admin_key(seed: Option<&str>) -> Result<AdminKey, ConfigError> {
    seed.and_then(AdminKey::from_seed)
        .ok_or(ConfigError::MissingAdminKey)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn no_file() -> String {
        "definitely/not/here/relay".to_owned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load_with_env(&no_file(), Some(config::Map::new())).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.relay.max_history, 1000);
        assert_eq!(settings.relay.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.relay.max_object_bytes, 64 * 1024 * 1024);
        assert_eq!(settings.rotation_interval(), Duration::from_secs(300));
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(30));
        assert!(settings.purge.daily);

        let gateway = settings.gateway_config();
        assert_eq!(gateway.hub.send_timeout, Duration::from_secs(2));
        assert_eq!(gateway.hub.queue_capacity, 256);
        assert_eq!(gateway.pull_presence_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_file_then_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("relay.toml"),
            r#"
                [server]
                host = "0.0.0.0"
                port = 9000

                [purge]
                daily = false
            "#,
        )
        .unwrap();
        let path = dir.path().join("relay");

        let env = config::Map::from([
            ("RELAY__SERVER__PORT".to_owned(), "9100".to_owned()),
            ("RELAY__RELAY__MAX_HISTORY".to_owned(), "50".to_owned()),
        ]);
        let settings = Settings::load_with_env(path.to_str().unwrap(), Some(env)).unwrap();

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.relay.max_history, 50);
        assert!(!settings.purge.daily);
        assert_eq!(settings.heartbeat.interval_secs, 30);
    }

    #[test]
    fn test_bad_value_is_an_error() {
        let env = config::Map::from([("RELAY__SERVER__PORT".to_owned(), "many".to_owned())]);
        assert!(matches!(
            Settings::load_with_env(&no_file(), Some(env)),
            Err(ConfigError::Settings(_))
        ));
    }

    #[test]
    fn test_zero_periods_rejected() {
        let env = config::Map::from([("RELAY__HEARTBEAT__INTERVAL_SECS".to_owned(), "0".to_owned())]);
        assert!(matches!(
            Settings::load_with_env(&no_file(), Some(env)),
            Err(ConfigError::Zero("heartbeat.interval_secs"))
        ));

        let env = config::Map::from([("RELAY__CREDENTIALS__ROTATION_SECS".to_owned(), "0".to_owned())]);
        assert!(matches!(
            Settings::load_with_env(&no_file(), Some(env)),
            Err(ConfigError::Zero("credentials.rotation_secs"))
        ));
    }

    #[test]
    fn test_admin_key_required() {
        assert!(matches!(admin_key(None), Err(ConfigError::MissingAdminKey)));
        assert!(matches!(admin_key(Some("  ")), Err(ConfigError::MissingAdminKey)));
        assert!(admin_key(Some("seed")).is_ok());
    }
}
