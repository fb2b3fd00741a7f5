//! Shared configuration for homelink hosts.
//!
//! TOML profiles, credential resolution (env + plaintext), and translation
//! into the runtime types of `homelink_api` and `homelink_core`: channel
//! bindings, rate-limit/stream/monitor tuning and a ready `ApplianceClient`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use homelink_api::transport::DEFAULT_API_URL;
use homelink_api::{
    ApplianceClient, CredentialProvider, RateLimitConfig, RateLimiter, ReconnectConfig,
    StaticTokenProvider, TransportConfig,
};
use homelink_core::{ChannelConfig, CoreError, MonitorConfig, config::DEFAULT_DRIVER_ID};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("invalid channel: {0}")]
    Channel(#[from] CoreError),

    #[error("failed to build client: {0}")]
    Client(#[from] homelink_api::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// One account and the appliances bound under it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// API base URL; point at the simulator for development.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// User the bearer token belongs to.
    pub identity: String,

    /// Access token (plaintext, prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable name containing the access token.
    pub token_env: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Optional HTTP proxy URL.
    pub proxy: Option<String>,

    /// Longest wait for a read permit, in seconds. `0` waits forever.
    #[serde(default = "default_max_wait")]
    pub max_wait: u64,

    #[serde(default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay: u64,

    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay: u64,

    /// Stream reconnect attempts before giving up. Unset retries forever.
    pub reconnect_max_retries: Option<u32>,

    /// Keepalive watchdog period in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    #[serde(default = "default_max_missed_keepalives")]
    pub max_missed_keepalives: u32,

    #[serde(default = "default_degraded_after_misses")]
    pub degraded_after_misses: u32,

    /// Reported with connection-interrupted notifications.
    pub driver_id: Option<String>,

    /// Channel bindings in `RESOURCE@haId` syntax.
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

/// A channel as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelEntry {
    pub id: String,
    pub address: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_timeout() -> u64 {
    30
}
fn default_max_wait() -> u64 {
    150
}
fn default_reconnect_initial_delay() -> u64 {
    1
}
fn default_reconnect_max_delay() -> u64 {
    30
}
fn default_keepalive_interval() -> u64 {
    30
}
fn default_max_missed_keepalives() -> u32 {
    6
}
fn default_degraded_after_misses() -> u32 {
    3
}

impl Profile {
    /// A profile with every tunable at its default.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            api_url: default_api_url(),
            identity: identity.into(),
            token: None,
            token_env: None,
            timeout: default_timeout(),
            proxy: None,
            max_wait: default_max_wait(),
            reconnect_initial_delay: default_reconnect_initial_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
            reconnect_max_retries: None,
            keepalive_interval: default_keepalive_interval(),
            max_missed_keepalives: default_max_missed_keepalives(),
            degraded_after_misses: default_degraded_after_misses(),
            driver_id: None,
            channels: Vec::new(),
        }
    }

    pub fn api_url(&self) -> Result<Url, ConfigError> {
        self.api_url.parse().map_err(|_| ConfigError::Validation {
            field: "api_url".into(),
            reason: format!("invalid URL: {}", self.api_url),
        })
    }

    /// Parse every channel address. Channel ids must be unique.
    pub fn channels(&self) -> Result<Vec<ChannelConfig>, ConfigError> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .map(|entry| {
                if !seen.insert(entry.id.as_str()) {
                    return Err(ConfigError::Validation {
                        field: "channels".into(),
                        reason: format!("duplicate channel id '{}'", entry.id),
                    });
                }
                Ok(ChannelConfig::from_address(&entry.id, &entry.address)?)
            })
            .collect()
    }

    /// Channels grouped by appliance, one group per monitor.
    pub fn channels_by_appliance(
        &self,
    ) -> Result<HashMap<String, Vec<ChannelConfig>>, ConfigError> {
        let mut grouped: HashMap<String, Vec<ChannelConfig>> = HashMap::new();
        for channel in self.channels()? {
            grouped
                .entry(channel.appliance_id.clone())
                .or_default()
                .push(channel);
        }
        Ok(grouped)
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        if self.keepalive_interval == 0 {
            return Err(ConfigError::Validation {
                field: "keepalive_interval".into(),
                reason: "must be at least one second".into(),
            });
        }
        if self.max_missed_keepalives == 0 {
            return Err(ConfigError::Validation {
                field: "max_missed_keepalives".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.degraded_after_misses > self.max_missed_keepalives {
            return Err(ConfigError::Validation {
                field: "degraded_after_misses".into(),
                reason: format!(
                    "{} exceeds max_missed_keepalives ({})",
                    self.degraded_after_misses, self.max_missed_keepalives
                ),
            });
        }

        Ok(MonitorConfig {
            driver_id: self
                .driver_id
                .clone()
                .unwrap_or_else(|| DEFAULT_DRIVER_ID.into()),
            keepalive_interval: Duration::from_secs(self.keepalive_interval),
            max_missed_keepalives: self.max_missed_keepalives,
            degraded_after_misses: self.degraded_after_misses,
        })
    }

    /// Default buckets with the profile's max wait.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_wait: (self.max_wait > 0).then(|| Duration::from_secs(self.max_wait)),
            ..RateLimitConfig::default()
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_secs(self.reconnect_initial_delay),
            max_delay: Duration::from_secs(self.reconnect_max_delay),
            max_retries: self.reconnect_max_retries,
        }
    }

    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let proxy = self
            .proxy
            .as_deref()
            .map(|raw| {
                raw.parse::<Url>().map_err(|_| ConfigError::Validation {
                    field: "proxy".into(),
                    reason: format!("invalid URL: {raw}"),
                })
            })
            .transpose()?;

        Ok(TransportConfig {
            timeout: Duration::from_secs(self.timeout),
            proxy,
            ..TransportConfig::default()
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "homelink", "homelink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("homelink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HOMELINK_").split("_"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the access token: the profile's env var first, then plaintext.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            debug!(profile = profile_name, source = "env", "access token resolved");
            return Ok(SecretString::from(val));
        }
    }

    if let Some(ref token) = profile.token {
        debug!(profile = profile_name, source = "config", "access token resolved");
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// A credential provider serving the profile's static token.
pub fn credential_provider(
    profile: &Profile,
    profile_name: &str,
) -> Result<Arc<dyn CredentialProvider>, ConfigError> {
    let token = resolve_token(profile, profile_name)?;
    Ok(Arc::new(StaticTokenProvider::new(profile.identity.clone(), token)))
}

/// Build an `ApplianceClient` from a profile with its own rate limiter.
pub fn profile_to_client(
    profile: &Profile,
    profile_name: &str,
) -> Result<ApplianceClient, ConfigError> {
    let url = profile.api_url()?;
    let provider = credential_provider(profile, profile_name)?;
    let limiter = Arc::new(RateLimiter::new(profile.rate_limit_config()));
    let transport = profile.transport_config()?;

    let client = ApplianceClient::connect(
        url,
        profile.identity.clone(),
        provider,
        limiter,
        &transport,
    )?;
    Ok(client)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use homelink_api::Resource;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[profiles.home]
identity = "someone@example.com"
token = "plain-token"
max_wait = 0
reconnect_max_retries = 5
keepalive_interval = 20

[[profiles.home.channels]]
id = "fridge-door"
address = "DOOR_STATE@SIEMENS-KI36FP60-68A40E1A1C2B"

[[profiles.home.channels]]
id = "fridge-eco"
address = "fridge-eco-mode@SIEMENS-KI36FP60-68A40E1A1C2B"

[[profiles.home.channels]]
id = "washer-left"
address = "WASHER_TIME_LEFT@BOSCH-WAT28400-000000000001"
"#;

    fn write_sample(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn loads_profile_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&write_sample(&dir)).unwrap();

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(profile.api_url, DEFAULT_API_URL);
        assert_eq!(profile.timeout, 30);
        assert_eq!(profile.reconnect_max_retries, Some(5));
        assert_eq!(profile.channels.len(), 3);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
        assert!(matches!(
            config.profile(None),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn channels_parse_and_group_by_appliance() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&write_sample(&dir)).unwrap();
        let (_, profile) = config.profile(Some("home")).unwrap();

        let channels = profile.channels().unwrap();
        assert_eq!(channels[1].resource, &Resource::FRIDGE_ECO_MODE);

        let grouped = profile.channels_by_appliance().unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["SIEMENS-KI36FP60-68A40E1A1C2B"].len(), 2);
    }

    #[test]
    fn duplicate_or_bad_channels_are_rejected() {
        let mut profile = Profile::new("someone@example.com");
        profile.channels = vec![
            ChannelEntry {
                id: "door".into(),
                address: "DOOR_STATE@HA1".into(),
            },
            ChannelEntry {
                id: "door".into(),
                address: "POWER_STATE@HA1".into(),
            },
        ];
        assert!(matches!(profile.channels(), Err(ConfigError::Validation { .. })));

        profile.channels.truncate(1);
        profile.channels[0].address = "DOOR_STATE".into();
        assert!(matches!(profile.channels(), Err(ConfigError::Channel(_))));
    }

    #[test]
    fn tuning_translates_to_runtime_configs() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&write_sample(&dir)).unwrap();
        let (_, profile) = config.profile(None).unwrap();

        assert_eq!(profile.rate_limit_config().max_wait, None);
        assert_eq!(
            Profile::new("x").rate_limit_config().max_wait,
            Some(Duration::from_secs(150))
        );

        let reconnect = profile.reconnect_config();
        assert_eq!(reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(reconnect.max_retries, Some(5));

        let monitor = profile.monitor_config().unwrap();
        assert_eq!(monitor.keepalive_interval, Duration::from_secs(20));
        assert_eq!(monitor.max_missed_keepalives, 6);
        assert_eq!(monitor.driver_id, "homeconnect");
    }

    #[test]
    fn monitor_tuning_is_validated() {
        let mut profile = Profile::new("x");
        profile.degraded_after_misses = 7;
        assert!(matches!(
            profile.monitor_config(),
            Err(ConfigError::Validation { field, .. }) if field == "degraded_after_misses"
        ));

        profile.degraded_after_misses = 3;
        profile.keepalive_interval = 0;
        assert!(profile.monitor_config().is_err());
    }

    #[test]
    fn token_resolution_order() {
        let mut profile = Profile::new("someone@example.com");
        assert!(matches!(
            resolve_token(&profile, "home"),
            Err(ConfigError::NoCredentials { profile }) if profile == "home"
        ));

        profile.token = Some("plain".into());
        profile.token_env = Some("HOMELINK_TEST_TOKEN_THAT_IS_NEVER_SET".into());
        assert_eq!(resolve_token(&profile, "home").unwrap().expose_secret(), "plain");
    }

    #[test]
    fn invalid_urls_are_validation_errors() {
        let mut profile = Profile::new("x");
        profile.api_url = "not a url".into();
        assert!(matches!(profile.api_url(), Err(ConfigError::Validation { .. })));

        profile.api_url = DEFAULT_API_URL.into();
        profile.proxy = Some("::".into());
        assert!(profile.transport_config().is_err());
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut profile = Profile::new("someone@example.com");
        profile.token_env = Some("HC_TOKEN".into());
        profile.channels.push(ChannelEntry {
            id: "door".into(),
            address: "DOOR_STATE@HA1".into(),
        });
        let mut config = Config::default();
        config.profiles.insert("default".into(), profile);

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        let (_, profile) = loaded.profile(None).unwrap();
        assert_eq!(profile.token_env.as_deref(), Some("HC_TOKEN"));
        assert_eq!(profile.channels[0].address, "DOOR_STATE@HA1");
    }

    #[test]
    fn profile_builds_client() {
        let mut profile = Profile::new("someone@example.com");
        profile.token = Some("plain".into());
        assert!(profile_to_client(&profile, "default").is_ok());

        profile.token = None;
        assert!(matches!(
            profile_to_client(&profile, "default"),
            Err(ConfigError::NoCredentials { .. })
        ));
    }
}
