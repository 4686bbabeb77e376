//! Shared configuration for Skipper tools.
//!
//! TOML profiles, bearer-token resolution (env + keyring + plaintext),
//! translation to `skipper_core::ConnectionConfig`, and the persisted list
//! of user-defined series. The CLI layers its flags on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
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

use skipper_core::{ConnectionConfig, DatasetConfig, RetryPolicy, TlsVerification};

const KEYRING_SERVICE: &str = "skipper";
const TOKEN_ENV: &str = "SKIPPER_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("keyring unavailable: {0}")]
    Keyring(#[from] keyring::Error),

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
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: `requested`, else the configured
    /// default, else `"default"`.
    pub fn profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub insecure: bool,

    /// Discovery timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    10
}

/// A named Signal K server profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Server base URL (e.g. "http://boat.local:3000").
    pub server: String,

    /// Rewrite advertised service URLs onto `server`.
    #[serde(default)]
    pub proxy_enabled: bool,

    #[serde(default)]
    pub subscribe_all: bool,

    /// Bearer token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Accept self-signed certificates.
    pub insecure: Option<bool>,

    /// Discovery timeout override, in seconds.
    pub timeout: Option<u64>,

    /// Discovery backoff ladder override.
    pub http_retry_intervals_ms: Option<Vec<u64>>,

    pub max_http_retries: Option<u32>,

    /// User-defined series, restored on start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<DatasetConfig>,
}

impl Profile {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "skipper", "skipper").map_or_else(
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
    p.push("skipper");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` layered over defaults, with `SKIPPER_` environment
/// overrides on top (`SKIPPER_DEFAULTS__TIMEOUT=5`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SKIPPER_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
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
    debug!(path = %path.display(), "config saved");
    Ok(())
}

/// Replace a profile's persisted series with the user-managed entries of
/// `datasets` and save to the canonical path.
pub fn save_datasets(profile_name: &str, datasets: &[DatasetConfig]) -> Result<(), ConfigError> {
    save_datasets_to(&config_path(), profile_name, datasets)
}

pub fn save_datasets_to(
    path: &Path,
    profile_name: &str,
    datasets: &[DatasetConfig],
) -> Result<(), ConfigError> {
    let mut cfg = load_config_from(path)?;
    let profile = cfg
        .profiles
        .get_mut(profile_name)
        .ok_or_else(|| ConfigError::UnknownProfile {
            profile: profile_name.into(),
        })?;
    // Widget-owned series are recreated by their widgets.
    profile.datasets = datasets.iter().filter(|d| d.editable).cloned().collect();
    save_config_to(&cfg, path)
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{profile_name}/token"),
    )?)
}

/// Resolve the bearer token for a profile, if any.
///
/// Order: the env var named by `token_env`, `SKIPPER_TOKEN`, the system
/// keyring, then plaintext in the config. A server without security needs
/// no token, so absence is not an error.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    resolve_token_with(
        profile,
        |name| std::env::var(name).ok(),
        || {
            keyring_entry(profile_name)
                .ok()
                .and_then(|entry| entry.get_password().ok())
        },
    )
}

fn resolve_token_with(
    profile: &Profile,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl FnOnce() -> Option<String>,
) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(token) = profile.token_env.as_deref().and_then(&env) {
        return Some(SecretString::from(token));
    }

    // 2. Global env var
    if let Some(token) = env(TOKEN_ENV) {
        return Some(SecretString::from(token));
    }

    // 3. System keyring
    if let Some(token) = keyring() {
        return Some(SecretString::from(token));
    }

    // 4. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(token)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ConnectionConfig` from a profile, with no flag overrides.
pub fn profile_to_connection_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ConnectionConfig, ConfigError> {
    let url: url::Url = profile.server.parse().map_err(|_| ConfigError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {}", profile.server),
    })?;

    let mut config = ConnectionConfig::new(url);
    config.token = resolve_token(profile, profile_name);
    apply_profile(&mut config, profile, defaults)?;
    Ok(config)
}

fn apply_profile(
    config: &mut ConnectionConfig,
    profile: &Profile,
    defaults: &Defaults,
) -> Result<(), ConfigError> {
    config.proxy_enabled = profile.proxy_enabled;
    config.subscribe_all = profile.subscribe_all;
    if profile.insecure.unwrap_or(defaults.insecure) {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    config.discovery_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    let mut retry = RetryPolicy::default();
    if let Some(ref intervals) = profile.http_retry_intervals_ms {
        if intervals.is_empty() {
            return Err(ConfigError::Validation {
                field: "http_retry_intervals_ms".into(),
                reason: "at least one interval is required".into(),
            });
        }
        retry.http_retry_intervals = intervals.iter().copied().map(Duration::from_millis).collect();
    }
    if let Some(max) = profile.max_http_retries {
        retry.max_http_retries = max;
    }
    config.retry = retry;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;
    use skipper_core::TimeScale;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn token_chain_order() {
        let profile = Profile {
            token: Some("plain".into()),
            token_env: Some("BOAT_TOKEN".into()),
            ..Profile::new("http://boat.local:3000")
        };

        let env = |name: &str| (name == "BOAT_TOKEN").then(|| "from-env".to_owned());
        let token = resolve_token_with(&profile, env, || Some("from-keyring".into())).unwrap();
        assert_eq!(token.expose_secret(), "from-env");

        let global = |name: &str| (name == TOKEN_ENV).then(|| "global".to_owned());
        let token = resolve_token_with(&profile, global, || Some("from-keyring".into())).unwrap();
        assert_eq!(token.expose_secret(), "global");

        let token = resolve_token_with(&profile, no_env, || Some("from-keyring".into())).unwrap();
        assert_eq!(token.expose_secret(), "from-keyring");

        let token = resolve_token_with(&profile, no_env, || None).unwrap();
        assert_eq!(token.expose_secret(), "plain");
    }

    #[test]
    fn no_token_is_fine() {
        let profile = Profile::new("http://boat.local:3000");
        assert!(resolve_token_with(&profile, no_env, || None).is_none());
    }

    #[test]
    fn profile_overrides_apply() {
        let profile = Profile {
            proxy_enabled: true,
            insecure: Some(true),
            timeout: Some(3),
            http_retry_intervals_ms: Some(vec![100, 200]),
            max_http_retries: Some(7),
            ..Profile::new("https://boat.local")
        };
        let mut config = ConnectionConfig::new("https://boat.local".parse().unwrap());
        apply_profile(&mut config, &profile, &Defaults::default()).unwrap();

        assert!(config.proxy_enabled);
        assert_eq!(config.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(config.discovery_timeout, Duration::from_secs(3));
        assert_eq!(config.retry.max_http_retries, 7);
        assert_eq!(config.retry.http_retry_delay(5), Duration::from_millis(200));
    }

    #[test]
    fn empty_retry_ladder_is_rejected() {
        let profile = Profile {
            http_retry_intervals_ms: Some(Vec::new()),
            ..Profile::new("http://boat.local")
        };
        let mut config = ConnectionConfig::new("http://boat.local".parse().unwrap());
        let err = apply_profile(&mut config, &profile, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn invalid_server_url() {
        let profile = Profile::new("not a url");
        let err = profile_to_connection_config(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(err.to_string().contains("invalid server"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles
            .insert("default".into(), Profile::new("http://boat.local:3000"));
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profile_name(None), "default");
        assert_eq!(loaded.profile("default").unwrap().server, "http://boat.local:3000");
        assert!(matches!(
            loaded.profile("missing"),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.defaults.timeout, 10);
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn datasets_persist_user_series_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles
            .insert("boat".into(), Profile::new("http://boat.local:3000"));
        save_config_to(&cfg, &path).unwrap();

        let user = DatasetConfig::new("self.navigation.speedOverGround", "default", TimeScale::Hour(1));
        let widget = DatasetConfig {
            editable: false,
            ..DatasetConfig::new("self.environment.depth.belowKeel", "default", TimeScale::LastMinute)
        };
        save_datasets_to(&path, "boat", &[user.clone(), widget]).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profile("boat").unwrap().datasets, vec![user]);
        assert!(matches!(
            save_datasets_to(&path, "nope", &[]),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }
}
