//! CLI configuration: thin wrapper around `skipper_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (`--server`, `--token`, `--insecure`, `--timeout`).

use std::time::Duration;

use secrecy::SecretString;

use skipper_core::{ConnectionConfig, DatasetConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use skipper_config::{
    Config, Profile, config_path, load_config_or_default, save_config, save_datasets, store_token,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.profile_name(global.profile.as_deref())
}

/// The active profile's name and its saved series. `None` when the
/// profile isn't in the config file.
pub fn saved_series(global: &GlobalOpts) -> Option<(String, Vec<DatasetConfig>)> {
    let cfg = load_config_or_default();
    let name = active_profile_name(global, &cfg);
    let datasets = cfg.profiles.get(&name)?.datasets.clone();
    Some((name, datasets))
}

/// Build a `ConnectionConfig` from the config file, the active profile,
/// and flag overrides. Flags win.
pub fn build_connection_config(global: &GlobalOpts) -> Result<ConnectionConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut config = match cfg.profiles.get(&profile_name) {
        Some(profile) => {
            skipper_config::profile_to_connection_config(profile, &profile_name, &cfg.defaults)?
        }
        None if global.profile.is_some() => {
            let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        None => {
            let url_str = global.server.as_deref().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?;
            let mut config = ConnectionConfig::new(parse_url(url_str)?);
            config.discovery_timeout = Duration::from_secs(cfg.defaults.timeout);
            if cfg.defaults.insecure {
                config.tls = TlsVerification::DangerAcceptInvalid;
            }
            config
        }
    };

    apply_overrides(&mut config, global)?;
    Ok(config)
}

/// Build a `ConnectionConfig` for an explicit URL plus flag overrides,
/// ignoring profiles.
pub fn adhoc_connection_config(url: &str, global: &GlobalOpts) -> Result<ConnectionConfig, CliError> {
    let mut config = ConnectionConfig::new(parse_url(url)?);
    apply_overrides(&mut config, global)?;
    config.url = parse_url(url)?;
    Ok(config)
}

fn apply_overrides(config: &mut ConnectionConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ref server) = global.server {
        config.url = parse_url(server)?;
    }
    if let Some(ref token) = global.token {
        config.token = Some(SecretString::from(token.clone()));
    }
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(timeout) = global.timeout {
        config.discovery_timeout = Duration::from_secs(timeout);
        config.validation_timeout = Duration::from_secs(timeout);
    }
    Ok(())
}

fn parse_url(url: &str) -> Result<url::Url, CliError> {
    url.parse().map_err(|_| CliError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {url}"),
    })
}
