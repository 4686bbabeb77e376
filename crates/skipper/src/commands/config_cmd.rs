//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking tokens.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "server = \"{}\"", p.server);
        let _ = writeln!(out, "proxy_enabled = {}", p.proxy_enabled);
        let _ = writeln!(out, "subscribe_all = {}", p.subscribe_all);
        if p.token.is_some() {
            let _ = writeln!(out, "token = \"****\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(ref intervals) = p.http_retry_intervals_ms {
            let _ = writeln!(out, "http_retry_intervals_ms = {intervals:?}");
        }
        if let Some(max) = p.max_http_retries {
            let _ = writeln!(out, "max_http_retries = {max}");
        }
        if !p.datasets.is_empty() {
            let _ = writeln!(out, "# {} saved series", p.datasets.len());
        }
    }

    out.trim_end().to_owned()
}

fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some("****".into());
        }
    }
    cfg
}

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init {
            server,
            proxy,
            subscribe_all,
            default,
        } => {
            server.parse::<url::Url>().map_err(|_| CliError::Validation {
                field: "server".into(),
                reason: format!("invalid URL: {server}"),
            })?;

            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let mut profile = cfg.profiles.remove(&profile_name).unwrap_or_default();
            profile.server = server;
            profile.proxy_enabled = proxy;
            profile.subscribe_all = subscribe_all;
            if global.insecure {
                profile.insecure = Some(true);
            }
            cfg.profiles.insert(profile_name.clone(), profile);
            if default || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(profile_name.clone());
            }
            config::save_config(&cfg)?;

            eprintln!(
                "Profile '{profile_name}' saved to {}",
                config::config_path().display()
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(
                &global.output,
                &redacted(&cfg),
                format_config_redacted,
                |c| {
                    let mut names: Vec<&str> = c.profiles.keys().map(String::as_str).collect();
                    names.sort_unstable();
                    names.join("\n")
                },
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::SetToken { value } => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let token = match value {
                Some(token) => token,
                None => rpassword::prompt_password(format!("Token for '{profile_name}': "))
                    .map_err(prompt_err)?,
            };
            if token.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }
            config::store_token(&profile_name, token.trim())?;
            eprintln!("Token for '{profile_name}' stored in system keyring");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    #[test]
    fn tokens_are_masked() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "boat".into(),
            Profile {
                token: Some("secret".into()),
                ..Profile::new("http://boat.local:3000")
            },
        );
        let text = format_config_redacted(&cfg);
        assert!(text.contains("[profiles.boat]"));
        assert!(text.contains("token = \"****\""));
        assert!(!text.contains("secret"));

        let masked = redacted(&cfg);
        assert_eq!(masked.profiles["boat"].token.as_deref(), Some("****"));
    }
}
