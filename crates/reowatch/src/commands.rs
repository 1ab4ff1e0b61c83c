//! Subcommand handlers for the daemon CLI.

use std::path::PathBuf;

use reowatch_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::AppError;

/// Commented profile block appended to freshly initialized config files.
const PROFILE_EXAMPLE: &str = "\n\
# [cameras.yard]\n\
# host = \"192.168.1.10\"\n\
# username = \"admin\"\n\
# password_env = \"REOWATCH_PASSWORD_YARD\"\n";

// ── Config loading ──────────────────────────────────────────────────

/// Load the effective configuration. An explicit `--config` pointing at
/// a missing file is an error; the default location quietly falls back
/// to defaults plus environment overrides.
pub fn load_config(global: &GlobalOpts) -> Result<Config, AppError> {
    match &global.config {
        Some(path) if !path.exists() => Err(AppError::NoConfig {
            path: path.display().to_string(),
        }),
        Some(path) => Ok(config::load_config_from(path)?),
        None => Ok(config::load_config()?),
    }
}

fn effective_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

// ── config ──────────────────────────────────────────────────────────

pub fn config_cmd(args: ConfigArgs, global: &GlobalOpts) -> Result<(), AppError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = load_config(global)?;
            println!("{}", render(&cfg)?);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", effective_path(global).display());
            Ok(())
        }

        ConfigCommand::Init => {
            let path = effective_path(global);
            if path.exists() {
                return Err(AppError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut body = render(&Config::default())?;
            body.push_str(PROFILE_EXAMPLE);
            std::fs::write(&path, body)?;
            eprintln!("✓ Configuration written to {}", path.display());
            eprintln!("  Add your cameras under [cameras.<name>] and run: reowatch check");
            Ok(())
        }
    }
}

fn render(cfg: &Config) -> Result<String, AppError> {
    toml::to_string_pretty(cfg).map_err(|err| AppError::Validation {
        field: "config".into(),
        reason: format!("failed to serialize config: {err}"),
    })
}

// ── check ───────────────────────────────────────────────────────────

/// Validate the configuration offline: every camera profile must yield
/// a usable base URL and a resolvable password. No camera is contacted.
pub fn check(global: &GlobalOpts) -> Result<(), AppError> {
    let cfg = load_config(global)?;
    if cfg.cameras.is_empty() {
        eprintln!("No cameras configured. Add [cameras.<name>] sections first.");
        return Ok(());
    }

    let mut failures = 0usize;
    let mut profiles: Vec<_> = cfg.cameras.iter().collect();
    profiles.sort_by(|a, b| a.0.cmp(b.0));
    for (name, profile) in profiles {
        match validate_profile(name, profile) {
            Ok(url) => println!("{name}: ok ({url})"),
            Err(err) => {
                failures += 1;
                eprintln!("{:?}", miette::Report::new(err));
            }
        }
    }

    if failures > 0 {
        return Err(AppError::Validation {
            field: "cameras".into(),
            reason: format!("{failures} camera profile(s) failed validation"),
        });
    }
    eprintln!("✓ Configuration valid");
    Ok(())
}

fn validate_profile(
    name: &str,
    profile: &config::CameraProfile,
) -> Result<url::Url, AppError> {
    let url = profile.base_url()?;
    config::resolve_password(profile, name).map_err(|_| AppError::NoCredentials {
        camera: name.to_owned(),
    })?;
    Ok(url)
}
