//! Shared configuration for the reowatch daemon.
//!
//! TOML service settings + named camera profiles with environment
//! overrides (figment), password resolution into `SecretString`, and
//! the small persisted JSON store for per-camera options the daemon
//! writes at runtime.

use std::collections::HashMap;
use std::net::SocketAddr;
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
use url::Url;

use reowatch_core::CoreSettings;
use reowatch_core::config::{
    DEFAULT_MOTION_OFF_DELAY, DEFAULT_NAMESPACE, DEFAULT_PLAYBACK_MONTHS, DEFAULT_POLL_INTERVAL,
    DEFAULT_RENEW_INTERVAL, DEFAULT_SUMMARY_INTERVAL,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for camera '{camera}'")]
    NoCredentials { camera: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("camera store serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration for the daemon.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Service-wide settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Named camera profiles.
    #[serde(default)]
    pub cameras: HashMap<String, CameraProfile>,
}

/// Service-wide daemon settings.
#[derive(Debug, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// HTTP listen address for webhooks and media views.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Base URL cameras reach on the local network, used for webhook
    /// callbacks.
    pub internal_url: Option<Url>,

    /// Base URL reachable from outside the local network.
    pub external_url: Option<Url>,

    /// Root directory for thumbnails and persisted state. Defaults to
    /// the platform data directory.
    pub storage_root: Option<PathBuf>,

    /// Topic prefix for bus events.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Seconds a motion sensor stays on after the last positive signal.
    #[serde(default = "default_motion_off_delay")]
    pub motion_off_delay: u64,

    /// Months of recordings exposed through the catalog.
    #[serde(default = "default_playback_months")]
    pub playback_months: u32,

    /// Seconds between subscription renewal cycles.
    #[serde(default = "default_renew_interval")]
    pub renew_interval: u64,

    /// Seconds between fallback state polls. `0` disables polling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Seconds between recording summary sweeps. `0` disables the sweep.
    #[serde(default = "default_summary_interval")]
    pub summary_interval: u64,

    /// Outbound camera request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Listen address of the SMTP alert listener; absent disables it.
    pub smtp_listen: Option<SocketAddr>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            internal_url: None,
            external_url: None,
            storage_root: None,
            namespace: default_namespace(),
            motion_off_delay: default_motion_off_delay(),
            playback_months: default_playback_months(),
            renew_interval: default_renew_interval(),
            poll_interval: default_poll_interval(),
            summary_interval: default_summary_interval(),
            timeout: default_timeout(),
            smtp_listen: None,
        }
    }
}

impl ServiceConfig {
    /// Translate to engine settings.
    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            namespace: self.namespace.clone(),
            motion_off_delay: Duration::from_secs(self.motion_off_delay),
            playback_months: self.playback_months,
            renew_interval: Duration::from_secs(self.renew_interval),
            poll_interval: (self.poll_interval > 0)
                .then(|| Duration::from_secs(self.poll_interval)),
            summary_interval: (self.summary_interval > 0)
                .then(|| Duration::from_secs(self.summary_interval)),
            internal_url: self.internal_url.clone(),
            external_url: self.external_url.clone(),
        }
    }

    /// Resolve the storage root, falling back to the platform default.
    pub fn storage_root_or_default(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(storage_root_default)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8585))
}
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}
fn default_motion_off_delay() -> u64 {
    DEFAULT_MOTION_OFF_DELAY.as_secs()
}
fn default_playback_months() -> u32 {
    DEFAULT_PLAYBACK_MONTHS
}
fn default_renew_interval() -> u64 {
    DEFAULT_RENEW_INTERVAL.as_secs()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}
fn default_summary_interval() -> u64 {
    DEFAULT_SUMMARY_INTERVAL.as_secs()
}
fn default_timeout() -> u64 {
    30
}

/// A named camera connection profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraProfile {
    /// Camera host or IP.
    pub host: String,

    /// Account used for vendor API and ONVIF auth.
    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext password (prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// Use HTTPS for the vendor API.
    #[serde(default)]
    pub https: bool,

    /// ONVIF event service port.
    #[serde(default = "default_onvif_port")]
    pub onvif_port: u16,

    /// Accept the camera's certificate without verification. Cameras
    /// ship self-signed certificates, so this defaults to on.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    /// Override directory for this camera's thumbnails.
    pub thumbnail_path: Option<PathBuf>,
}

impl Default for CameraProfile {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: default_username(),
            password: None,
            password_env: None,
            https: false,
            onvif_port: default_onvif_port(),
            accept_invalid_certs: default_accept_invalid_certs(),
            thumbnail_path: None,
        }
    }
}

impl CameraProfile {
    /// Vendor API base URL for this camera.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}/", self.host)
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "host".into(),
                reason: format!("not a valid host: {}", self.host),
            })
    }
}

fn default_username() -> String {
    "admin".into()
}
fn default_onvif_port() -> u16 {
    8000
}
fn default_accept_invalid_certs() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "reowatch", "reowatch").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default storage root for thumbnails and persisted state.
pub fn storage_root_default() -> PathBuf {
    ProjectDirs::from("com", "reowatch", "reowatch").map_or_else(
        || dirs_fallback().join("data"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("reowatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load configuration from the canonical path plus `REOWATCH_*`
/// environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load configuration from an explicit TOML file plus environment.
/// Nested keys use `__`, e.g. `REOWATCH_SERVICE__BIND_ADDR`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("REOWATCH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning defaults when no file exists.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

/// Serialize config to TOML at an explicit path.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a camera's password: profile-named environment variable,
/// then the conventional `REOWATCH_PASSWORD_<NAME>` variable, then the
/// plaintext config field.
pub fn resolve_password(
    profile: &CameraProfile,
    camera_name: &str,
) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    let conventional = format!(
        "REOWATCH_PASSWORD_{}",
        camera_name.to_uppercase().replace('-', "_")
    );
    if let Ok(val) = std::env::var(&conventional) {
        return Ok(SecretString::from(val));
    }

    if let Some(ref password) = profile.password {
        return Ok(SecretString::from(password.clone()));
    }

    Err(ConfigError::NoCredentials {
        camera: camera_name.into(),
    })
}

// ── Persisted camera store ──────────────────────────────────────────

/// Per-camera options the daemon persists at runtime, keyed by camera
/// id (`<colonless-mac>-<channel>`).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CameraStoreData {
    #[serde(default)]
    pub configs: HashMap<String, CameraOptions>,
}

/// Runtime-adjustable options for one camera.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CameraOptions {
    /// Override directory for the camera's thumbnails.
    pub thumbnail_path: Option<PathBuf>,
}

/// JSON-backed options store under the service storage root.
#[derive(Debug, Clone)]
pub struct CameraStore {
    path: PathBuf,
}

impl CameraStore {
    const FILE: &'static str = "camera_config.json";

    pub fn new(storage_root: &Path) -> Self {
        Self {
            path: storage_root.join(Self::FILE),
        }
    }

    /// Load the store; a missing file is an empty store.
    pub fn load(&self) -> Result<CameraStoreData, ConfigError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(CameraStoreData::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, data: &CameraStoreData) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(data)?)?;
        Ok(())
    }
}
