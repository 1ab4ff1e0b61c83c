//! Daemon error types with miette diagnostics.
//!
//! Maps config and engine failures into user-facing startup errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use reowatch_config::ConfigError;
use reowatch_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    // ── Camera connection ────────────────────────────────────────────

    #[error("Could not connect to camera '{camera}' at {host}")]
    #[diagnostic(
        code(reowatch::connection_failed),
        help(
            "Check that the camera is powered on and reachable.\n\
             Host: {host}\n\
             Try: reowatch check"
        )
    )]
    ConnectionFailed {
        camera: String,
        host: String,
        #[source]
        source: reowatch_api::Error,
    },

    #[error("Authentication failed for camera '{camera}'")]
    #[diagnostic(
        code(reowatch::auth_failed),
        help(
            "Verify the username and password for this camera.\n\
             Set `password` or `password_env` under [cameras.{camera}],\n\
             or export REOWATCH_PASSWORD_<NAME>."
        )
    )]
    AuthFailed {
        camera: String,
        #[source]
        source: reowatch_api::Error,
    },

    #[error("No credentials configured for camera '{camera}'")]
    #[diagnostic(
        code(reowatch::no_credentials),
        help(
            "Set `password` or `password_env` under [cameras.{camera}],\n\
             or export REOWATCH_PASSWORD_<NAME>."
        )
    )]
    NoCredentials { camera: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file not found at {path}")]
    #[diagnostic(
        code(reowatch::no_config),
        help("Create one with: reowatch config init")
    )]
    NoConfig { path: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(reowatch::config_exists),
        help("Edit it in place, or remove it before running `config init` again.")
    )]
    ConfigExists { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(reowatch::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(reowatch::config))]
    Config(#[from] ConfigError),

    // ── Engine / IO ──────────────────────────────────────────────────

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NoConfig { .. }
            | Self::ConfigExists { .. }
            | Self::Validation { .. }
            | Self::Config(_) => exit_code::USAGE,
            Self::Core(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }

    /// Classify a failed camera call during startup. Auth rejections get
    /// the credentials diagnostic; everything else reads as unreachable.
    pub fn from_camera_error(camera: &str, host: &str, err: reowatch_api::Error) -> Self {
        if err.is_auth() {
            Self::AuthFailed {
                camera: camera.to_owned(),
                source: err,
            }
        } else {
            Self::ConnectionFailed {
                camera: camera.to_owned(),
                host: host.to_owned(),
                source: err,
            }
        }
    }
}
