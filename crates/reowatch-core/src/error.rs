//! Error types for the core engine.

use crate::model::{CameraId, MacAddress};

/// Errors produced by registry, coordinator, and catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A camera API call failed. Wraps transport, auth, and protocol errors
    /// from the client layer.
    #[error(transparent)]
    Api(#[from] reowatch_api::Error),

    /// The device is not present in the registry.
    #[error("Unknown device {device_id}")]
    UnknownDevice { device_id: MacAddress },

    /// The camera (device + channel) is not present in the registry.
    #[error("Unknown camera {camera_id}")]
    UnknownCamera { camera_id: CameraId },

    /// The event does not exist or the caller is not authorized to see it.
    /// Both cases produce this exact variant so HTTP surfaces map them to an
    /// indistinguishable 404.
    #[error("Unknown event {event_id}")]
    UnknownEvent { event_id: String },

    /// A browse path that does not parse or points at a level with nothing
    /// behind it.
    #[error("Invalid browse path {path:?}")]
    InvalidBrowsePath { path: String },

    /// Service configuration prevents the operation (e.g. no reachable
    /// callback URL for push subscriptions).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Filesystem failures from the thumbnail store.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A background task was cancelled or its handle was lost.
    #[error("Background task failed: {message}")]
    Task { message: String },
}

impl CoreError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api(err) => err.is_transient(),
            Self::Storage(_) | Self::Task { .. } => true,
            Self::UnknownDevice { .. }
            | Self::UnknownCamera { .. }
            | Self::UnknownEvent { .. }
            | Self::InvalidBrowsePath { .. }
            | Self::Configuration { .. } => false,
        }
    }
}
