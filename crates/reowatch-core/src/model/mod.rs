//! Domain types shared across the engine.

pub mod identity;
pub mod vod;

pub use identity::{CameraId, InvalidCameraId, MacAddress};
pub use vod::{ThumbnailRef, VodEvent};
