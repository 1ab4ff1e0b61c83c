// reowatch-api: Async Rust client for Reolink cameras (JSON command API + ONVIF events)

pub mod client;
pub mod error;
pub mod model;
pub mod notification;
pub mod onvif;
pub mod transport;

pub use client::{CameraClient, Credentials, HttpCameraClient};
pub use error::Error;
pub use onvif::{OnvifSubscription, SubscriptionManager};
pub use transport::{TlsMode, TransportConfig};
