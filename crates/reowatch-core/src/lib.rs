//! Integration engine between `reowatch-api` and the daemon surfaces.
//!
//! This crate owns the business logic and shared state for the Reolink
//! workspace:
//!
//! - **[`PushCoordinator`]** — ONVIF push-subscription lifecycle: builds
//!   per-device webhook callback URLs, subscribes, renews ahead of lease
//!   expiry (self-healing on failure), and translates inbound webhook
//!   bodies into bus events.
//!
//! - **[`MotionEventRouter`]** — Consumes bus events, re-queries the
//!   camera for authoritative per-channel state, fans it out to motion /
//!   AI-class snapshots, and schedules cancellable off-delay flips.
//!
//! - **[`VodCatalog`]** / **[`ThumbnailStore`]** / **[`MediaBrowseTree`]**
//!   — Recording search with day/event caching, motion-triggered snapshot
//!   capture, token-guarded playback and thumbnail access, and the
//!   lazily-populated browse hierarchy.
//!
//! - **[`DeviceRegistry`]** — Lock-free registry of devices and their
//!   camera registrations (`DashMap` of `Arc` snapshot entries, replaced
//!   wholesale on every mutation).
//!
//! - **[`EventBus`]** — Broadcast fan-out of namespaced device topics
//!   carrying the wire-stable JSON payloads.

pub mod bus;
pub mod config;
pub mod error;
pub mod model;
pub mod push;
pub mod registry;
pub mod router;
pub mod vod;

#[cfg(test)]
pub(crate) mod testutil;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{BusEvent, EventBus, EventPayload};
pub use config::CoreSettings;
pub use error::CoreError;
pub use push::{PushCoordinator, renew_task};
pub use registry::{DeviceEntry, DeviceRegistry};
pub use router::{AiClassState, MotionEventRouter, MotionState, poll_task, route_task};
pub use vod::{
    BrowseNode, LastEventSummary, MediaBrowseTree, ThumbnailStore, VodCatalog, summary_task,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{CameraId, InvalidCameraId, MacAddress, ThumbnailRef, VodEvent};
