// ── Motion event router ──
//
// Consumes the bus and maintains per-camera motion and AI state. A
// webhook's motion flag is only a hint: every motion event triggers an
// authoritative `get_states` re-query, and all channels of the device are
// updated from that snapshot. Motion-off is debounced: the reported state
// holds for `motion_off_delay` after the last positive signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use reowatch_api::model::{AiKind, AiObjectState, AiStateValue, ChannelState};

use crate::bus::{BusEvent, EventBus, EventPayload};
use crate::config::CoreSettings;
use crate::model::{CameraId, MacAddress};
use crate::registry::{DeviceEntry, DeviceRegistry};
use crate::vod::VodCatalog;

/// Reported state of one camera's motion sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionState {
    pub detected: bool,
    pub available: bool,
    pub last_motion: Option<DateTime<Utc>>,
}

/// Reported state of one AI class on one camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiClassState {
    pub detected: bool,
    pub supported: bool,
    pub available: bool,
}

#[derive(Debug, Clone, Default)]
struct CameraSnapshot {
    motion: bool,
    available: bool,
    last_motion: Option<DateTime<Utc>>,
    ai: Option<AiStateValue>,
}

struct Debounce {
    generation: u64,
    token: CancellationToken,
}

/// Routes bus events into per-camera state.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MotionEventRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: Arc<DeviceRegistry>,
    bus: EventBus,
    catalog: Option<VodCatalog>,
    off_delay: Duration,
    states: DashMap<CameraId, CameraSnapshot>,
    // Lock order: never touch `states` and `debounce` under one guard.
    debounce: DashMap<CameraId, Debounce>,
    generation: AtomicU64,
    cancel: CancellationToken,
}

impl MotionEventRouter {
    /// With a catalog attached, rising motion edges capture a thumbnail.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        bus: EventBus,
        settings: &CoreSettings,
        catalog: Option<VodCatalog>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry,
                bus,
                catalog,
                off_delay: settings.motion_off_delay,
                states: DashMap::new(),
                debounce: DashMap::new(),
                generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Dispatch one bus event.
    pub async fn handle_event(&self, event: &BusEvent) {
        let Some(device_id) = self.inner.bus.device_of(&event.topic) else {
            trace!(topic = %event.topic, "event on foreign topic ignored");
            return;
        };
        match event.payload {
            EventPayload::Motion { motion } => self.handle_motion(&device_id, motion).await,
            EventPayload::Availability { available } => {
                self.apply_availability(&device_id, available);
            }
            EventPayload::Smtp { smtp } => self.handle_smtp(&device_id, smtp),
            // Fired by this router itself after a successful re-query;
            // consumed by downstream observers, nothing to do here.
            EventPayload::AiRefreshed { .. } => {}
        }
    }

    /// Re-query and apply authoritative state for one device.
    pub async fn refresh(&self, device_id: &MacAddress) {
        if let Some(entry) = self.inner.registry.get(device_id) {
            self.refresh_device(&entry).await;
        }
    }

    /// Reported motion state. Unknown cameras read as unavailable.
    pub fn motion_state(&self, camera: &CameraId) -> MotionState {
        self.inner.states.get(camera).map_or(
            MotionState {
                detected: false,
                available: false,
                last_motion: None,
            },
            |s| MotionState {
                detected: s.motion,
                available: s.available,
                last_motion: s.last_motion,
            },
        )
    }

    /// Reported AI class state. A class absent from the camera's last
    /// snapshot is unsupported and unavailable; support flags apply per
    /// class, independently of siblings.
    pub fn ai_state(&self, camera: &CameraId, kind: AiKind) -> AiClassState {
        let Some(snapshot) = self.inner.states.get(camera) else {
            return AiClassState {
                detected: false,
                supported: false,
                available: false,
            };
        };
        let Some(class) = snapshot.ai.as_ref().and_then(|ai| ai.class(kind)) else {
            return AiClassState {
                detected: false,
                supported: false,
                available: false,
            };
        };
        AiClassState {
            detected: class.detected(),
            supported: class.supported(),
            available: snapshot.available && class.supported(),
        }
    }

    /// Cancel all pending debounce flips. Used on shutdown.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    async fn handle_motion(&self, device_id: &MacAddress, hint: bool) {
        let Some(entry) = self.inner.registry.get(device_id) else {
            debug!(device = %device_id, "motion event for unregistered device dropped");
            return;
        };
        let any_available = entry.cameras.iter().any(|camera| {
            self.inner
                .states
                .get(camera)
                .is_some_and(|state| state.available)
        });
        if !any_available {
            debug!(device = %device_id, hint, "motion event while unavailable dropped");
            return;
        }
        trace!(device = %device_id, hint, "motion event; re-querying state");
        self.refresh_device(&entry).await;
    }

    async fn refresh_device(&self, entry: &DeviceEntry) {
        let states = match entry.client.get_states().await {
            Ok(states) => states,
            Err(err) => {
                warn!(device = %entry.device_id, error = %err, "state query failed");
                // Transient by contract: the next event or poll recovers.
                for camera in &entry.cameras {
                    if let Some(mut snapshot) = self.inner.states.get_mut(camera) {
                        snapshot.available = false;
                    }
                }
                return;
            }
        };
        if self.inner.registry.get(&entry.device_id).is_none() {
            // Device was removed while the query was in flight.
            return;
        }
        for camera in &entry.cameras {
            let Some(channel) = states.channel(camera.channel()) else {
                debug!(camera = %camera, "channel missing from state reply");
                continue;
            };
            self.apply_channel(camera, channel);
        }
        self.inner.bus.publish(
            &entry.device_id,
            EventPayload::AiRefreshed { ai_refreshed: true },
        );
    }

    fn apply_channel(&self, camera: &CameraId, channel: &ChannelState) {
        if channel.motion {
            // Re-arm before the state write so a flip firing concurrently
            // cannot land in between.
            self.arm_flip(camera);
        }
        let (rising, falling) = {
            let mut snapshot = self.inner.states.entry(camera.clone()).or_default();
            snapshot.available = true;
            snapshot.ai = channel.ai.clone();
            if channel.motion {
                let rising = !snapshot.motion;
                snapshot.motion = true;
                snapshot.last_motion = Some(Utc::now());
                (rising, false)
            } else {
                (false, snapshot.motion)
            }
        };
        if rising {
            trace!(camera = %camera, "motion rising edge");
            if let Some(catalog) = &self.inner.catalog {
                catalog.capture_snapshot(camera, Utc::now());
            }
        }
        if falling {
            // Hold the reported state; flip after the off-delay unless
            // motion returns first.
            self.arm_flip_if_absent(camera);
        }
    }

    fn apply_availability(&self, device_id: &MacAddress, available: bool) {
        let Some(entry) = self.inner.registry.get(device_id) else {
            return;
        };
        for camera in &entry.cameras {
            let mut snapshot = self.inner.states.entry(camera.clone()).or_default();
            snapshot.available = available;
        }
        trace!(device = %device_id, available, "availability applied");
    }

    /// SMTP alerts carry a class but no channel, so the detection is
    /// applied to every camera of the device, with the parent motion
    /// sensor tripped and debounced the same way a webhook would.
    fn handle_smtp(&self, device_id: &MacAddress, kind: AiKind) {
        let Some(entry) = self.inner.registry.get(device_id) else {
            debug!(device = %device_id, "smtp alert for unregistered device dropped");
            return;
        };
        debug!(device = %device_id, class = %kind, "smtp alert ingested");
        for camera in &entry.cameras {
            self.arm_flip(camera);
            let rising = {
                let mut snapshot = self.inner.states.entry(camera.clone()).or_default();
                let rising = !snapshot.motion;
                snapshot.motion = true;
                snapshot.last_motion = Some(Utc::now());
                mark_class(&mut snapshot.ai, camera.channel(), kind);
                rising
            };
            if rising {
                if let Some(catalog) = &self.inner.catalog {
                    catalog.capture_snapshot(camera, Utc::now());
                }
            }
        }
        self.inner.bus.publish(
            device_id,
            EventPayload::AiRefreshed { ai_refreshed: true },
        );
    }

    /// Schedule (or reschedule) the motion-off flip for `off_delay` from
    /// now. Any pending flip is cancelled first.
    fn arm_flip(&self, camera: &CameraId) {
        let token = self.inner.cancel.child_token();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(old) = self.inner.debounce.insert(
            camera.clone(),
            Debounce {
                generation,
                token: token.clone(),
            },
        ) {
            old.token.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let camera = camera.clone();
        let delay = inner.off_delay;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    // Only the newest schedule may flip; stale ones lost a
                    // race with a re-trigger and must stand down.
                    let current = inner
                        .debounce
                        .remove_if(&camera, |_, d| d.generation == generation)
                        .is_some();
                    if current {
                        if let Some(mut snapshot) = inner.states.get_mut(&camera) {
                            if snapshot.motion {
                                snapshot.motion = false;
                                debug!(camera = %camera, "motion cleared after off-delay");
                            }
                        }
                    }
                }
            }
        });
    }

    fn arm_flip_if_absent(&self, camera: &CameraId) {
        if !self.inner.debounce.contains_key(camera) {
            self.arm_flip(camera);
        }
    }
}

fn mark_class(ai: &mut Option<AiStateValue>, channel: u8, kind: AiKind) {
    let mut value = ai.take().unwrap_or(AiStateValue {
        channel,
        people: None,
        vehicle: None,
        pet: None,
    });
    let slot = match kind {
        AiKind::Person => &mut value.people,
        AiKind::Vehicle => &mut value.vehicle,
        AiKind::Pet => &mut value.pet,
    };
    *slot = Some(AiObjectState {
        alarm_state: 1,
        support: 1,
    });
    *ai = Some(value);
}

/// Consumes the bus and keeps per-camera state current.
pub async fn route_task(router: MotionEventRouter, cancel: CancellationToken) {
    let mut rx = router.inner.bus.subscribe();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("router stopping");
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => router.handle_event(&event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "router lagged behind the bus; state catches up on the next poll");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Fallback poll: re-runs the same refresh path push events use, so
/// motion keeps working when notifications stop arriving.
pub async fn poll_task(router: MotionEventRouter, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("poll task stopping");
                break;
            }
            _ = interval.tick() => {
                for entry in router.inner.registry.devices() {
                    router.refresh_device(&entry).await;
                }
            }
        }
    }
}
