// ── Push subscription coordinator ──
//
// Owns the ONVIF subscription lifecycle for every registered device:
// webhook registration, lease renewal ahead of expiry, self-healing
// re-subscription, and delivery of incoming notifications onto the bus.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use reowatch_api::notification::parse_motion;

use crate::bus::{EventBus, EventPayload};
use crate::config::CoreSettings;
use crate::error::CoreError;
use crate::model::{CameraId, MacAddress};
use crate::registry::{DeviceEntry, DeviceRegistry};

/// Renew when the remaining lease drops to this threshold or below.
pub const RENEW_THRESHOLD: Duration = Duration::from_secs(300);

/// Coordinates push subscriptions for all registered devices.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PushCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    registry: Arc<DeviceRegistry>,
    bus: EventBus,
    callback_base: Option<Url>,
    /// webhook id -> topic, for routing incoming notifications.
    topic_by_webhook: DashMap<String, String>,
    /// topic -> webhook id, for registration reuse and teardown.
    webhook_by_topic: DashMap<String, String>,
    available: DashMap<MacAddress, bool>,
    /// Devices already warned about a missing callback URL, so the
    /// configuration error is logged once instead of every cycle.
    warned_unreachable: DashMap<MacAddress, ()>,
}

impl PushCoordinator {
    pub fn new(registry: Arc<DeviceRegistry>, bus: EventBus, settings: &CoreSettings) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry,
                bus,
                callback_base: settings.callback_base().cloned(),
                topic_by_webhook: DashMap::new(),
                webhook_by_topic: DashMap::new(),
                available: DashMap::new(),
                warned_unreachable: DashMap::new(),
            }),
        }
    }

    /// Establish (or re-establish) the push subscription for a device.
    ///
    /// Camera-side failures are absorbed: the device is marked
    /// unavailable and `Ok(false)` comes back so a caller driving many
    /// devices keeps going. `Err` is reserved for unknown devices.
    pub async fn subscribe(&self, device_id: &MacAddress) -> Result<bool, CoreError> {
        let entry = self.entry(device_id)?;
        let Some(callback) = self.callback_url(device_id) else {
            self.set_available(device_id, false);
            return Ok(false);
        };

        match entry.subscription.subscribe(&callback).await {
            Ok(()) => {
                if self.inner.registry.get(device_id).is_none() {
                    // Torn down while the handshake was in flight.
                    return Ok(false);
                }
                info!(device = %device_id, %callback, "push subscription established");
                self.set_available(device_id, true);
                Ok(true)
            }
            Err(err) => {
                warn!(device = %device_id, error = %err, "push subscribe failed");
                self.set_available(device_id, false);
                Ok(false)
            }
        }
    }

    /// One renewal pass for a device, scheduled every cycle.
    ///
    /// Healthy leases just re-affirm availability. Leases inside the
    /// renewal window get extended; a failed exchange marks the device
    /// unavailable and immediately falls back to a fresh subscribe, so a
    /// single missed renewal self-heals.
    pub async fn renew(&self, device_id: &MacAddress) -> Result<(), CoreError> {
        let entry = self.entry(device_id)?;
        match entry.subscription.renew_timer() {
            None => {
                self.subscribe(device_id).await?;
            }
            Some(remaining) if remaining <= RENEW_THRESHOLD => {
                match entry.subscription.renew().await {
                    Ok(()) => {
                        if self.inner.registry.get(device_id).is_none() {
                            return Ok(());
                        }
                        debug!(device = %device_id, "push lease renewed");
                        self.set_available(device_id, true);
                    }
                    Err(err) => {
                        warn!(device = %device_id, error = %err, "push renew failed; resubscribing");
                        self.set_available(device_id, false);
                        self.subscribe(device_id).await?;
                    }
                }
            }
            Some(_) => {
                self.set_available(device_id, true);
            }
        }
        Ok(())
    }

    /// Tear down a device's subscription and webhook registration.
    /// Remote failures are logged; local state is always cleaned.
    pub async fn unsubscribe(&self, device_id: &MacAddress) -> Result<(), CoreError> {
        let entry = self.entry(device_id)?;
        self.set_available(device_id, false);
        let topic = self.inner.bus.topic_for(device_id);
        if let Some((_, webhook_id)) = self.inner.webhook_by_topic.remove(&topic) {
            self.inner.topic_by_webhook.remove(&webhook_id);
        }
        if let Err(err) = entry.subscription.unsubscribe().await {
            debug!(device = %device_id, error = %err, "push unsubscribe failed; local lease dropped anyway");
        }
        Ok(())
    }

    /// Tear down every registered device's subscription, used on shutdown.
    pub async fn unsubscribe_all(&self) {
        for entry in self.inner.registry.devices() {
            if let Err(err) = self.unsubscribe(&entry.device_id).await {
                debug!(device = %entry.device_id, error = %err, "teardown skipped");
            }
        }
    }

    /// Drop one camera's claim on its device. The subscription is
    /// reference-counted: it survives while other cameras still use it
    /// and is torn down, device entry included, with the last one.
    /// Returns whether the device itself was removed.
    pub async fn release_camera(&self, camera: &CameraId) -> Result<bool, CoreError> {
        let device_id = camera.device_id().clone();
        if self.inner.registry.remove_camera(camera) > 0 {
            return Ok(false);
        }
        self.unsubscribe(&device_id).await?;
        self.inner.registry.remove_device(&device_id);
        self.inner.available.remove(&device_id);
        self.inner.warned_unreachable.remove(&device_id);
        info!(device = %device_id, "last camera released; device removed");
        Ok(true)
    }

    /// Deliver a camera notification body.
    ///
    /// Infallible by design: the HTTP layer acknowledges every request,
    /// so unroutable or malformed bodies are logged and dropped here.
    pub fn handle_webhook(&self, webhook_id: &str, body: &str) {
        let Some(topic) = self
            .inner
            .topic_by_webhook
            .get(webhook_id)
            .map(|r| r.value().clone())
        else {
            warn!(webhook = webhook_id, "notification for unknown webhook id dropped");
            return;
        };
        match parse_motion(body) {
            Some(motion) => {
                debug!(topic = %topic, motion, "motion notification");
                self.inner
                    .bus
                    .publish_topic(topic, EventPayload::Motion { motion });
            }
            None => {
                debug!(webhook = webhook_id, "notification without IsMotion dropped");
            }
        }
    }

    /// How many cameras still reference the device's subscription.
    pub fn count_references(&self, device_id: &MacAddress) -> usize {
        self.inner.registry.count_references(device_id)
    }

    pub fn is_available(&self, device_id: &MacAddress) -> bool {
        self.inner.available.get(device_id).is_some_and(|a| *a)
    }

    /// The webhook id currently registered for a device, if any.
    pub fn webhook_id(&self, device_id: &MacAddress) -> Option<String> {
        let topic = self.inner.bus.topic_for(device_id);
        self.inner
            .webhook_by_topic
            .get(&topic)
            .map(|r| r.value().clone())
    }

    /// Register (or reuse) the webhook id for a device and build the URL
    /// the camera should deliver notifications to.
    fn callback_url(&self, device_id: &MacAddress) -> Option<Url> {
        let Some(base) = &self.inner.callback_base else {
            if self
                .inner
                .warned_unreachable
                .insert(device_id.clone(), ())
                .is_none()
            {
                warn!(
                    device = %device_id,
                    "no internal or external URL configured; push notifications stay off"
                );
            }
            return None;
        };
        let topic = self.inner.bus.topic_for(device_id);
        let webhook_id = self
            .inner
            .webhook_by_topic
            .entry(topic.clone())
            .or_insert_with(|| Uuid::new_v4().simple().to_string())
            .value()
            .clone();
        self.inner
            .topic_by_webhook
            .insert(webhook_id.clone(), topic);
        match base.join(&format!("webhook/{webhook_id}")) {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(device = %device_id, error = %err, "cannot build webhook callback URL");
                None
            }
        }
    }

    fn entry(&self, device_id: &MacAddress) -> Result<Arc<DeviceEntry>, CoreError> {
        self.inner
            .registry
            .get(device_id)
            .ok_or_else(|| CoreError::UnknownDevice {
                device_id: device_id.clone(),
            })
    }

    fn set_available(&self, device_id: &MacAddress, available: bool) {
        self.inner.available.insert(device_id.clone(), available);
        self.inner
            .bus
            .publish(device_id, EventPayload::Availability { available });
    }
}

/// Drives lease renewal for every registered device.
///
/// Errors never escape the loop; devices that vanish mid-pass are skipped.
pub async fn renew_task(coordinator: PushCoordinator, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("renew task stopping");
                break;
            }
            _ = interval.tick() => {
                for entry in coordinator.inner.registry.devices() {
                    if let Err(err) = coordinator.renew(&entry.device_id).await {
                        debug!(device = %entry.device_id, error = %err, "renewal pass skipped");
                    }
                }
            }
        }
    }
}
