// ── Device registry ──
//
// Lock-free concurrent storage for registered devices. One entry per
// physical device (keyed by MAC); cameras are channel registrations on
// that entry and the subscription lifecycle is reference-counted against
// them: the last camera to leave tears the device's subscription down.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use reowatch_api::model::DeviceInfo;
use reowatch_api::{CameraClient, SubscriptionManager};

use crate::error::CoreError;
use crate::model::{CameraId, MacAddress};

/// Everything the engine holds for one physical device.
#[derive(Clone)]
pub struct DeviceEntry {
    pub device_id: MacAddress,
    pub info: DeviceInfo,
    pub client: Arc<dyn CameraClient>,
    pub subscription: Arc<dyn SubscriptionManager>,
    /// Channel registrations, in registration order.
    pub cameras: Vec<CameraId>,
}

impl fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("device_id", &self.device_id)
            .field("info", &self.info)
            .field("cameras", &self.cameras)
            .finish_non_exhaustive()
    }
}

/// Concurrent registry of devices and their camera registrations.
///
/// Entries are immutable snapshots behind `Arc`; every mutation replaces
/// the whole entry so readers never observe a half-updated device.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<MacAddress, Arc<DeviceEntry>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    /// Insert or replace a device. Camera registrations survive a
    /// re-registration (the usual path after re-authentication).
    pub fn upsert_device(
        &self,
        info: DeviceInfo,
        client: Arc<dyn CameraClient>,
        subscription: Arc<dyn SubscriptionManager>,
    ) -> Arc<DeviceEntry> {
        let device_id = MacAddress::new(&info.mac);
        let cameras = self
            .devices
            .get(&device_id)
            .map(|existing| existing.cameras.clone())
            .unwrap_or_default();
        let entry = Arc::new(DeviceEntry {
            device_id: device_id.clone(),
            info,
            client,
            subscription,
            cameras,
        });
        self.devices.insert(device_id, Arc::clone(&entry));
        entry
    }

    /// Register one channel of a device as a camera. Idempotent.
    pub fn register_camera(
        &self,
        device_id: &MacAddress,
        channel: u8,
    ) -> Result<CameraId, CoreError> {
        let mut entry = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| CoreError::UnknownDevice {
                device_id: device_id.clone(),
            })?;
        let camera = CameraId::new(device_id.clone(), channel);
        if !entry.cameras.contains(&camera) {
            let mut updated = (**entry).clone();
            updated.cameras.push(camera.clone());
            *entry = Arc::new(updated);
        }
        Ok(camera)
    }

    /// Drop one camera registration. Returns how many registrations the
    /// device still has; at zero the caller should unsubscribe.
    pub fn remove_camera(&self, camera: &CameraId) -> usize {
        match self.devices.get_mut(camera.device_id()) {
            Some(mut entry) => {
                let mut updated = (**entry).clone();
                updated.cameras.retain(|c| c != camera);
                let remaining = updated.cameras.len();
                *entry = Arc::new(updated);
                remaining
            }
            None => 0,
        }
    }

    /// How many cameras currently reference the device's subscription.
    pub fn count_references(&self, device_id: &MacAddress) -> usize {
        self.devices
            .get(device_id)
            .map_or(0, |entry| entry.cameras.len())
    }

    pub fn get(&self, device_id: &MacAddress) -> Option<Arc<DeviceEntry>> {
        self.devices.get(device_id).map(|r| Arc::clone(r.value()))
    }

    /// Look up the owning device of a registered camera. `None` when the
    /// device is unknown or the channel was never registered.
    pub fn entry_for_camera(&self, camera: &CameraId) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(camera.device_id())?;
        entry.cameras.contains(camera).then_some(entry)
    }

    pub fn remove_device(&self, device_id: &MacAddress) -> Option<Arc<DeviceEntry>> {
        self.devices.remove(device_id).map(|(_, entry)| entry)
    }

    /// Snapshot of all registered devices.
    pub fn devices(&self) -> Vec<Arc<DeviceEntry>> {
        self.devices.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Snapshot of every registered camera across all devices.
    pub fn cameras(&self) -> Vec<CameraId> {
        self.devices
            .iter()
            .flat_map(|r| r.value().cameras.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testutil::{MockCamera, MockSubscription, device_info};

    fn registry_with_device(mac: &str, channels: u8) -> (DeviceRegistry, MacAddress) {
        let registry = DeviceRegistry::new();
        registry.upsert_device(
            device_info(mac, channels),
            Arc::new(MockCamera::new(mac, channels)),
            Arc::new(MockSubscription::new()),
        );
        (registry, MacAddress::new(mac))
    }

    #[test]
    fn upsert_and_get() {
        let (registry, device_id) = registry_with_device("AA:BB:CC:DD:EE:FF", 1);
        let entry = registry.get(&device_id).unwrap();
        assert_eq!(entry.device_id, device_id);
        assert_eq!(entry.info.channels, 1);
        assert!(entry.cameras.is_empty());
    }

    #[test]
    fn register_camera_is_idempotent() {
        let (registry, device_id) = registry_with_device("aa:bb:cc:dd:ee:ff", 2);
        let first = registry.register_camera(&device_id, 0).unwrap();
        let again = registry.register_camera(&device_id, 0).unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.count_references(&device_id), 1);

        registry.register_camera(&device_id, 1).unwrap();
        assert_eq!(registry.count_references(&device_id), 2);
    }

    #[test]
    fn register_camera_unknown_device() {
        let registry = DeviceRegistry::new();
        let missing = MacAddress::new("00:00:00:00:00:01");
        assert!(matches!(
            registry.register_camera(&missing, 0),
            Err(CoreError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn reference_counting_down_to_zero() {
        let (registry, device_id) = registry_with_device("aa:bb:cc:dd:ee:ff", 2);
        let cam0 = registry.register_camera(&device_id, 0).unwrap();
        let cam1 = registry.register_camera(&device_id, 1).unwrap();

        assert_eq!(registry.remove_camera(&cam0), 1);
        assert_eq!(registry.remove_camera(&cam1), 0);
        assert_eq!(registry.count_references(&device_id), 0);
        // Device itself stays until removed explicitly.
        assert!(registry.get(&device_id).is_some());
    }

    #[test]
    fn upsert_preserves_camera_registrations() {
        let (registry, device_id) = registry_with_device("aa:bb:cc:dd:ee:ff", 1);
        registry.register_camera(&device_id, 0).unwrap();

        registry.upsert_device(
            device_info("aa:bb:cc:dd:ee:ff", 1),
            Arc::new(MockCamera::new("aa:bb:cc:dd:ee:ff", 1)),
            Arc::new(MockSubscription::new()),
        );
        assert_eq!(registry.count_references(&device_id), 1);
    }

    #[test]
    fn entry_for_camera_requires_registration() {
        let (registry, device_id) = registry_with_device("aa:bb:cc:dd:ee:ff", 2);
        let registered = registry.register_camera(&device_id, 0).unwrap();
        let unregistered = CameraId::new(device_id.clone(), 1);

        assert!(registry.entry_for_camera(&registered).is_some());
        assert!(registry.entry_for_camera(&unregistered).is_none());
    }

    #[test]
    fn snapshots_reflect_current_state() {
        let (registry, device_id) = registry_with_device("aa:bb:cc:dd:ee:ff", 2);
        registry.register_camera(&device_id, 0).unwrap();
        registry.register_camera(&device_id, 1).unwrap();

        assert_eq!(registry.devices().len(), 1);
        assert_eq!(registry.cameras().len(), 2);

        registry.remove_device(&device_id);
        assert!(registry.is_empty());
        assert!(registry.cameras().is_empty());
    }
}
