use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

use crate::events;
use crate::{Device, DeviceKind};

/// Shared store of discovered devices. The scanner is the only writer; every
/// other component reads immutable snapshots.
#[derive(Default)]
pub struct Registry {
    devices: DashMap<String, Device>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Merge one discovery pass. New devices are announced; re-discovered
    /// devices keep their identity and refresh last_seen/capabilities.
    pub fn merge(&self, found: Vec<Device>) {
        for device in found {
            match self.devices.get_mut(&device.id) {
                Some(mut existing) => {
                    existing.last_seen = Utc::now();
                    existing.name = device.name;
                    existing.model = device.model;
                    existing.capabilities = device.capabilities;
                }
                None => {
                    info!(
                        "Discovered {} device: {} ({}:{})",
                        device.kind.label(),
                        device.name,
                        device.addr,
                        device.port
                    );
                    events::notify_device_added(device.clone());
                    self.devices.insert(device.id.clone(), device);
                }
            }
        }
    }

    /// Drop devices not re-advertised within the grace period.
    pub fn evict_stale(&self, grace: Duration) {
        let stale: Vec<String> = self
            .devices
            .iter()
            .filter(|entry| entry.value().is_stale(grace))
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            if let Some((_, device)) = self.devices.remove(&id) {
                info!("Evicted stale device: {} ({})", device.name, device.id);
                events::notify_device_removed(device.id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.devices.get(id).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    /// Read-side filter over a snapshot; never touches discovery state.
    /// A free-text query matches the device name or its kind label, so
    /// "cast" finds every CastReceiver and "room" finds "LivingRoomTV".
    pub fn filter(&self, kind: Option<DeviceKind>, query: Option<&str>) -> Vec<Device> {
        let query = query.map(|q| q.to_lowercase());
        self.snapshot()
            .into_iter()
            .filter(|d| kind.map_or(true, |k| d.kind == k))
            .filter(|d| {
                query.as_deref().map_or(true, |q| {
                    d.name.to_lowercase().contains(q) || d.kind.label().contains(q)
                })
            })
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
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn device(name: &str, kind: DeviceKind, last_octet: u8) -> Device {
        Device::new(
            name.to_string(),
            kind,
            format!("192.168.1.{last_octet}").parse().unwrap(),
            8009,
            "Test".to_string(),
        )
    }

    #[test]
    fn merge_announces_new_and_refreshes_known() {
        let registry = Registry::new();
        registry.merge(vec![device("LivingRoomTV", DeviceKind::CastReceiver, 10)]);
        assert_eq!(registry.len(), 1);

        // Same identity, new name: still one entry, name updated.
        registry.merge(vec![device("LivingRoom TV", DeviceKind::CastReceiver, 10)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].name, "LivingRoom TV");
    }

    #[test]
    fn filter_by_kind_and_free_text() {
        let registry = Registry::new();
        registry.merge(vec![
            device("LivingRoomTV", DeviceKind::CastReceiver, 10),
            device("Bedroom", DeviceKind::RokuReceiver, 11),
        ]);

        let cast_only = registry.filter(Some(DeviceKind::CastReceiver), None);
        assert_eq!(cast_only.len(), 1);
        assert_eq!(cast_only[0].name, "LivingRoomTV");

        // "cast" matches the kind label of the Chromecast, not Roku.
        let by_cast = registry.filter(None, Some("cast"));
        assert_eq!(by_cast.len(), 1);
        assert_eq!(by_cast[0].name, "LivingRoomTV");

        // "room" matches both names.
        let by_room = registry.filter(None, Some("room"));
        assert_eq!(by_room.len(), 2);

        let none = registry.filter(None, Some("kitchen"));
        assert!(none.is_empty());
    }

    #[test]
    fn filter_is_case_insensitive() {
        let registry = Registry::new();
        registry.merge(vec![device("LivingRoomTV", DeviceKind::CastReceiver, 10)]);
        assert_eq!(registry.filter(None, Some("LIVING")).len(), 1);
    }

    #[test]
    fn evicts_only_devices_past_grace() {
        let registry = Registry::new();
        registry.merge(vec![
            device("Fresh", DeviceKind::CastReceiver, 10),
            device("Stale", DeviceKind::RokuReceiver, 11),
        ]);
        // Backdate one device beyond the grace window.
        {
            let id = format!("{}:192.168.1.11:8009", DeviceKind::RokuReceiver.label());
            let mut entry = registry.devices.get_mut(&id).unwrap();
            entry.last_seen = Utc::now() - ChronoDuration::seconds(60);
        }
        registry.evict_stale(Duration::from_secs(30));
        let names: Vec<String> = registry.snapshot().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Fresh"]);
    }
}
