use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::domain::{Device, DeviceId, OwnerId, DEFAULT_DEVICE_HEALTH};
use storage::DeviceStore;

/// Device store kept in memory, with switches to make individual owners fail or stall.
#[derive(Default)]
pub(crate) struct MemoryDeviceStore {
    devices: Mutex<Vec<Device>>,
    next_id: AtomicI64,
    failing_owners: Mutex<HashSet<OwnerId>>,
    slow_owners: Mutex<HashMap<OwnerId, Duration>>,
    fail_creates: AtomicBool,
}

impl MemoryDeviceStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed(&self, owner_id: OwnerId, name: &str, kind: &str) -> Device {
        let device = Device {
            device_id: DeviceId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            owner_id,
            name: name.to_string(),
            kind: kind.to_string(),
            health: DEFAULT_DEVICE_HEALTH.to_string(),
            created_at: Utc::now(),
        };
        self.devices.lock().expect("devices lock").push(device.clone());
        device
    }

    pub(crate) fn fail_lookups_for(&self, owner_id: OwnerId) {
        self.failing_owners
            .lock()
            .expect("failing lock")
            .insert(owner_id);
    }

    pub(crate) fn stall_lookups_for(&self, owner_id: OwnerId, delay: Duration) {
        self.slow_owners
            .lock()
            .expect("slow lock")
            .insert(owner_id, delay);
    }

    pub(crate) fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    pub(crate) fn device_count(&self) -> usize {
        self.devices.lock().expect("devices lock").len()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn list_devices_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Device>> {
        let delay = self
            .slow_owners
            .lock()
            .expect("slow lock")
            .get(&owner_id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing_owners
            .lock()
            .expect("failing lock")
            .contains(&owner_id)
        {
            return Err(anyhow!("device lookup failed for owner {}", owner_id.0));
        }
        Ok(self
            .devices
            .lock()
            .expect("devices lock")
            .iter()
            .filter(|device| device.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn create_device(&self, owner_id: OwnerId, name: &str, kind: &str) -> Result<Device> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(anyhow!("device store is read-only"));
        }
        Ok(self.seed(owner_id, name, kind))
    }
}
