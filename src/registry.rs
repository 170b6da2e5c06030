// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Owns vest controller instances, assigns stable device identifiers,
//! designates a "main" device, and supports mock devices side-by-side with
//! real ones.

use std::collections::HashMap;

use log::info;
use uuid::Uuid;

use crate::controller::{Controller, Status, VestControllerLike};
use crate::definitions::{DeviceDescriptor, DeviceSelector, MAX_MOCK_DEVICES};
use crate::mock_controller::MockController;

pub type DeviceId = String;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown device id {0}")]
    UnknownDevice(DeviceId),
    #[error("maximum of {MAX_MOCK_DEVICES} mock devices already registered")]
    MockCapReached,
    #[error("device {0} is not a mock device")]
    NotMock(DeviceId),
    #[error("failed to connect to device: {0}")]
    ConnectFailed(String),
}

struct Entry {
    descriptor: DeviceDescriptor,
    controller: Box<dyn VestControllerLike>,
}

/// `device_id → controller`, `device_id → descriptor`, and the main-device
/// pointer, all owned by a single struct so every mutation can restore the
/// registry invariants before returning.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<DeviceId, Entry>,
    main_device_id: Option<DeviceId>,
    mock_counter: usize,
    order: Vec<DeviceId>,
}

fn generate_device_id() -> DeviceId {
    format!("device_{}", &Uuid::new_v4().simple().to_string()[..8])
}

fn generate_mock_id() -> DeviceId {
    format!("mock_{}", &Uuid::new_v4().simple().to_string()[..8])
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dedup check the teacher's device manager performs by USB id,
    /// generalized to the spec's serial-then-bus/address rule. Kept as its
    /// own function and tested independently since it is the trickiest
    /// invariant in the registry.
    pub fn find_existing(&self, info: &DeviceDescriptor) -> Option<DeviceId> {
        self.entries
            .iter()
            .find(|(_, e)| e.descriptor.same_device(info))
            .map(|(id, _)| id.clone())
    }

    /// Adds a real device, deduplicating against already-registered
    /// descriptors. Connects the freshly constructed controller before
    /// inserting it; a connect failure is returned as an error and nothing
    /// is added. The trailing `bool` is `true` only when a new entry was
    /// inserted, so callers can tell a fresh connect from a deduped repeat
    /// select of an already-registered device.
    pub async fn add_device(
        &mut self,
        device_id: Option<DeviceId>,
        info: DeviceDescriptor,
    ) -> Result<(DeviceId, Status, bool), RegistryError> {
        if let Some(existing) = self.find_existing(&info) {
            let status = self.entries[&existing].controller.status();
            return Ok((existing, status, false));
        }

        let id = device_id.unwrap_or_else(generate_device_id);
        let selector = match &info.serial_number {
            Some(serial) => DeviceSelector::Serial(serial.clone()),
            None => DeviceSelector::BusAddress(info.bus, info.address),
        };

        let mut controller = Controller::new();
        let status = controller.connect_to_device(&selector).await;
        if !status.connected {
            return Err(RegistryError::ConnectFailed(
                status.last_error.unwrap_or_else(|| "unknown error".to_owned()),
            ));
        }

        self.insert(id.clone(), info, Box::new(controller));
        Ok((id, status, true))
    }

    /// Count of currently-registered mock devices, the quantity the
    /// 20-mock cap actually bounds (not the lifetime number ever created).
    pub fn mock_count(&self) -> usize {
        self.entries.values().filter(|e| e.descriptor.is_mock).count()
    }

    /// Adds a mock device, enforcing the 20-mock cap on currently-live
    /// mocks. `mock_counter` is a separate monotonic sequence used only to
    /// keep generated serials unique; it is never decremented.
    pub fn add_mock_device(&mut self) -> Result<DeviceId, RegistryError> {
        if self.mock_count() >= MAX_MOCK_DEVICES {
            return Err(RegistryError::MockCapReached);
        }
        self.mock_counter += 1;
        let id = generate_mock_id();
        let descriptor = DeviceDescriptor {
            vendor_id: 0,
            product_id: 0,
            bus: 0,
            address: 0,
            serial_number: Some(format!("MOCK-{:03}", self.mock_counter)),
            is_mock: true,
        };
        let controller = MockController::new(descriptor.clone());
        self.insert(id.clone(), descriptor, Box::new(controller));
        info!("registered mock device {id}");
        Ok(id)
    }

    /// Test-only seam for building a populated registry without a real or
    /// mock USB connect round-trip.
    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, id: DeviceId, descriptor: DeviceDescriptor) {
        self.insert(id, descriptor, Box::new(Controller::new()));
    }

    fn insert(&mut self, id: DeviceId, descriptor: DeviceDescriptor, controller: Box<dyn VestControllerLike>) {
        let became_main = self.entries.is_empty();
        self.entries.insert(
            id.clone(),
            Entry { descriptor, controller },
        );
        self.order.push(id.clone());
        if became_main {
            self.main_device_id = Some(id);
        }
    }

    /// Disconnects and drops a device. If it was main, main is reassigned
    /// deterministically (the earliest-inserted remaining device) or
    /// cleared.
    pub async fn remove_device(&mut self, device_id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .entries
            .remove(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.to_owned()))?;
        entry.controller.disconnect().await;
        self.order.retain(|id| id != device_id);

        if self.main_device_id.as_deref() == Some(device_id) {
            self.main_device_id = self.order.first().cloned();
        }
        Ok(())
    }

    /// Removes a mock device specifically; rejects real devices so callers
    /// can't tear down hardware through the mock-only command.
    pub async fn remove_mock_device(&mut self, device_id: &str) -> Result<(), RegistryError> {
        match self.entries.get(device_id) {
            Some(e) if e.descriptor.is_mock => self.remove_device(device_id).await,
            Some(_) => Err(RegistryError::NotMock(device_id.to_owned())),
            None => Err(RegistryError::UnknownDevice(device_id.to_owned())),
        }
    }

    pub fn set_main_device(&mut self, device_id: &str) -> Result<(), RegistryError> {
        if !self.entries.contains_key(device_id) {
            return Err(RegistryError::UnknownDevice(device_id.to_owned()));
        }
        self.main_device_id = Some(device_id.to_owned());
        Ok(())
    }

    pub fn main_device_id(&self) -> Option<&str> {
        self.main_device_id.as_deref()
    }

    /// Clears the main-device pointer without removing the device itself;
    /// used by `clear_device`, which deselects but does not disconnect the
    /// registry entry.
    pub fn clear_main_device(&mut self) {
        self.main_device_id = None;
    }

    /// Resolves `device_id` to a controller, falling back to main when
    /// `device_id` is `None`.
    pub fn controller_mut(&mut self, device_id: Option<&str>) -> Option<&mut (dyn VestControllerLike + 'static)> {
        let id = device_id.or(self.main_device_id.as_deref())?.to_owned();
        self.entries.get_mut(&id).map(|e| e.controller.as_mut())
    }

    pub fn descriptor(&self, device_id: &str) -> Option<&DeviceDescriptor> {
        self.entries.get(device_id).map(|e| &e.descriptor)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.entries.contains_key(device_id)
    }

    /// Descriptors in insertion order, each paired with its id and whether
    /// it is currently main.
    pub fn list_devices(&self) -> Vec<(DeviceId, DeviceDescriptor, bool)> {
        self.order
            .iter()
            .filter_map(|id| {
                self.entries.get(id).map(|e| {
                    (id.clone(), e.descriptor.clone(), self.main_device_id.as_deref() == Some(id.as_str()))
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_with_serial(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0x1234,
            product_id: 0x5678,
            bus: 1,
            address: 2,
            serial_number: Some(serial.to_owned()),
            is_mock: false,
        }
    }

    #[test]
    fn dedup_by_serial() {
        let mut registry = Registry::new();
        registry.insert("device_a".into(), descriptor_with_serial("ABC"), Box::new(Controller::new()));
        let dup = descriptor_with_serial("ABC");
        assert_eq!(registry.find_existing(&dup), Some("device_a".to_string()));
    }

    #[test]
    fn dedup_by_bus_address_when_no_serial() {
        let mut registry = Registry::new();
        let info = DeviceDescriptor {
            vendor_id: 1,
            product_id: 2,
            bus: 3,
            address: 4,
            serial_number: None,
            is_mock: false,
        };
        registry.insert("device_a".into(), info.clone(), Box::new(Controller::new()));
        assert_eq!(registry.find_existing(&info), Some("device_a".to_string()));
    }

    #[test]
    fn no_match_across_different_serials() {
        let mut registry = Registry::new();
        registry.insert("device_a".into(), descriptor_with_serial("ABC"), Box::new(Controller::new()));
        assert_eq!(registry.find_existing(&descriptor_with_serial("XYZ")), None);
    }

    #[test]
    fn first_device_becomes_main() {
        let mut registry = Registry::new();
        registry.insert("device_a".into(), descriptor_with_serial("ABC"), Box::new(Controller::new()));
        assert_eq!(registry.main_device_id(), Some("device_a"));
    }

    #[tokio::test]
    async fn removing_main_reassigns_to_remaining() {
        let mut registry = Registry::new();
        registry.insert("device_a".into(), descriptor_with_serial("A"), Box::new(Controller::new()));
        registry.insert("device_b".into(), descriptor_with_serial("B"), Box::new(Controller::new()));
        registry.remove_device("device_a").await.unwrap();
        assert_eq!(registry.main_device_id(), Some("device_b"));
    }

    #[tokio::test]
    async fn removing_last_device_clears_main() {
        let mut registry = Registry::new();
        registry.insert("device_a".into(), descriptor_with_serial("A"), Box::new(Controller::new()));
        registry.remove_device("device_a").await.unwrap();
        assert_eq!(registry.main_device_id(), None);
    }

    #[test]
    fn mock_cap_enforced() {
        let mut registry = Registry::new();
        for _ in 0..MAX_MOCK_DEVICES {
            registry.add_mock_device().unwrap();
        }
        assert!(matches!(registry.add_mock_device(), Err(RegistryError::MockCapReached)));
    }

    #[tokio::test]
    async fn mock_cap_counts_live_devices_not_lifetime_created() {
        let mut registry = Registry::new();
        for _ in 0..MAX_MOCK_DEVICES {
            registry.add_mock_device().unwrap();
        }
        let id = registry.list_devices().into_iter().find(|(_, d, _)| d.is_mock).unwrap().0;
        registry.remove_mock_device(&id).await.unwrap();
        assert!(registry.add_mock_device().is_ok());
    }

    #[test]
    fn mock_device_id_is_opaque_and_long_enough() {
        let mut registry = Registry::new();
        let id = registry.add_mock_device().unwrap();
        assert!(id.starts_with("mock_"));
        assert!(id.len() >= "mock_".len() + 8);
    }
}
