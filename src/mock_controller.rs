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

//! API-identical stand-in for [`crate::controller::Controller`] used for
//! hardware-free testing. Always reports connected; logs triggers instead of
//! driving hardware.

use std::collections::VecDeque;

use async_trait::async_trait;
use log::debug;

use crate::controller::{Status, VestControllerLike};
use crate::definitions::{Cell, DeviceDescriptor, DeviceSelector, Speed};

const RING_CAPACITY: usize = 100;

/// Sentinel recorded by `stop_all`, matching the `(-1, 0)` marker in the
/// original implementation's trigger log.
pub const STOP_ALL_SENTINEL: (i16, u8) = (-1, 0);

pub struct MockController {
    descriptor: DeviceDescriptor,
    triggers: VecDeque<(i16, u8)>,
}

impl MockController {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            triggers: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    fn record(&mut self, entry: (i16, u8)) {
        if self.triggers.len() == RING_CAPACITY {
            self.triggers.pop_front();
        }
        self.triggers.push_back(entry);
    }

    /// The most recent triggers, oldest first, for test assertions.
    pub fn recent_triggers(&self) -> &VecDeque<(i16, u8)> {
        &self.triggers
    }
}

#[async_trait]
impl VestControllerLike for MockController {
    async fn connect_to_device(&mut self, _selector: &DeviceSelector) -> Status {
        self.status()
    }

    async fn trigger(&mut self, cell: Cell, speed: Speed) -> bool {
        debug!("mock trigger cell={} speed={}", cell.get(), speed.get());
        self.record((cell.get() as i16, speed.get()));
        true
    }

    async fn stop_all(&mut self) {
        self.record(STOP_ALL_SENTINEL);
    }

    async fn disconnect(&mut self) {
        // Mocks are permanently connected; disconnect is a no-op.
    }

    fn status(&self) -> Status {
        Status {
            connected: true,
            vendor_id: Some(self.descriptor.vendor_id),
            product_id: Some(self.descriptor.product_id),
            bus: Some(self.descriptor.bus),
            address: Some(self.descriptor.address),
            serial: self.descriptor.serial_number.clone(),
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_descriptor(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0,
            product_id: 0,
            bus: 0,
            address: 0,
            serial_number: Some(serial.to_owned()),
            is_mock: true,
        }
    }

    #[tokio::test]
    async fn always_reports_connected() {
        let mock = MockController::new(mock_descriptor("MOCK-001"));
        assert!(mock.status().connected);
    }

    #[tokio::test]
    async fn trigger_is_recorded_and_ring_bounded() {
        let mut mock = MockController::new(mock_descriptor("MOCK-002"));
        for i in 0..(RING_CAPACITY + 10) {
            let cell = Cell::new((i % 8) as u8).unwrap();
            mock.trigger(cell, Speed::new(5).unwrap()).await;
        }
        assert_eq!(mock.recent_triggers().len(), RING_CAPACITY);
    }

    #[tokio::test]
    async fn stop_all_appends_sentinel() {
        let mut mock = MockController::new(mock_descriptor("MOCK-003"));
        mock.stop_all().await;
        assert_eq!(mock.recent_triggers().back(), Some(&STOP_ALL_SENTINEL));
    }
}
