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

//! Stateful wrapper around one USB driver session, and the trait that lets
//! the registry treat real and mock controllers interchangeably.

use async_trait::async_trait;
use log::warn;

use crate::definitions::{Cell, DeviceDescriptor, DeviceSelector, Speed};
use crate::driver::{UsbVestDriver, VestDriver};

/// Read-only snapshot of a controller's connection state. Produced only by
/// the controller; callers must treat it as read-only.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub connected: bool,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub bus: Option<u8>,
    pub address: Option<u8>,
    pub serial: Option<String>,
    pub last_error: Option<String>,
}

impl Status {
    fn from_descriptor(d: &DeviceDescriptor) -> Self {
        Self {
            connected: true,
            vendor_id: Some(d.vendor_id),
            product_id: Some(d.product_id),
            bus: Some(d.bus),
            address: Some(d.address),
            serial: d.serial_number.clone(),
            last_error: None,
        }
    }

    fn disconnected_with_error(message: String) -> Self {
        Self {
            connected: false,
            last_error: Some(message),
            ..Default::default()
        }
    }
}

/// What the registry actually needs from a controller, real or mock.
/// A plain trait object rather than an inheritance hierarchy, per the
/// polymorphism requirement on the registry's stored controllers.
#[async_trait]
pub trait VestControllerLike: Send + Sync {
    async fn connect_to_device(&mut self, selector: &DeviceSelector) -> Status;
    async fn trigger(&mut self, cell: Cell, speed: Speed) -> bool;
    async fn stop_all(&mut self);
    async fn disconnect(&mut self);
    fn status(&self) -> Status;
}

/// Owns at most one USB session at a time. Disconnect is idempotent; every
/// operation's failure is reflected in `status()` rather than propagated.
#[derive(Default)]
pub struct Controller {
    driver: Option<UsbVestDriver>,
    status: Status,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VestControllerLike for Controller {
    async fn connect_to_device(&mut self, selector: &DeviceSelector) -> Status {
        // A session is already open: close it first, matching the
        // "connect always starts fresh" contract.
        self.disconnect().await;

        match UsbVestDriver::open(selector).await {
            Ok(driver) => {
                self.status = Status::from_descriptor(driver.descriptor());
                self.driver = Some(driver);
            }
            Err(e) => {
                self.status = Status::disconnected_with_error(e.to_string());
            }
        }
        self.status.clone()
    }

    async fn trigger(&mut self, cell: Cell, speed: Speed) -> bool {
        if self.driver.is_none() {
            // Implicit connect with no selector, per the controller contract.
            self.connect_to_device(&DeviceSelector::First).await;
        }

        let Some(driver) = self.driver.as_ref() else {
            return false;
        };

        match driver.send(cell, speed).await {
            Ok(()) => true,
            Err(e) => {
                self.status.last_error = Some(e.to_string());
                false
            }
        }
    }

    async fn stop_all(&mut self) {
        for cell in Cell::all() {
            if !self.trigger(cell, Speed::off()).await {
                warn!("stop_all: failed to zero cell {:?}, continuing best-effort", cell.get());
            }
        }
    }

    async fn disconnect(&mut self) {
        self.driver = None;
        self.status.connected = false;
    }

    fn status(&self) -> Status {
        self.status.clone()
    }
}

