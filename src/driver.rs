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

//! The external "vest driver" collaborator: primitive USB access to an 8-cell
//! actuator device. Everything above this module treats a driver as an opaque
//! handle — enumerate, open by selector, send (cell, speed), close.

use async_trait::async_trait;
use nusb::transfer::{ControlOut, ControlType, Recipient};
use nusb::{DeviceInfo, Interface};

use crate::definitions::{Cell, DeviceDescriptor, DeviceSelector, Speed};

/// Vendor request code the vest firmware exposes on its control endpoint.
/// `value` carries the cell index, `index` carries the speed.
const REQUEST_TRIGGER_CELL: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no matching USB device found")]
    NotFound,
    #[error("USB enumeration failed: {0}")]
    Enumerate(#[source] std::io::Error),
    #[error("failed to open device: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to claim vest interface: {0}")]
    ClaimInterface(#[source] std::io::Error),
    #[error("control transfer failed")]
    ControlTransfer(#[source] anyhow::Error),
}

/// A single open USB session to one vest. `async_trait` because enumeration
/// and control transfers are inherently async over `nusb`.
#[async_trait]
pub trait VestDriver: Send + Sync {
    /// Opens a session to the device matched by `selector`.
    async fn open(selector: &DeviceSelector) -> Result<Self, DriverError>
    where
        Self: Sized;

    /// The descriptor of the currently open device.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Sets one cell's intensity. Must be safe to call at any time after open.
    async fn send(&self, cell: Cell, speed: Speed) -> Result<(), DriverError>;

    /// Enumerates candidate vest devices currently attached to the system,
    /// without opening them.
    async fn enumerate() -> Result<Vec<DeviceDescriptor>, DriverError>
    where
        Self: Sized;
}

/// Known vendor/product id pair(s) the firmware in the wild uses. A real
/// deployment would load this from configuration; kept as a constant here
/// since device identification is outside this daemon's stated scope.
const VEST_VENDOR_ID: u16 = 0x0483;
const VEST_PRODUCT_ID: u16 = 0x5750;

/// `nusb`-backed implementation of [`VestDriver`].
pub struct UsbVestDriver {
    interface: Interface,
    descriptor: DeviceDescriptor,
}

fn matches(info: &DeviceInfo, selector: &DeviceSelector, index: usize) -> bool {
    match selector {
        DeviceSelector::First => true,
        DeviceSelector::BusAddress(bus, address) => {
            info.bus_number() == *bus && info.device_address() == *address
        }
        DeviceSelector::Serial(serial) => info.serial_number() == Some(serial.as_str()),
        DeviceSelector::Index(i) => *i == index,
    }
}

fn to_descriptor(info: &DeviceInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        bus: info.bus_number(),
        address: info.device_address(),
        serial_number: info.serial_number().map(|s| s.to_owned()),
        is_mock: false,
    }
}

#[async_trait]
impl VestDriver for UsbVestDriver {
    async fn open(selector: &DeviceSelector) -> Result<Self, DriverError> {
        let devices: Vec<DeviceInfo> = nusb::list_devices()
            .map_err(DriverError::Enumerate)?
            .filter(|d| d.vendor_id() == VEST_VENDOR_ID && d.product_id() == VEST_PRODUCT_ID)
            .collect();

        let info = devices
            .into_iter()
            .enumerate()
            .find(|(i, d)| matches(d, selector, *i))
            .map(|(_, d)| d)
            .ok_or(DriverError::NotFound)?;

        let device = info.open().map_err(DriverError::Open)?;
        let interface = device.claim_interface(0).map_err(DriverError::ClaimInterface)?;
        let descriptor = to_descriptor(&info);

        Ok(Self { interface, descriptor })
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    async fn send(&self, cell: Cell, speed: Speed) -> Result<(), DriverError> {
        let control_out = ControlOut {
            control_type: ControlType::Vendor,
            recipient: Recipient::Interface,
            request: REQUEST_TRIGGER_CELL,
            value: cell.get() as u16,
            index: speed.get() as u16,
            data: &[],
        };
        self.interface
            .control_out(control_out)
            .await
            .into_result()
            .map_err(|e| DriverError::ControlTransfer(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn enumerate() -> Result<Vec<DeviceDescriptor>, DriverError> {
        Ok(nusb::list_devices()
            .map_err(DriverError::Enumerate)?
            .filter(|d| d.vendor_id() == VEST_VENDOR_ID && d.product_id() == VEST_PRODUCT_ID)
            .map(|d| to_descriptor(&d))
            .collect())
    }
}
