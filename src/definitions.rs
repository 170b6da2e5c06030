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

//! Shared value types used across the registry, controller, and wire protocol.

use serde::{Deserialize, Serialize};

/// Number of addressable actuator cells on a vest.
pub const CELL_COUNT: u8 = 8;

/// Highest valid speed value; 0 means "off".
pub const MAX_SPEED: u8 = 10;

/// Highest valid cell index.
pub const MAX_CELL: u8 = CELL_COUNT - 1;

/// Maximum number of simultaneously registered mock devices.
pub const MAX_MOCK_DEVICES: usize = 20;

/// A validated actuator cell index in `0..=7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cell(u8);

/// A validated intensity value in `0..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Speed(u8);

/// A value fell outside the range the hardware accepts.
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("cell {0} out of range 0..={}", MAX_CELL)]
    Cell(u8),
    #[error("speed {0} out of range 0..={}", MAX_SPEED)]
    Speed(u8),
}

impl Cell {
    pub fn new(value: u8) -> Result<Self, RangeError> {
        if value <= MAX_CELL {
            Ok(Self(value))
        } else {
            Err(RangeError::Cell(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Cell> {
        (0..CELL_COUNT).map(|i| Cell(i))
    }
}

impl Speed {
    pub fn new(value: u8) -> Result<Self, RangeError> {
        if value <= MAX_SPEED {
            Ok(Self(value))
        } else {
            Err(RangeError::Speed(value))
        }
    }

    pub fn off() -> Self {
        Self(0)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Clamps a raw intensity scaling result into the valid range, per the
    /// monotone non-decreasing scaling rule integration managers use.
    pub fn clamp(value: f64) -> Self {
        Self(value.round().clamp(1.0, MAX_SPEED as f64) as u8)
    }
}

/// Immutable record produced by USB enumeration (or by synthesizing a mock).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
    pub serial_number: Option<String>,
    #[serde(default)]
    pub is_mock: bool,
}

impl DeviceDescriptor {
    /// Two descriptors name the same physical device if their serials match,
    /// or if serial is absent on both and bus+address match.
    pub fn same_device(&self, other: &DeviceDescriptor) -> bool {
        match (&self.serial_number, &other.serial_number) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.bus == other.bus && self.address == other.address,
            _ => false,
        }
    }
}

/// A selector used to choose which physical device a controller should open.
#[derive(Debug, Clone)]
pub enum DeviceSelector {
    First,
    BusAddress(u8, u8),
    Serial(String),
    Index(usize),
}
