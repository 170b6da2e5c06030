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

//! Centralized haptic-vest control daemon: multiplexes USB access to one or
//! more 8-cell vests across many TCP clients over a line-delimited JSON
//! protocol, with mock devices, player/game device resolution, predefined
//! effect sequencing, and pluggable per-game integration managers.

pub mod client_manager;
pub mod controller;
pub mod daemon;
pub mod definitions;
pub mod driver;
pub mod effects;
pub mod game_player_mapping;
pub mod integrations;
pub mod lifecycle;
pub mod mock_controller;
pub mod player_manager;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod service;

pub use daemon::Daemon;
pub use definitions::{Cell, DeviceDescriptor, DeviceSelector, Speed};
pub use lifecycle::{DEFAULT_HOST, DEFAULT_PORT};
