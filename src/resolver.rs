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

//! The pure function that picks a target device for a `trigger`/`stop`
//! request. Kept out of the dispatcher so the fallback chain is trivially
//! testable on its own.

use crate::game_player_mapping::GamePlayerMapping;
use crate::player_manager::PlayerManager;
use crate::registry::{DeviceId, Registry};

/// The addressing fields a vest-control command may carry. Any subset may
/// be present; resolution stops at the first hit.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub device_id: Option<DeviceId>,
    pub game_id: Option<String>,
    pub player_num: Option<u32>,
    pub player_id: Option<String>,
}

/// Strict four-step fallback chain: direct device id, then game/player-num
/// mapping, then player's assigned device, then the registry's main device.
pub fn resolve(
    request: &ResolveRequest,
    registry: &Registry,
    players: &PlayerManager,
    game_map: &GamePlayerMapping,
) -> Option<DeviceId> {
    if let Some(device_id) = &request.device_id {
        if registry.contains(device_id) {
            return Some(device_id.clone());
        }
    }

    if let (Some(game_id), Some(player_num)) = (&request.game_id, request.player_num) {
        if let Some(device_id) = game_map.get(game_id, player_num) {
            return Some(device_id.clone());
        }
    }

    if let Some(player_id) = &request.player_id {
        if let Some(device_id) = players.device_for(player_id) {
            return Some(device_id.clone());
        }
    }

    registry.main_device_id().map(|s| s.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Controller;
    use crate::definitions::DeviceDescriptor;

    fn descriptor(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0,
            product_id: 0,
            bus: 0,
            address: 0,
            serial_number: Some(serial.to_owned()),
            is_mock: false,
        }
    }

    fn setup() -> (Registry, PlayerManager, GamePlayerMapping) {
        let mut registry = Registry::new();
        registry.insert_for_test("device_x".into(), descriptor("X"));
        registry.insert_for_test("device_y".into(), descriptor("Y"));
        registry.insert_for_test("device_z".into(), descriptor("Z"));
        registry.insert_for_test("device_m".into(), descriptor("M"));

        let mut players = PlayerManager::new();
        players.create_player("p1".into(), None);
        players.assign("p1", "device_z".into()).unwrap();

        let mut game_map = GamePlayerMapping::new();
        game_map.set("cs2".into(), 1, "device_y".into());

        (registry, players, game_map)
    }

    #[test]
    fn direct_device_id_wins() {
        let (registry, players, game_map) = setup();
        let req = ResolveRequest {
            device_id: Some("device_x".into()),
            game_id: Some("cs2".into()),
            player_num: Some(1),
            player_id: Some("p1".into()),
        };
        assert_eq!(resolve(&req, &registry, &players, &game_map), Some("device_x".to_string()));
    }

    #[test]
    fn game_map_beats_player_map() {
        let (registry, players, game_map) = setup();
        let req = ResolveRequest {
            device_id: None,
            game_id: Some("cs2".into()),
            player_num: Some(1),
            player_id: Some("p1".into()),
        };
        assert_eq!(resolve(&req, &registry, &players, &game_map), Some("device_y".to_string()));
    }

    #[test]
    fn player_map_used_when_no_game_match() {
        let (registry, players, game_map) = setup();
        let req = ResolveRequest {
            device_id: None,
            game_id: None,
            player_num: None,
            player_id: Some("p1".into()),
        };
        assert_eq!(resolve(&req, &registry, &players, &game_map), Some("device_z".to_string()));
    }

    #[test]
    fn falls_back_to_main() {
        let (registry, players, game_map) = setup();
        let req = ResolveRequest::default();
        assert_eq!(resolve(&req, &registry, &players, &game_map), Some("device_x".to_string()));
    }

    #[test]
    fn no_device_at_all_resolves_to_none() {
        let registry = Registry::new();
        let players = PlayerManager::new();
        let game_map = GamePlayerMapping::new();
        assert_eq!(resolve(&ResolveRequest::default(), &registry, &players, &game_map), None);
    }
}
