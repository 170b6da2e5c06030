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

//! `(game_id, player_num) → device_id` table.

use std::collections::HashMap;

use crate::registry::DeviceId;

pub type GameId = String;

#[derive(Default)]
pub struct GamePlayerMapping {
    entries: HashMap<(GameId, u32), DeviceId>,
}

impl GamePlayerMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, game_id: GameId, player_num: u32, device_id: DeviceId) {
        self.entries.insert((game_id, player_num), device_id);
    }

    pub fn get(&self, game_id: &str, player_num: u32) -> Option<&DeviceId> {
        self.entries.get(&(game_id.to_owned(), player_num))
    }

    /// Clears one `(game_id, player_num)` entry, or every entry for
    /// `game_id` when `player_num` is `None`.
    pub fn clear(&mut self, game_id: &str, player_num: Option<u32>) {
        match player_num {
            Some(num) => {
                self.entries.remove(&(game_id.to_owned(), num));
            }
            None => {
                self.entries.retain(|(g, _), _| g != game_id);
            }
        }
    }

    pub fn list_for_game(&self, game_id: &str) -> Vec<(u32, DeviceId)> {
        self.entries
            .iter()
            .filter(|((g, _), _)| g == game_id)
            .map(|((_, num), device_id)| (*num, device_id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut map = GamePlayerMapping::new();
        map.set("cs2".into(), 1, "device_c".into());
        assert_eq!(map.get("cs2", 1), Some(&"device_c".to_string()));
    }

    #[test]
    fn clearing_specific_slot_leaves_others() {
        let mut map = GamePlayerMapping::new();
        map.set("cs2".into(), 1, "device_c".into());
        map.set("cs2".into(), 2, "device_d".into());
        map.clear("cs2", Some(1));
        assert_eq!(map.get("cs2", 1), None);
        assert_eq!(map.get("cs2", 2), Some(&"device_d".to_string()));
    }

    #[test]
    fn clearing_whole_game_removes_all_slots() {
        let mut map = GamePlayerMapping::new();
        map.set("cs2".into(), 1, "device_c".into());
        map.set("cs2".into(), 2, "device_d".into());
        map.clear("cs2", None);
        assert!(map.list_for_game("cs2").is_empty());
    }
}
