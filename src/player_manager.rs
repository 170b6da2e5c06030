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

//! `player_id → device_id` table with an optional display name. Pure,
//! synchronous, and idempotent — reassigning overwrites, unregistering
//! never touches a device.

use std::collections::HashMap;

use crate::registry::DeviceId;

pub type PlayerId = String;

#[derive(Debug, Clone)]
pub struct Player {
    pub player_id: PlayerId,
    pub device_id: Option<DeviceId>,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("unknown player id {0}")]
    UnknownPlayer(PlayerId),
}

#[derive(Default)]
pub struct PlayerManager {
    players: HashMap<PlayerId, Player>,
}

impl PlayerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_player(&mut self, player_id: PlayerId, name: Option<String>) -> Player {
        let player = Player {
            player_id: player_id.clone(),
            device_id: None,
            name,
        };
        self.players.insert(player_id, player.clone());
        player
    }

    pub fn assign(&mut self, player_id: &str, device_id: DeviceId) -> Result<(), PlayerError> {
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| PlayerError::UnknownPlayer(player_id.to_owned()))?;
        player.device_id = Some(device_id);
        Ok(())
    }

    pub fn unassign(&mut self, player_id: &str) -> Result<(), PlayerError> {
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| PlayerError::UnknownPlayer(player_id.to_owned()))?;
        player.device_id = None;
        Ok(())
    }

    pub fn device_for(&self, player_id: &str) -> Option<&DeviceId> {
        self.players.get(player_id)?.device_id.as_ref()
    }

    pub fn get(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub fn list(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_then_get_round_trips() {
        let mut pm = PlayerManager::new();
        pm.create_player("p1".into(), None);
        pm.assign("p1", "device_a".into()).unwrap();
        assert_eq!(pm.device_for("p1"), Some(&"device_a".to_string()));
    }

    #[test]
    fn reassign_overwrites() {
        let mut pm = PlayerManager::new();
        pm.create_player("p1".into(), None);
        pm.assign("p1", "device_a".into()).unwrap();
        pm.assign("p1", "device_b".into()).unwrap();
        assert_eq!(pm.device_for("p1"), Some(&"device_b".to_string()));
    }

    #[test]
    fn unassigned_player_has_no_device() {
        let mut pm = PlayerManager::new();
        pm.create_player("p1".into(), None);
        assert_eq!(pm.device_for("p1"), None);
    }
}
