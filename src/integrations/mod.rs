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

//! Pluggable per-game integration managers: background workers that
//! normalize heterogeneous game events into haptic triggers plus broadcast
//! events, without ever touching the registry or client set directly.

pub mod file_tail;
pub mod http_receiver;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::warn;
use serde_json::{Map, Value};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::definitions::{Cell, Speed};
use crate::registry::DeviceId;

/// A unit of work an integration's background worker posts back onto the
/// broker loop. Workers never call controller or broadcast functions
/// directly; this is the sole place cross-thread handoff occurs.
pub enum ManagerCallback {
    Trigger { device_id: Option<DeviceId>, cell: Cell, speed: Speed },
    GameEvent { game_id: String, event_type: String, params: Map<String, Value> },
}

/// Bounded channel the broker loop drains between dispatcher steps.
/// Back-pressure policy: drop the oldest pending callback and count the
/// drop, since haptic events go stale fast and a full channel should never
/// block a worker thread.
pub struct LoopPoster {
    sender: Sender<ManagerCallback>,
    dropped: &'static AtomicU64,
}

const POSTER_CAPACITY: usize = 256;

static DROPPED_CALLBACKS: AtomicU64 = AtomicU64::new(0);

pub fn channel() -> (LoopPoster, Receiver<ManagerCallback>) {
    let (tx, rx) = tokio::sync::mpsc::channel(POSTER_CAPACITY);
    (LoopPoster { sender: tx, dropped: &DROPPED_CALLBACKS }, rx)
}

impl Clone for LoopPoster {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone(), dropped: self.dropped }
    }
}

impl LoopPoster {
    /// Posts from a worker thread or task. Never blocks: on a full channel
    /// the callback is dropped and counted rather than backing up the
    /// worker.
    pub fn post(&self, callback: ManagerCallback) {
        if self.sender.try_send(callback).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("integration callback channel full, dropped callback (total dropped: {dropped})");
        }
    }

    pub fn dropped_count() -> u64 {
        DROPPED_CALLBACKS.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerStatus {
    pub enabled: bool,
    pub running: bool,
    pub events_received: u64,
    pub last_event_ts: Option<f64>,
    pub last_event_type: Option<String>,
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("integration failed to start: {0}")]
    StartFailed(String),
}

/// Required contract for every integration manager. Idempotent:
/// calling `start` while already running, or `stop` while already stopped,
/// is a no-op that still returns `Ok(())`.
#[async_trait]
pub trait IntegrationManager: Send + Sync {
    /// Stable tag used in command names (`<tag>_start`, `<tag>_event`, ...)
    /// and in the broadcast `<tag>_game_event` / `<tag>_started` events.
    fn game_id(&self) -> &str;

    async fn start(&mut self, config: Map<String, Value>) -> Result<(), IntegrationError>;
    async fn stop(&mut self);
    fn status(&self) -> ManagerStatus;
}

/// Direction-to-cells helper shared by reference managers: maps a coarse
/// compass direction to the vest cells on that side of the body.
pub fn cells_for_direction(direction: &str) -> Vec<u8> {
    match direction {
        "front" => vec![0, 1],
        "back" => vec![6, 7],
        "left" => vec![0, 2, 4, 6],
        "right" => vec![1, 3, 5, 7],
        _ => vec![3, 4],
    }
}

/// Damage-to-intensity helper: monotone non-decreasing, clamped to 1..=10.
pub fn speed_for_damage(amount: f64, max_amount: f64) -> Speed {
    if max_amount <= 0.0 {
        return Speed::clamp(1.0);
    }
    Speed::clamp(1.0 + 9.0 * (amount / max_amount).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_for_damage_is_monotone_and_clamped() {
        let low = speed_for_damage(1.0, 100.0).get();
        let mid = speed_for_damage(50.0, 100.0).get();
        let high = speed_for_damage(1000.0, 100.0).get();
        assert!(low <= mid);
        assert!(mid <= high);
        assert!(high <= 10);
        assert!(low >= 1);
    }

    #[test]
    fn cells_for_direction_has_a_default() {
        assert!(!cells_for_direction("unknown").is_empty());
    }
}
