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

//! Predefined haptic effects and the background sequencer that plays them.
//! Effects are static data loaded once at boot, never mutated at runtime.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde_json::Map;
use tokio::sync::Mutex;

use crate::client_manager::ClientManager;
use crate::definitions::{Cell, Speed};
use crate::payload;
use crate::protocol::Event;
use crate::registry::{DeviceId, Registry};

#[derive(Debug, Clone)]
pub struct EffectStep {
    pub cells: Vec<u8>,
    pub speed: u8,
    pub duration_ms: u64,
    pub delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Effect {
    pub name: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub steps: Vec<EffectStep>,
}

/// Static effect table, loaded once at boot. Mirrors the shape (not the
/// exact catalog) of the predefined effects in the original implementation.
pub fn builtin_effects() -> Vec<Effect> {
    vec![
        Effect {
            name: "heartbeat",
            display_name: "Heartbeat",
            category: "ambient",
            steps: vec![
                EffectStep { cells: vec![3, 4], speed: 6, duration_ms: 120, delay_ms: 120 },
                EffectStep { cells: vec![3, 4], speed: 3, duration_ms: 100, delay_ms: 600 },
            ],
        },
        Effect {
            name: "wave_front_to_back",
            display_name: "Wave (front to back)",
            category: "demo",
            steps: vec![
                EffectStep { cells: vec![0, 1], speed: 7, duration_ms: 150, delay_ms: 50 },
                EffectStep { cells: vec![2, 3], speed: 7, duration_ms: 150, delay_ms: 50 },
                EffectStep { cells: vec![4, 5], speed: 7, duration_ms: 150, delay_ms: 50 },
                EffectStep { cells: vec![6, 7], speed: 7, duration_ms: 150, delay_ms: 50 },
            ],
        },
        Effect {
            name: "full_pulse",
            display_name: "Full pulse",
            category: "alert",
            steps: vec![EffectStep { cells: (0..8).collect(), speed: 10, duration_ms: 300, delay_ms: 0 }],
        },
    ]
}

pub fn find_effect(effects: &[Effect], name: &str) -> Option<Effect> {
    effects.iter().find(|e| e.name == name).cloned()
}

/// Zeroes all 8 cells on `device_id` and broadcasts `all_stopped`. Does NOT
/// cancel in-flight effect tasks: their remaining steps still fire, but each
/// trigger is harmless since cells were already zeroed between steps. This
/// mirrors the non-cancelling default the effect sequencer documents.
pub async fn stop_effect(registry: &Arc<Mutex<Registry>>, clients: &Arc<Mutex<ClientManager>>, device_id: Option<DeviceId>) {
    let mut registry_guard = registry.lock().await;
    if let Some(controller) = registry_guard.controller_mut(device_id.as_deref()) {
        controller.stop_all().await;
    }
    drop(registry_guard);
    clients.lock().await.broadcast(&Event::new("all_stopped", Map::new()).to_line());
}

/// Spawns the background task for `play_effect(name)`. Multiple effects may
/// run concurrently; they are not serialized against each other, matching
/// the spec's deliberately simple sequencing model.
pub fn play_effect(
    effect: Effect,
    device_id: Option<DeviceId>,
    registry: Arc<Mutex<Registry>>,
    clients: Arc<Mutex<ClientManager>>,
) {
    tokio::spawn(async move {
        clients.lock().await.broadcast(&Event::new("effect_started", payload! { "name" => effect.name }).to_line());

        for step in &effect.steps {
            let Ok(speed) = Speed::new(step.speed) else {
                warn!("effect {} has an out-of-range step speed {}, skipping step", effect.name, step.speed);
                continue;
            };

            for raw_cell in &step.cells {
                let Ok(cell) = Cell::new(*raw_cell) else {
                    warn!("effect {} has an out-of-range cell {}, skipping", effect.name, raw_cell);
                    continue;
                };
                let mut registry_guard = registry.lock().await;
                if let Some(controller) = registry_guard.controller_mut(device_id.as_deref()) {
                    controller.trigger(cell, speed).await;
                }
                drop(registry_guard);
                clients.lock().await.broadcast(
                    &Event::new(
                        "effect_triggered",
                        payload! { "cell" => cell.get(), "speed" => speed.get() },
                    )
                    .to_line(),
                );
            }

            tokio::time::sleep(Duration::from_millis(step.duration_ms)).await;

            let mut registry_guard = registry.lock().await;
            for raw_cell in &step.cells {
                if let Ok(cell) = Cell::new(*raw_cell) {
                    if let Some(controller) = registry_guard.controller_mut(device_id.as_deref()) {
                        controller.trigger(cell, Speed::off()).await;
                    }
                }
            }
            drop(registry_guard);

            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }

        clients
            .lock()
            .await
            .broadcast(&Event::new("effect_completed", payload! { "name" => effect.name }).to_line());
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_effects_is_non_empty() {
        assert!(!builtin_effects().is_empty());
    }

    #[test]
    fn find_effect_by_name() {
        let effects = builtin_effects();
        assert!(find_effect(&effects, "heartbeat").is_some());
        assert!(find_effect(&effects, "does_not_exist").is_none());
    }
}
