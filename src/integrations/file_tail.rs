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

//! Reference file-tailing integration manager: watches a growing log file
//! for lines matching simple patterns and turns matches into haptic
//! triggers plus `<game>_game_event` broadcasts.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::definitions::Cell;
use crate::integrations::{cells_for_direction, speed_for_damage, IntegrationError, IntegrationManager, LoopPoster, ManagerCallback, ManagerStatus};

/// Poll cadence for the tailer thread; ~20 Hz per the reference design.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A single recognized log-line pattern: if `needle` is contained in a
/// line, treat it as a hit with the given direction and damage amount.
/// Per-game parsers are explicitly out of scope; this is the illustrative
/// shape a manager's pattern table takes, not a specific game's grammar.
pub struct HitPattern {
    pub needle: &'static str,
    pub direction: &'static str,
    pub damage: f64,
}

pub struct FileTailManager {
    game_id: String,
    patterns: Vec<HitPattern>,
    max_damage: f64,
    poster: LoopPoster,
    worker: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    status: ManagerStatus,
}

impl FileTailManager {
    pub fn new(game_id: impl Into<String>, patterns: Vec<HitPattern>, max_damage: f64, poster: LoopPoster) -> Self {
        Self {
            game_id: game_id.into(),
            patterns,
            max_damage,
            poster,
            worker: None,
            cancel: CancellationToken::new(),
            status: ManagerStatus::default(),
        }
    }

    fn spawn_worker(&self, path: PathBuf) -> JoinHandle<()> {
        let poster = self.poster.clone();
        let game_id = self.game_id.clone();
        let cancel = self.cancel.clone();
        let patterns = self.patterns.iter().map(|p| (p.needle, p.direction, p.damage)).collect::<Vec<_>>();
        let max_damage = self.max_damage;

        std::thread::spawn(move || {
            let mut file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    warn!("{game_id}: failed to open {}: {e}", path.display());
                    return;
                }
            };
            // Start at end-of-file: only newly appended lines are ingested.
            let mut position = file.metadata().map(|m| m.len()).unwrap_or(0);
            let _ = file.seek(SeekFrom::Start(position));
            let mut carry = String::new();

            while !cancel.is_cancelled() {
                std::thread::sleep(POLL_INTERVAL);

                let len = match file.metadata() {
                    Ok(m) => m.len(),
                    Err(_) => continue,
                };

                if len < position {
                    // Truncation/rotation: reset to the start and keep going.
                    position = 0;
                    let _ = file.seek(SeekFrom::Start(0));
                }

                if len == position {
                    continue;
                }

                let mut buf = String::new();
                if file.read_to_string(&mut buf).is_err() {
                    continue;
                }
                position = file.metadata().map(|m| m.len()).unwrap_or(position);

                carry.push_str(&buf);
                while let Some(idx) = carry.find('\n') {
                    let line: String = carry.drain(..=idx).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    for (needle, direction, damage) in &patterns {
                        if line.contains(needle) {
                            let speed = speed_for_damage(*damage, max_damage);
                            for raw_cell in cells_for_direction(direction) {
                                if let Ok(cell) = Cell::new(raw_cell) {
                                    poster.post(ManagerCallback::Trigger {
                                        device_id: None,
                                        cell,
                                        speed,
                                    });
                                }
                            }
                            let mut params = Map::new();
                            params.insert("direction".into(), Value::String((*direction).to_owned()));
                            params.insert("damage".into(), serde_json::json!(damage));
                            poster.post(ManagerCallback::GameEvent {
                                game_id: game_id.clone(),
                                event_type: "hit".to_owned(),
                                params,
                            });
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl IntegrationManager for FileTailManager {
    fn game_id(&self) -> &str {
        &self.game_id
    }

    async fn start(&mut self, config: Map<String, Value>) -> Result<(), IntegrationError> {
        if self.status.running {
            return Ok(());
        }

        let path = config
            .get("log_path")
            .and_then(Value::as_str)
            .ok_or_else(|| IntegrationError::StartFailed("missing log_path".to_owned()))?;
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(IntegrationError::StartFailed(format!("{} does not exist", path.display())));
        }

        self.cancel = CancellationToken::new();
        self.worker = Some(self.spawn_worker(path));
        self.status.enabled = true;
        self.status.running = true;
        info!("{}: tailing started", self.game_id);
        Ok(())
    }

    async fn stop(&mut self) {
        if !self.status.running {
            return;
        }
        self.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.status.running = false;
        info!("{}: tailing stopped", self.game_id);
    }

    fn status(&self) -> ManagerStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn start_fails_when_log_path_missing_from_config() {
        let (poster, _rx) = crate::integrations::channel();
        let mut manager = FileTailManager::new("testgame", vec![], 100.0, poster);
        let result = manager.start(Map::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_fails_when_file_does_not_exist() {
        let (poster, _rx) = crate::integrations::channel();
        let mut manager = FileTailManager::new("testgame", vec![], 100.0, poster);
        let mut config = Map::new();
        config.insert("log_path".into(), Value::String("/nonexistent/path.log".into()));
        assert!(manager.start(config).await.is_err());
    }

    #[tokio::test]
    async fn tailing_detects_appended_lines() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("vest-daemon-test-{}.log", uuid::Uuid::new_v4()));
        std::fs::write(&path, "").unwrap();

        let (poster, mut rx) = crate::integrations::channel();
        let patterns = vec![HitPattern { needle: "DAMAGE", direction: "front", damage: 20.0 }];
        let mut manager = FileTailManager::new("testgame", patterns, 100.0, poster);
        let mut config = Map::new();
        config.insert("log_path".into(), Value::String(path.to_string_lossy().into_owned()));
        manager.start(config).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "player took DAMAGE 20").unwrap();
        }

        let callback = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(callback.is_ok() && callback.unwrap().is_some());

        manager.stop().await;
        let _ = std::fs::remove_file(&path);
    }
}
