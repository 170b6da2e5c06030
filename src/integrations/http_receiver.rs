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

//! Reference HTTP-receiving integration manager: binds a loopback port,
//! accepts JSON POSTs, and turns them into haptic triggers plus
//! `<game>_game_event` broadcasts. Modeled on game-state-integration style
//! webhooks (e.g. a shooter's GSI feed).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use warp::Filter;

use crate::definitions::Cell;
use crate::integrations::{cells_for_direction, speed_for_damage, IntegrationError, IntegrationManager, LoopPoster, ManagerCallback, ManagerStatus};

/// Inbound payload shape this reference receiver understands. A real
/// per-game parser would replace this with that game's actual schema; the
/// spec only requires the manager satisfy the lifecycle + callback
/// contract, not a specific wire format.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    event_type: String,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
}

pub struct HttpReceiverManager {
    game_id: String,
    max_amount: f64,
    poster: LoopPoster,
    server: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
    status: ManagerStatus,
}

impl HttpReceiverManager {
    pub fn new(game_id: impl Into<String>, max_amount: f64, poster: LoopPoster) -> Self {
        Self {
            game_id: game_id.into(),
            max_amount,
            poster,
            server: None,
            status: ManagerStatus::default(),
        }
    }
}

fn handle_event(game_id: String, poster: LoopPoster, max_amount: f64, body: InboundEvent) -> impl warp::Reply {
    if let (Some(direction), Some(amount)) = (&body.direction, body.amount) {
        let speed = speed_for_damage(amount, max_amount);
        for raw_cell in cells_for_direction(direction) {
            if let Ok(cell) = Cell::new(raw_cell) {
                poster.post(ManagerCallback::Trigger { device_id: None, cell, speed });
            }
        }
    }

    let mut params = Map::new();
    if let Some(amount) = body.amount {
        params.insert("amount".into(), serde_json::json!(amount));
    }
    if let Some(direction) = &body.direction {
        params.insert("direction".into(), Value::String(direction.clone()));
    }
    poster.post(ManagerCallback::GameEvent {
        game_id,
        event_type: body.event_type,
        params,
    });

    warp::reply::json(&serde_json::json!({ "ok": true }))
}

#[async_trait]
impl IntegrationManager for HttpReceiverManager {
    fn game_id(&self) -> &str {
        &self.game_id
    }

    async fn start(&mut self, config: Map<String, Value>) -> Result<(), IntegrationError> {
        if self.status.running {
            return Ok(());
        }

        let port = config
            .get("port")
            .and_then(Value::as_u64)
            .ok_or_else(|| IntegrationError::StartFailed("missing port".to_owned()))? as u16;

        let game_id = self.game_id.clone();
        let poster = self.poster.clone();
        let max_amount = self.max_amount;

        let route = warp::path("event")
            .and(warp::post())
            .and(warp::body::json())
            .map(move |body: InboundEvent| handle_event(game_id.clone(), poster.clone(), max_amount, body));

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let bound = warp::serve(route).try_bind_with_graceful_shutdown(addr, async {
            shutdown_rx.await.ok();
        });
        let (_, server_future) = match bound {
            Ok(b) => b,
            Err(e) => return Err(IntegrationError::StartFailed(format!("bind {addr} failed: {e}"))),
        };

        let join = tokio::spawn(server_future);
        self.server = Some((join, shutdown_tx));
        self.status.enabled = true;
        self.status.running = true;
        info!("{}: HTTP receiver listening on {addr}", self.game_id);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some((join, shutdown_tx)) = self.server.take() {
            let _ = shutdown_tx.send(());
            if let Err(e) = join.await {
                warn!("{}: HTTP receiver task join failed: {e}", self.game_id);
            }
        }
        self.status.running = false;
    }

    fn status(&self) -> ManagerStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_fails_without_port() {
        let (poster, _rx) = crate::integrations::channel();
        let mut manager = HttpReceiverManager::new("testgame", 100.0, poster);
        assert!(manager.start(Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let (poster, _rx) = crate::integrations::channel();
        let mut manager = HttpReceiverManager::new("testgame", 100.0, poster);
        let mut config = Map::new();
        config.insert("port".into(), serde_json::json!(0u16));
        // port 0 asks the OS for an ephemeral port; bind should still succeed.
        manager.start(config.clone()).await.unwrap();
        manager.start(config).await.unwrap(); // second start is a no-op
        manager.stop().await;
        manager.stop().await; // second stop is a no-op
    }
}
