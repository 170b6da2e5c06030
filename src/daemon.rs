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

//! Top-level composition: owns the registry, player/game maps, client set,
//! integration managers, and the TCP listener. A single dispatcher task
//! drains both inbound commands and integration callbacks, so the registry
//! and client maps never need their own mutex for same-loop access — the
//! mutex on each exists only because spawned effect tasks also touch them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::client_manager::{ClientId, ClientManager};
use crate::definitions::{Cell, DeviceDescriptor, DeviceSelector, Speed};
use crate::driver::VestDriver;
use crate::effects::{builtin_effects, find_effect, play_effect, stop_effect, Effect};
use crate::game_player_mapping::GamePlayerMapping;
use crate::integrations::file_tail::FileTailManager;
use crate::integrations::http_receiver::HttpReceiverManager;
use crate::integrations::{self, IntegrationManager, ManagerCallback};
use crate::payload;
use crate::player_manager::PlayerManager;
use crate::protocol::{Command, Event, Response, WireDeviceDescriptor};
use crate::registry::{DeviceId, Registry};
use crate::resolver::{resolve, ResolveRequest};
use crate::service::StopHandle;

struct DispatchRequest {
    client_id: ClientId,
    command: Command,
    respond: oneshot::Sender<Response>,
}

/// Everything the dispatcher needs to serve one command. Lives in the
/// single dispatcher task; `registry` and `clients` are still shared via
/// `Arc<Mutex<_>>` because the effect sequencer's spawned tasks touch them
/// concurrently with this loop.
pub struct Daemon {
    registry: Arc<Mutex<Registry>>,
    clients: Arc<Mutex<ClientManager>>,
    players: PlayerManager,
    game_map: GamePlayerMapping,
    effects: Vec<Effect>,
    integrations: HashMap<String, Box<dyn IntegrationManager>>,
}

fn param_str(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn param_u64(params: &Map<String, Value>, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

fn param_u8(params: &Map<String, Value>, key: &str) -> Option<u8> {
    param_u64(params, key).and_then(|v| u8::try_from(v).ok())
}

impl Daemon {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::new())),
            clients: Arc::new(Mutex::new(ClientManager::new())),
            players: PlayerManager::new(),
            game_map: GamePlayerMapping::new(),
            effects: builtin_effects(),
            integrations: HashMap::new(),
        }
    }

    /// Binds the listener and runs the dispatcher loop until `shutdown` is
    /// signaled. On shutdown: stops all integrations (each bounded at 2s),
    /// then disconnects every registered device.
    pub async fn run(mut self, host: &str, port: u16, mut shutdown: StopHandle) -> anyhow::Result<()> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("listening on {host}:{port}");

        let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<DispatchRequest>(256);
        let (poster, mut callback_rx) = integrations::channel();
        self.integrations.insert(
            "filegame".to_owned(),
            Box::new(FileTailManager::new("filegame", Vec::new(), 100.0, poster.clone())),
        );
        self.integrations.insert(
            "httpgame".to_owned(),
            Box::new(HttpReceiverManager::new("httpgame", 100.0, poster)),
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            info!("accepted connection from {addr}");
                            self.spawn_connection(stream, dispatch_tx.clone()).await;
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
                Some(request) = dispatch_rx.recv() => {
                    let response = self.dispatch(request.command).await;
                    let _ = request.respond.send(response);
                    let _ = &request.client_id; // kept for future per-client dispatch context
                }
                Some(callback) = callback_rx.recv() => {
                    self.apply_callback(callback).await;
                }
                _ = shutdown.signaled() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.shutdown_all().await;
        Ok(())
    }

    async fn shutdown_all(&mut self) {
        let stops = self.integrations.iter_mut().map(|(game_id, manager)| async move {
            if tokio::time::timeout(Duration::from_secs(2), manager.stop()).await.is_err() {
                warn!("{game_id}: stop() did not complete within 2s");
            }
        });
        futures::future::join_all(stops).await;

        let device_ids: Vec<DeviceId> = {
            let registry = self.registry.lock().await;
            registry.list_devices().into_iter().map(|(id, _, _)| id).collect()
        };
        let mut registry = self.registry.lock().await;
        for device_id in device_ids {
            let _ = registry.remove_device(&device_id).await;
        }
    }

    async fn spawn_connection(&self, stream: TcpStream, dispatch_tx: mpsc::Sender<DispatchRequest>) {
        let (read_half, mut write_half) = stream.into_split();
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

        let client_id = self.clients.lock().await.add(line_tx);
        self.broadcast_event("client_connected", payload! { "client_id" => client_id.clone() }).await;

        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let clients = self.clients.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break, // EOF
                    Ok(n) if n > crate::protocol::MAX_LINE_LENGTH => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("read error on client {client_id}: {e}");
                        break;
                    }
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let command: Command = match serde_json::from_str(trimmed) {
                    Ok(c) => c,
                    Err(e) => {
                        clients
                            .lock()
                            .await
                            .send_to(&client_id, Response::error(None, format!("invalid JSON: {e}")).to_line());
                        continue;
                    }
                };

                let (respond_tx, respond_rx) = oneshot::channel();
                let request = DispatchRequest { client_id: client_id.clone(), command, respond: respond_tx };
                if dispatch_tx.send(request).await.is_err() {
                    break;
                }
                if let Ok(response) = respond_rx.await {
                    clients.lock().await.send_to(&client_id, response.to_line());
                }
            }

            clients.lock().await.remove(&client_id);
            clients
                .lock()
                .await
                .broadcast(&Event::new("client_disconnected", payload! { "client_id" => client_id.clone() }).to_line());
        });
    }

    async fn broadcast_event(&self, tag: &str, payload: Map<String, Value>) {
        self.clients.lock().await.broadcast(&Event::new(tag, payload).to_line());
    }

    async fn apply_callback(&mut self, callback: ManagerCallback) {
        match callback {
            ManagerCallback::Trigger { device_id, cell, speed } => {
                let mut registry = self.registry.lock().await;
                if let Some(controller) = registry.controller_mut(device_id.as_deref()) {
                    controller.trigger(cell, speed).await;
                }
            }
            ManagerCallback::GameEvent { game_id, event_type, params } => {
                let mut payload = params;
                payload.insert("event_type".into(), Value::String(event_type));
                self.broadcast_event(&format!("{game_id}_game_event"), payload).await;
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Response {
        let req_id = command.req_id.clone();
        match self.handle(&command).await {
            Ok(response) => response,
            Err(message) => Response::error(req_id, message),
        }
    }

    async fn handle(&mut self, command: &Command) -> Result<Response, String> {
        let params = &command.params;
        let req_id = command.req_id.clone();

        match command.cmd.as_str() {
            "ping" => self.cmd_ping(req_id).await,
            "list" => self.cmd_list().await,
            "list_connected_devices" => self.cmd_list_connected_devices().await,
            "get_selected_device" => self.cmd_get_selected_device(req_id).await,
            "select_device" => self.cmd_select_device(params, req_id).await,
            "clear_device" => self.cmd_clear_device(req_id).await,
            "set_main_device" => self.cmd_set_main_device(params, req_id).await,
            "disconnect_device" => self.cmd_disconnect_device(params, req_id).await,
            "create_mock_device" => self.cmd_create_mock_device(req_id).await,
            "remove_mock_device" => self.cmd_remove_mock_device(params, req_id).await,
            "create_player" => self.cmd_create_player(params, req_id),
            "assign_player" => self.cmd_assign_player(params, req_id),
            "unassign_player" => self.cmd_unassign_player(params, req_id),
            "list_players" => self.cmd_list_players(req_id),
            "get_player_device" => self.cmd_get_player_device(params, req_id),
            "set_game_player_mapping" => self.cmd_set_game_player_mapping(params, req_id),
            "clear_game_player_mapping" => self.cmd_clear_game_player_mapping(params, req_id),
            "list_game_player_mappings" => self.cmd_list_game_player_mappings(params, req_id),
            "connect" => self.cmd_connect(params, req_id).await,
            "disconnect" => self.cmd_disconnect(params, req_id).await,
            "trigger" => self.cmd_trigger(params, req_id).await,
            "stop" => self.cmd_stop(params, req_id).await,
            "status" => self.cmd_status(params, req_id).await,
            "play_effect" => self.cmd_play_effect(params, req_id),
            "list_effects" => self.cmd_list_effects(req_id),
            "stop_effect" => self.cmd_stop_effect(params, req_id),
            other => self.dispatch_integration(other, params, req_id).await,
        }
    }

    // --- Health ---

    async fn cmd_ping(&self, req_id: Option<String>) -> Result<Response, String> {
        let has_device = self.registry.lock().await.main_device_id().is_some();
        let client_count = self.clients.lock().await.count();
        let payload = payload! {
            "alive" => true,
            "has_device_selected" => has_device,
            "client_count" => client_count,
        };
        Ok(Response::ok("ping", req_id).with_payload(payload))
    }

    // --- Discovery ---

    async fn cmd_list(&self) -> Result<Response, String> {
        let devices: Vec<Value> = {
            let registry = self.registry.lock().await;
            registry
                .list_devices()
                .into_iter()
                .map(|(id, descriptor, is_main)| {
                    serde_json::to_value(WireDeviceDescriptor::from_descriptor(id, &descriptor, is_main)).unwrap()
                })
                .collect()
        };

        let unclaimed: Vec<Value> = crate::driver::UsbVestDriver::enumerate()
            .await
            .map(|devices| {
                devices
                    .into_iter()
                    .map(|d: DeviceDescriptor| {
                        serde_json::json!({
                            "vendor_id": format!("0x{:04x}", d.vendor_id),
                            "product_id": format!("0x{:04x}", d.product_id),
                            "bus": d.bus,
                            "address": d.address,
                            "serial_number": d.serial_number,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Response::ok("list", None).with_payload(payload! { "devices" => devices, "unclaimed" => unclaimed }))
    }

    async fn cmd_list_connected_devices(&self) -> Result<Response, String> {
        let registry = self.registry.lock().await;
        let devices: Vec<Value> = registry
            .list_devices()
            .into_iter()
            .map(|(id, descriptor, is_main)| {
                serde_json::to_value(WireDeviceDescriptor::from_descriptor(id, &descriptor, is_main)).unwrap()
            })
            .collect();
        Ok(Response::ok("list_connected_devices", None).with_payload(payload! { "devices" => devices }))
    }

    async fn cmd_get_selected_device(&self, req_id: Option<String>) -> Result<Response, String> {
        let registry = self.registry.lock().await;
        let device_id = registry.main_device_id().map(str::to_owned);
        Ok(Response::ok("get_selected_device", req_id).with_payload(payload! { "device_id" => device_id }))
    }

    // --- Selection ---

    async fn cmd_select_device(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let serial = param_str(params, "serial");
        let bus = param_u8(params, "bus");
        let address = param_u8(params, "address");

        let info = match (serial, bus, address) {
            (Some(serial), _, _) => DeviceDescriptor {
                vendor_id: 0,
                product_id: 0,
                bus: 0,
                address: 0,
                serial_number: Some(serial),
                is_mock: false,
            },
            (None, Some(bus), Some(address)) => {
                DeviceDescriptor { vendor_id: 0, product_id: 0, bus, address, serial_number: None, is_mock: false }
            }
            _ => return Err("select_device requires serial OR bus+address".to_owned()),
        };

        let (device_id, is_new) = {
            let mut registry = self.registry.lock().await;
            let (device_id, _status, is_new) = registry.add_device(None, info).await.map_err(|e| e.to_string())?;
            registry.set_main_device(&device_id).map_err(|e| e.to_string())?;
            (device_id, is_new)
        };

        self.broadcast_event("device_selected", payload! { "device_id" => device_id.clone() }).await;
        if is_new {
            self.broadcast_event("device_connected", payload! { "device_id" => device_id.clone() }).await;
        }
        Ok(Response::ok("select_device", req_id).with_payload(payload! { "device_id" => device_id }))
    }

    async fn cmd_clear_device(&mut self, req_id: Option<String>) -> Result<Response, String> {
        let device_id = {
            let mut registry = self.registry.lock().await;
            let device_id = registry.main_device_id().map(str::to_owned);
            if let Some(id) = &device_id {
                if let Some(controller) = registry.controller_mut(Some(id)) {
                    controller.disconnect().await;
                }
            }
            registry.clear_main_device();
            device_id
        };
        self.broadcast_event("device_cleared", payload! { "device_id" => device_id }).await;
        Ok(Response::ok("clear_device", req_id))
    }

    // --- Multi-vest ---

    async fn cmd_set_main_device(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let device_id = param_str(params, "device_id").ok_or("missing device_id")?;
        self.registry.lock().await.set_main_device(&device_id).map_err(|e| e.to_string())?;
        self.broadcast_event("main_device_changed", payload! { "device_id" => device_id.clone() }).await;
        Ok(Response::ok("set_main_device", req_id))
    }

    async fn cmd_disconnect_device(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let device_id = param_str(params, "device_id").ok_or("missing device_id")?;
        self.registry.lock().await.remove_device(&device_id).await.map_err(|e| e.to_string())?;
        self.broadcast_event("device_disconnected", payload! { "device_id" => device_id.clone() }).await;
        Ok(Response::ok("disconnect_device", req_id))
    }

    async fn cmd_create_mock_device(&mut self, req_id: Option<String>) -> Result<Response, String> {
        let device_id = self.registry.lock().await.add_mock_device().map_err(|e| e.to_string())?;
        self.broadcast_event("mock_device_created", payload! { "device_id" => device_id.clone() }).await;
        Ok(Response::ok("create_mock_device", req_id).with_payload(payload! { "device_id" => device_id }))
    }

    async fn cmd_remove_mock_device(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let device_id = param_str(params, "device_id").ok_or("missing device_id")?;
        self.registry.lock().await.remove_mock_device(&device_id).await.map_err(|e| e.to_string())?;
        self.broadcast_event("mock_device_removed", payload! { "device_id" => device_id.clone() }).await;
        Ok(Response::ok("remove_mock_device", req_id))
    }

    // --- Players ---

    fn cmd_create_player(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let player_id = param_str(params, "player_id").ok_or("missing player_id")?;
        let name = param_str(params, "name");
        self.players.create_player(player_id.clone(), name);
        Ok(Response::ok("create_player", req_id).with_payload(payload! { "player_id" => player_id }))
    }

    fn cmd_assign_player(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let player_id = param_str(params, "player_id").ok_or("missing player_id")?;
        let device_id = param_str(params, "device_id").ok_or("missing device_id")?;
        self.players.assign(&player_id, device_id).map_err(|e| e.to_string())?;
        Ok(Response::ok("assign_player", req_id))
    }

    fn cmd_unassign_player(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let player_id = param_str(params, "player_id").ok_or("missing player_id")?;
        self.players.unassign(&player_id).map_err(|e| e.to_string())?;
        Ok(Response::ok("unassign_player", req_id))
    }

    fn cmd_list_players(&self, req_id: Option<String>) -> Result<Response, String> {
        let players: Vec<Value> = self
            .players
            .list()
            .into_iter()
            .map(|p| serde_json::json!({ "player_id": p.player_id, "device_id": p.device_id, "name": p.name }))
            .collect();
        Ok(Response::ok("list_players", req_id).with_payload(payload! { "players" => players }))
    }

    fn cmd_get_player_device(&self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let player_id = param_str(params, "player_id").ok_or("missing player_id")?;
        let device_id = self.players.device_for(&player_id).cloned();
        Ok(Response::ok("get_player_device", req_id).with_payload(payload! { "device_id" => device_id }))
    }

    // --- Game map ---

    fn cmd_set_game_player_mapping(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let game_id = param_str(params, "game_id").ok_or("missing game_id")?;
        let player_num = param_u64(params, "player_num").ok_or("missing player_num")? as u32;
        let device_id = param_str(params, "device_id").ok_or("missing device_id")?;
        self.game_map.set(game_id, player_num, device_id);
        Ok(Response::ok("set_game_player_mapping", req_id))
    }

    fn cmd_clear_game_player_mapping(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let game_id = param_str(params, "game_id").ok_or("missing game_id")?;
        let player_num = param_u64(params, "player_num").map(|v| v as u32);
        self.game_map.clear(&game_id, player_num);
        Ok(Response::ok("clear_game_player_mapping", req_id))
    }

    fn cmd_list_game_player_mappings(&self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let game_id = param_str(params, "game_id").ok_or("missing game_id")?;
        let mappings: Vec<Value> = self
            .game_map
            .list_for_game(&game_id)
            .into_iter()
            .map(|(num, device_id)| serde_json::json!({ "player_num": num, "device_id": device_id }))
            .collect();
        Ok(Response::ok("list_game_player_mappings", req_id).with_payload(payload! { "mappings" => mappings }))
    }

    // --- Vest control ---

    async fn cmd_connect(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let request = self.resolve_request(params);
        let device_id = {
            let registry = self.registry.lock().await;
            resolve(&request, &registry, &self.players, &self.game_map)
        }
        .ok_or("no device to connect to")?;

        let status = {
            let mut registry = self.registry.lock().await;
            match registry.controller_mut(Some(&device_id)) {
                Some(controller) => controller.connect_to_device(&DeviceSelector::First).await,
                None => return Err(format!("unknown device {device_id}")),
            }
        };

        self.broadcast_event("connected", payload! { "device_id" => device_id.clone() }).await;
        Ok(Response::ok("connect", req_id).with_payload(payload! { "connected" => status.connected }))
    }

    async fn cmd_disconnect(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let request = self.resolve_request(params);
        let device_id = {
            let registry = self.registry.lock().await;
            resolve(&request, &registry, &self.players, &self.game_map)
        };
        if let Some(device_id) = &device_id {
            let mut registry = self.registry.lock().await;
            if let Some(controller) = registry.controller_mut(Some(device_id)) {
                controller.disconnect().await;
            }
        }
        self.broadcast_event("disconnected", payload! { "device_id" => device_id.clone() }).await;
        Ok(Response::ok("disconnect", req_id))
    }

    async fn cmd_trigger(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let raw_cell = param_u8(params, "cell").ok_or("missing cell")?;
        let raw_speed = param_u8(params, "speed").ok_or("missing speed")?;
        // Out-of-range cell/speed are a caller error, not a silent clamp.
        let cell = Cell::new(raw_cell).map_err(|e| e.to_string())?;
        let speed = Speed::new(raw_speed).map_err(|e| e.to_string())?;

        let request = self.resolve_request(params);
        let device_id = {
            let registry = self.registry.lock().await;
            resolve(&request, &registry, &self.players, &self.game_map)
        }
        .ok_or("no device resolved for trigger")?;

        let triggered = {
            let mut registry = self.registry.lock().await;
            match registry.controller_mut(Some(&device_id)) {
                Some(controller) => controller.trigger(cell, speed).await,
                None => false,
            }
        };
        if !triggered {
            return Err(format!("trigger failed on device {device_id}"));
        }

        self.broadcast_event(
            "effect_triggered",
            payload! { "cell" => cell.get(), "speed" => speed.get(), "device_id" => device_id.clone() },
        )
        .await;
        Ok(Response::ok("trigger", req_id).with_payload(payload! { "device_id" => device_id }))
    }

    async fn cmd_stop(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let device_id = param_str(params, "device_id");
        stop_effect(&self.registry, &self.clients, device_id).await;
        Ok(Response::ok("stop", req_id))
    }

    async fn cmd_status(&self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let requested = param_str(params, "device_id");
        let registry = self.registry.lock().await;
        let device_id = requested.or_else(|| registry.main_device_id().map(str::to_owned));

        match device_id {
            Some(id) if registry.contains(&id) => {
                Ok(Response::ok("status", req_id).with_payload(payload! { "device_id" => id, "connected" => true }))
            }
            Some(id) => Ok(Response::ok("status", req_id).with_payload(payload! { "device_id" => id, "connected" => false })),
            None => Ok(Response::ok("status", req_id).with_payload(payload! { "connected" => false })),
        }
    }

    // --- Effects ---

    fn cmd_play_effect(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let name = param_str(params, "name").ok_or("missing name")?;
        let effect = find_effect(&self.effects, &name).ok_or_else(|| format!("unknown effect {name}"))?;
        let device_id = param_str(params, "device_id");
        play_effect(effect, device_id, self.registry.clone(), self.clients.clone());
        Ok(Response::ok("play_effect", req_id))
    }

    fn cmd_list_effects(&self, req_id: Option<String>) -> Result<Response, String> {
        let effects: Vec<Value> = self
            .effects
            .iter()
            .map(|e| serde_json::json!({ "name": e.name, "display_name": e.display_name, "category": e.category }))
            .collect();
        Ok(Response::ok("list_effects", req_id).with_payload(payload! { "effects" => effects }))
    }

    fn cmd_stop_effect(&mut self, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        let device_id = param_str(params, "device_id");
        let registry = self.registry.clone();
        let clients = self.clients.clone();
        tokio::spawn(async move {
            stop_effect(&registry, &clients, device_id).await;
        });
        Ok(Response::ok("stop_effect", req_id))
    }

    // --- Integrations ---

    async fn dispatch_integration(&mut self, cmd: &str, params: &Map<String, Value>, req_id: Option<String>) -> Result<Response, String> {
        for suffix in ["_start", "_stop", "_status", "_event"] {
            if let Some(game_id) = cmd.strip_suffix(suffix) {
                let game_id = game_id.to_owned();
                return self.dispatch_integration_action(&game_id, suffix, params, req_id).await;
            }
        }
        Err(format!("unknown command {cmd}"))
    }

    async fn dispatch_integration_action(
        &mut self,
        game_id: &str,
        suffix: &str,
        params: &Map<String, Value>,
        req_id: Option<String>,
    ) -> Result<Response, String> {
        if suffix == "_event" {
            // TCP sub-protocol style: the command itself is the event, no
            // background worker involved, so it is broadcast synchronously.
            self.broadcast_event(&format!("{game_id}_game_event"), params.clone()).await;
            return Ok(Response::ok(&format!("{game_id}_event"), req_id));
        }

        let manager = self
            .integrations
            .get_mut(game_id)
            .ok_or_else(|| format!("unknown integration {game_id}"))?;

        match suffix {
            "_start" => {
                let result = manager.start(params.clone()).await;
                match result {
                    Ok(()) => {
                        self.broadcast_event(&format!("{game_id}_started"), params.clone()).await;
                        Ok(Response::ok(&format!("{game_id}_start"), req_id).with_payload(payload! { "success" => true }))
                    }
                    Err(e) => Ok(Response::ok(&format!("{game_id}_start"), req_id)
                        .with_payload(payload! { "success" => false, "message" => e.to_string() })),
                }
            }
            "_stop" => {
                manager.stop().await;
                self.broadcast_event(&format!("{game_id}_stopped"), Map::new()).await;
                Ok(Response::ok(&format!("{game_id}_stop"), req_id))
            }
            "_status" => {
                let status = manager.status();
                Ok(Response::ok(&format!("{game_id}_status"), req_id).with_payload(payload! {
                    "enabled" => status.enabled,
                    "running" => status.running,
                    "events_received" => status.events_received,
                }))
            }
            _ => unreachable!("suffix filtered to _start/_stop/_status/_event above"),
        }
    }

    fn resolve_request(&self, params: &Map<String, Value>) -> ResolveRequest {
        ResolveRequest {
            device_id: param_str(params, "device_id"),
            game_id: param_str(params, "game_id"),
            player_num: param_u64(params, "player_num").map(|v| v as u32),
            player_id: param_str(params, "player_id"),
        }
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}
