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

//! The set of live TCP connections. Each has a unique short id and optional
//! identity; `broadcast` fans a wire message out to everyone's writer queue.

use std::collections::HashMap;

use log::debug;
use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;

pub type ClientId = String;

pub struct Client {
    pub id: ClientId,
    pub name: Option<String>,
    pub version: Option<String>,
    sender: UnboundedSender<String>,
}

fn generate_client_id() -> ClientId {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Owned exclusively by the broker loop, so no mutex is needed here: every
/// mutation happens from the single task that also drives the listener.
#[derive(Default)]
pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection's outbound line sender and
    /// returns its assigned id. Emitting `client_connected` is the caller's
    /// responsibility, kept here only as a doc note so membership and the
    /// event stay consistent for every observer.
    pub fn add(&mut self, sender: UnboundedSender<String>) -> ClientId {
        let id = generate_client_id();
        self.clients.insert(
            id.clone(),
            Client { id: id.clone(), name: None, version: None, sender },
        );
        id
    }

    pub fn remove(&mut self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    pub fn set_identity(&mut self, client_id: &str, name: Option<String>, version: Option<String>) {
        if let Some(client) = self.clients.get_mut(client_id) {
            client.name = name;
            client.version = version;
        }
    }

    pub fn send_to(&self, client_id: &str, line: String) {
        if let Some(client) = self.clients.get(client_id) {
            let _ = client.sender.send(line);
        }
    }

    /// Sends `line` to every connected client. Iterates a snapshot of ids so
    /// a send failure never mutates the map mid-scan; failed sends are
    /// swallowed since the reader loop will detect and remove that client.
    pub fn broadcast(&self, line: &str) {
        for client in self.clients.values() {
            if client.sender.send(line.to_owned()).is_err() {
                debug!("broadcast: client {} unreachable, awaiting its own disconnect", client.id);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn add_assigns_unique_ids() {
        let mut cm = ClientManager::new();
        let (tx1, _rx1) = unbounded_channel();
        let (tx2, _rx2) = unbounded_channel();
        let a = cm.add(tx1);
        let b = cm.add(tx2);
        assert_ne!(a, b);
        assert_eq!(cm.count(), 2);
    }

    #[test]
    fn remove_drops_client() {
        let mut cm = ClientManager::new();
        let (tx, _rx) = unbounded_channel();
        let id = cm.add(tx);
        assert!(cm.remove(&id));
        assert_eq!(cm.count(), 0);
    }

    #[test]
    fn broadcast_reaches_all_live_receivers() {
        let mut cm = ClientManager::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        cm.add(tx1);
        cm.add(tx2);
        cm.broadcast("hello");
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
    }

    #[test]
    fn broadcast_tolerates_a_dropped_receiver() {
        let mut cm = ClientManager::new();
        let (tx1, rx1) = unbounded_channel();
        drop(rx1);
        cm.add(tx1);
        cm.broadcast("hello"); // must not panic
    }
}
