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

//! Line-delimited JSON wire protocol: one command in, one response out, plus
//! asynchronous broadcast events. Optional fields are dropped from the
//! serialized object when absent, matching the original's `to_dict()`
//! convention of never emitting `null` for unset fields.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::definitions::DeviceDescriptor;

/// Maximum accepted line length in bytes; longer lines close the connection
/// with no response.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// An inbound command, parsed from one line of JSON. Unknown fields are
/// ignored; `params` holds whatever command-specific fields the `cmd` tag
/// expects, read out downstream via `serde_json::from_value`.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub cmd: String,
    pub req_id: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// An outbound response. `response` mirrors the command tag ("ok" for a
/// generic acknowledgement, "error" on failure); `payload` is merged in as
/// top-level fields when serialized.
#[derive(Debug, Clone)]
pub struct Response {
    pub response: String,
    pub req_id: Option<String>,
    pub ok: Option<bool>,
    pub message: Option<String>,
    pub payload: Map<String, Value>,
}

impl Response {
    pub fn ok(tag: &str, req_id: Option<String>) -> Self {
        Self {
            response: tag.to_owned(),
            req_id,
            ok: Some(true),
            message: None,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn error(req_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            response: "error".to_owned(),
            req_id,
            ok: Some(false),
            message: Some(message.into()),
            payload: Map::new(),
        }
    }

    /// Renders the response as a single JSON line, dropping absent optional
    /// fields instead of emitting `null`.
    pub fn to_line(&self) -> String {
        let mut object = Map::new();
        object.insert("response".into(), Value::String(self.response.clone()));
        if let Some(req_id) = &self.req_id {
            object.insert("req_id".into(), Value::String(req_id.clone()));
        }
        if let Some(ok) = self.ok {
            object.insert("ok".into(), Value::Bool(ok));
        }
        if let Some(message) = &self.message {
            object.insert("message".into(), Value::String(message.clone()));
        }
        for (k, v) in &self.payload {
            object.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(object).to_string()
    }
}

/// A broadcast event. `ts` is stamped at construction time so tests can
/// assert monotonicity within a single connection's received stream.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event: String,
    pub ts: f64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(tag: &str, payload: Map<String, Value>) -> Self {
        Self {
            event: tag.to_owned(),
            ts: now_unix_seconds(),
            payload,
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Event always serializes")
    }
}

fn now_unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Wire-form device descriptor, matching §6's hex-string vendor/product ids.
#[derive(Debug, Clone, Serialize)]
pub struct WireDeviceDescriptor {
    pub device_id: String,
    pub vendor_id: String,
    pub product_id: String,
    pub bus: u8,
    pub address: u8,
    pub serial_number: Option<String>,
    pub is_mock: Option<bool>,
    pub is_main: Option<bool>,
}

impl WireDeviceDescriptor {
    pub fn from_descriptor(device_id: String, d: &DeviceDescriptor, is_main: bool) -> Self {
        Self {
            device_id,
            vendor_id: format!("0x{:04x}", d.vendor_id),
            product_id: format!("0x{:04x}", d.product_id),
            bus: d.bus,
            address: d.address,
            serial_number: d.serial_number.clone(),
            is_mock: d.is_mock.then_some(true),
            is_main: Some(is_main),
        }
    }
}

/// Builds a params map from alternating key/value pairs for tests and
/// small handlers that don't need serde's full derive machinery.
#[macro_export]
macro_rules! payload {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = serde_json::Map::new();
        $(map.insert($key.to_string(), serde_json::json!($value));)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_omits_absent_optional_fields() {
        let response = Response::ok("ok", None);
        let line = response.to_line();
        assert!(!line.contains("req_id"));
        assert!(!line.contains("message"));
    }

    #[test]
    fn response_echoes_req_id_when_present() {
        let response = Response::ok("ok", Some("r1".to_owned()));
        assert!(response.to_line().contains("\"req_id\":\"r1\""));
    }

    #[test]
    fn command_parses_flattened_params() {
        let line = r#"{"cmd":"trigger","cell":2,"speed":5}"#;
        let command: Command = serde_json::from_str(line).unwrap();
        assert_eq!(command.cmd, "trigger");
        assert_eq!(command.params.get("cell").unwrap(), 2);
    }

    #[test]
    fn event_carries_a_timestamp() {
        let event = Event::new("device_selected", Map::new());
        assert!(event.ts > 0.0);
    }
}
