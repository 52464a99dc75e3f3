//! Command envelope (window messaging and port frames).
//!
//! Every frame is `{ "sentinel": "__ACTIVITIES__", "cmd": <string>, "payload": <value|null> }`.
//! Payloads stay as `serde_json::Value` so the opaque activity arguments and
//! custom messages are never re-shaped; the typed helpers below cover the
//! protocol's own commands.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ActivityError, Result};
use crate::protocol::result::ActivityResultCode;

/// Marker distinguishing activity frames from unrelated window messages.
pub const SENTINEL: &str = "__ACTIVITIES__";

/// Protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Host -> client: listening, advertises channel support.
    Connect,
    /// Client -> host: start arguments, optionally with a transferred port.
    Start,
    /// Custom message, either direction.
    Msg,
    /// Ask the peer to open a named channel.
    Cnget,
    /// Named channel port transfer.
    Cnset,
    /// Host -> client: requested height.
    Resize,
    /// Client -> host: allowed height.
    Resized,
    /// Host -> client: ready to be interacted with.
    Ready,
    /// Host -> client: terminal result.
    Result,
    /// Client -> host: result acknowledged.
    Close,
    /// Host -> client: keepalive before unload.
    Check,
}

impl Command {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Start => "start",
            Command::Msg => "msg",
            Command::Cnget => "cnget",
            Command::Cnset => "cnset",
            Command::Resize => "resize",
            Command::Resized => "resized",
            Command::Ready => "ready",
            Command::Result => "result",
            Command::Close => "close",
            Command::Check => "check",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "connect" => Command::Connect,
            "start" => Command::Start,
            "msg" => Command::Msg,
            "cnget" => Command::Cnget,
            "cnset" => Command::Cnset,
            "resize" => Command::Resize,
            "resized" => Command::Resized,
            "ready" => Command::Ready,
            "result" => Command::Result,
            "close" => Command::Close,
            "check" => Command::Check,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded activity frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Raw command name (may be unknown to this side).
    pub cmd: String,
    /// Payload, `None` when absent or falsy on the wire.
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(cmd: Command, payload: Option<Value>) -> Self {
        Self {
            cmd: cmd.as_str().to_string(),
            payload: payload.and_then(truthy),
        }
    }

    /// Decode a window message. Returns `None` for anything that is not an
    /// activity frame (missing or foreign sentinel, no command).
    pub fn from_value(data: &Value) -> Option<Self> {
        let obj = data.as_object()?;
        if obj.get("sentinel").and_then(Value::as_str) != Some(SENTINEL) {
            return None;
        }
        Self::from_port_value(data)
    }

    /// Decode a port message. Ports are already private to the peer, so the
    /// sentinel is not required; a non-empty `cmd` is.
    pub fn from_port_value(data: &Value) -> Option<Self> {
        let obj = data.as_object()?;
        let cmd = obj.get("cmd").and_then(Value::as_str)?;
        if cmd.is_empty() {
            return None;
        }
        let payload = obj.get("payload").cloned().and_then(truthy);
        Some(Self {
            cmd: cmd.to_string(),
            payload,
        })
    }

    /// Known command, if any.
    pub fn command(&self) -> Option<Command> {
        Command::parse(&self.cmd)
    }

    /// Encode to the wire value.
    pub fn to_value(&self) -> Value {
        json!({
            "sentinel": SENTINEL,
            "cmd": self.cmd,
            "payload": self.payload.clone().unwrap_or(Value::Null),
        })
    }

    /// Decode the payload into a typed protocol payload.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let v = self.payload.clone().unwrap_or(Value::Null);
        serde_json::from_value(v)
            .map_err(|e| ActivityError::BadEnvelope(format!("{} payload: {e}", self.cmd)))
    }
}

// Wire payloads use JavaScript truthiness: `0`, `""`, `false` and `null` all
// travel as "no payload".
fn truthy(v: Value) -> Option<Value> {
    match &v {
        Value::Null => None,
        Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        _ => Some(v),
    }
}

/// `connect` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectPayload {
    #[serde(rename = "acceptsChannel", default)]
    pub accepts_channel: bool,
}

/// `cnget` / `cnset` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelPayload {
    #[serde(default)]
    pub name: String,
}

/// `resize` / `resized` payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeightPayload {
    pub height: u32,
}

/// `result` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub code: ActivityResultCode,
    #[serde(default)]
    pub data: Value,
}

/// Serialize a typed payload for `Envelope::new`.
pub fn to_payload<T: Serialize>(p: &T) -> Result<Value> {
    serde_json::to_value(p).map_err(|e| ActivityError::Internal(format!("payload encode failed: {e}")))
}
