use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Command parameters and response data: string keys, JSON values.
pub type Params = serde_json::Map<String, Value>;

/// Message a timed-out command settles with.
pub const TIMEOUT_MESSAGE: &str = "Timeout";

/// Message commands still pending on a lost connection settle with.
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost";

/// Log lines requested by `SHOW_LOGS` when none are given.
pub const DEFAULT_LOG_LINES: u32 = 50;

const ID_PREFIX: &str = "cmd_";

/// Correlation id minted per outgoing command.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Mint a fresh id: `cmd_` followed by 128 random bits in lowercase hex.
    pub fn generate() -> Self {
        Self(format!("{ID_PREFIX}{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CommandId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for CommandId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command the remote device understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Capture a still image and analyse it.
    Capture,
    /// Join a Wi-Fi network.
    WifiConnect { ssid: String, password: String },
    /// Restart the device-side service.
    RestartService,
    /// Return the last `lines` lines of the device log.
    ShowLogs { lines: u32 },
    /// Any other named command. Its parameters stay on the pending entry;
    /// only `NAME:id` is put on the wire.
    Other { name: String, params: Params },
}

impl Command {
    /// Build a command from a name and parameter mapping.
    ///
    /// Known names with usable parameters map onto their typed variants;
    /// everything else becomes [`Command::Other`].
    pub fn new(name: &str, params: Params) -> Self {
        match name {
            "CAPTURE" => Command::Capture,
            "RESTART_SERVICE" => Command::RestartService,
            "SHOW_LOGS" => Command::ShowLogs {
                lines: params
                    .get("lines")
                    .and_then(Value::as_u64)
                    .and_then(|lines| u32::try_from(lines).ok())
                    .unwrap_or(DEFAULT_LOG_LINES),
            },
            "WIFI_CONNECT" => match (
                params.get("ssid").and_then(Value::as_str),
                params.get("password").and_then(Value::as_str),
            ) {
                (Some(ssid), Some(password)) => Command::WifiConnect {
                    ssid: ssid.to_string(),
                    password: password.to_string(),
                },
                _ => Command::Other {
                    name: name.to_string(),
                    params,
                },
            },
            _ => Command::Other {
                name: name.to_string(),
                params,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Capture => "CAPTURE",
            Command::WifiConnect { .. } => "WIFI_CONNECT",
            Command::RestartService => "RESTART_SERVICE",
            Command::ShowLogs { .. } => "SHOW_LOGS",
            Command::Other { name, .. } => name,
        }
    }

    pub fn params(&self) -> Params {
        let mut params = Params::new();
        match self {
            Command::WifiConnect { ssid, password } => {
                params.insert("ssid".to_string(), Value::from(ssid.as_str()));
                params.insert("password".to_string(), Value::from(password.as_str()));
            }
            Command::ShowLogs { lines } => {
                params.insert("lines".to_string(), Value::from(*lines));
            }
            Command::Other { params: extra, .. } => params.clone_from(extra),
            Command::Capture | Command::RestartService => {}
        }
        params
    }

    /// The colon-delimited wire text for this command, without delimiter.
    pub fn wire(&self, id: &CommandId) -> String {
        match self {
            Command::WifiConnect { ssid, password } => {
                format!("WIFI_CONNECT:{id}:{ssid}:{password}")
            }
            Command::ShowLogs { lines } => format!("SHOW_LOGS:{id}:{lines}"),
            other => format!("{}:{id}", other.name()),
        }
    }
}

/// Registration telling the device where to push datagram video.
pub fn registration_message(port: u16) -> String {
    format!("REGISTER_UDP:{port}")
}

/// How a command settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub data: Params,
}

impl CommandResult {
    pub fn new(success: bool, message: impl Into<String>, data: Params) -> Self {
        Self {
            success,
            message: message.into(),
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(false, message, Params::new())
    }

    pub fn timeout() -> Self {
        Self::failure(TIMEOUT_MESSAGE)
    }

    pub fn send_error(detail: impl fmt::Display) -> Self {
        Self::failure(format!("send error: {detail}"))
    }

    pub fn is_timeout(&self) -> bool {
        !self.success && self.message == TIMEOUT_MESSAGE
    }
}
