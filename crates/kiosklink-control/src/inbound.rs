use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::command::{CommandResult, Params};

/// Confidence reported when a legacy result line carries none.
const NO_CONFIDENCE: &str = "0%";

/// One parsed line from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response correlated to a command previously sent.
    Response {
        command_id: String,
        result: CommandResult,
    },
    /// Anything the device pushes on its own.
    Event(DeviceEvent),
}

/// Unsolicited device output, forwarded to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A classification result.
    Analysis { label: String, confidence: String },
    /// Any other structured message, keyed by its `type` field.
    Message { kind: String, body: Value },
}

/// Classify one received line.
///
/// Lines that look like JSON objects are decoded as such; anything else, or
/// text that is not valid JSON, is read as a legacy `LABEL:CONFIDENCE`
/// result. Fields of a valid JSON object are read leniently: a field of an
/// unexpected type never turns a response into an event.
pub fn parse_inbound(line: &str) -> Inbound {
    let text = line.trim();
    if text.starts_with('{') {
        match decode_json(text) {
            Ok(inbound) => return inbound,
            Err(err) => debug!(error = %err, "line is not a JSON message; reading as legacy text"),
        }
    }
    Inbound::Event(parse_legacy(text))
}

fn decode_json(text: &str) -> serde_json::Result<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Ok(Inbound::Event(DeviceEvent::Message {
                kind: "unknown".to_string(),
                body: other,
            }))
        }
    };

    if let Some(command_id) = fields.get("command_id").and_then(id_text) {
        return Ok(Inbound::Response {
            command_id,
            result: CommandResult::new(
                fields.get("success").is_some_and(truthy),
                fields.get("message").map(text_of).unwrap_or_default(),
                into_params(fields.get("data").cloned()),
            ),
        });
    }

    if let Some(label) = fields.get("label").filter(|label| !label.is_null()) {
        return Ok(Inbound::Event(DeviceEvent::Analysis {
            label: text_of(label),
            confidence: fields
                .get("confidence")
                .filter(|confidence| !confidence.is_null())
                .map(text_of)
                .unwrap_or_else(|| NO_CONFIDENCE.to_string()),
        }));
    }

    Ok(Inbound::Event(DeviceEvent::Message {
        kind: kind_of(&fields),
        body: Value::Object(fields),
    }))
}

/// A correlation id given as a string or a number.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// `true`, `"true"`, `"ok"`, `"yes"`, or a non-zero number.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => {
            let text = text.trim();
            ["true", "ok", "yes", "1"]
                .iter()
                .any(|word| text.eq_ignore_ascii_case(word))
        }
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn kind_of(fields: &Map<String, Value>) -> String {
    match fields.get("type") {
        None | Some(Value::Null) => "unknown".to_string(),
        Some(kind) => text_of(kind),
    }
}

fn parse_legacy(text: &str) -> DeviceEvent {
    let mut parts = text.split(':');
    let label = parts.next().unwrap_or_default().to_string();
    let confidence = parts
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| NO_CONFIDENCE.to_string());
    DeviceEvent::Analysis { label, confidence }
}

fn into_params(data: Option<Value>) -> Params {
    match data {
        None | Some(Value::Null) => Params::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut params = Params::new();
            params.insert("value".to_string(), other);
            params
        }
    }
}

/// Strings as-is, `null` as empty, anything else as compact JSON.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
