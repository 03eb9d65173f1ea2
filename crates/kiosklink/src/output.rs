use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use kiosklink::control::{CommandResult, DeviceEvent};
use kiosklink::frame::Frame;
use serde::Serialize;

/// Leading bytes of a JPEG image.
const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    /// Frame bytes straight to stdout; text output elsewhere.
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    sequence: u64,
    transport: &'a str,
    size: usize,
    kind: &'static str,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, sequence: u64, transport: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                sequence,
                transport,
                size: frame.len(),
                kind: frame_kind(frame),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "TRANSPORT", "SIZE", "KIND"])
                .add_row(vec![
                    sequence.to_string(),
                    transport.to_string(),
                    frame.len().to_string(),
                    frame_kind(frame).to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "frame #{sequence} transport={transport} size={} kind={}",
                frame.len(),
                frame_kind(frame)
            );
        }
        OutputFormat::Raw => print_raw(frame.bytes.as_ref()),
    }
}

pub fn print_event(event: &DeviceEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => {
            let (kind, detail) = event_summary(event);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "DETAIL"])
                .add_row(vec![kind, detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let (kind, detail) = event_summary(event);
            println!("event {kind}: {detail}");
        }
        // Frames own stdout in raw mode.
        OutputFormat::Raw => {}
    }
}

#[derive(Serialize)]
struct CommandOutput<'a> {
    command: &'a str,
    command_id: &'a str,
    #[serde(flatten)]
    result: &'a CommandResult,
    timestamp: String,
}

pub fn print_command_result(
    command: &str,
    command_id: &str,
    result: &CommandResult,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&CommandOutput {
            command,
            command_id,
            result,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "SUCCESS", "MESSAGE", "DATA"])
                .add_row(vec![
                    command.to_string(),
                    result.success.to_string(),
                    result.message.clone(),
                    data_preview(result),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "{command} ({command_id}): success={} message={} data={}",
                result.success,
                result.message,
                data_preview(result)
            );
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn frame_kind(frame: &Frame) -> &'static str {
    if frame.bytes.starts_with(&JPEG_MAGIC) {
        "jpeg"
    } else {
        "binary"
    }
}

fn event_summary(event: &DeviceEvent) -> (String, String) {
    match event {
        DeviceEvent::Analysis { label, confidence } => {
            ("analysis".to_string(), format!("{label} ({confidence})"))
        }
        DeviceEvent::Message { kind, body } => (kind.clone(), body.to_string()),
    }
}

fn data_preview(result: &CommandResult) -> String {
    if result.data.is_empty() {
        String::new()
    } else {
        serde_json::Value::Object(result.data.clone()).to_string()
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use kiosklink::control::Params;

    use super::*;

    #[test]
    fn classifies_jpeg_frames() {
        assert_eq!(frame_kind(&Frame::new(vec![0xFF, 0xD8, 0xFF, 0xE0])), "jpeg");
        assert_eq!(frame_kind(&Frame::new(&b"\x00\x01"[..])), "binary");
    }

    #[test]
    fn command_output_flattens_result() {
        let mut data = Params::new();
        data.insert("lines".to_string(), serde_json::Value::from(3));
        let result = CommandResult::new(true, "ok", data);
        let out = CommandOutput {
            command: "SHOW_LOGS",
            command_id: "cmd_0",
            result: &result,
            timestamp: "0".to_string(),
        };

        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["command"], "SHOW_LOGS");
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["lines"], 3);
    }

    #[test]
    fn summarizes_events() {
        let analysis = DeviceEvent::Analysis {
            label: "ripe".to_string(),
            confidence: "97%".to_string(),
        };
        assert_eq!(
            event_summary(&analysis),
            ("analysis".to_string(), "ripe (97%)".to_string())
        );
    }
}
