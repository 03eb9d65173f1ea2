use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use kiosklink::control::{Command as DeviceCommand, DEFAULT_LOG_LINES};
use kiosklink::{KioskConfig, TransportKind};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod config;
pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the device and print received video frames and events.
    Watch(WatchArgs),
    /// Send one command and wait for its result.
    Send(SendArgs),
    /// Print the effective configuration.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, config: KioskConfig, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Watch(args) => watch::run(args, config, format),
        Command::Send(args) => send::run(args, config, format),
        Command::Config(args) => config::run(args, config, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum TransportArg {
    Udp,
    Tcp,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Udp => TransportKind::Udp,
            TransportArg::Tcp => TransportKind::Tcp,
        }
    }
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Video transport, overriding the configuration.
    #[arg(long, value_name = "TRANSPORT")]
    pub transport: Option<TransportArg>,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<u64>,
    /// Exit after this long (e.g. 30s, 1500ms).
    #[arg(long, value_name = "DURATION")]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(subcommand)]
    pub command: CommandArgs,
    /// Time allowed for the device to answer (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Time allowed to reach the device before giving up.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Subcommand, Debug)]
pub enum CommandArgs {
    /// Capture a still image and analyse it.
    Capture,
    /// Restart the device-side service.
    Restart,
    /// Fetch the tail of the device log.
    Logs {
        #[arg(long, default_value_t = DEFAULT_LOG_LINES)]
        lines: u32,
    },
    /// Join a Wi-Fi network.
    Wifi {
        #[arg(long)]
        ssid: String,
        #[arg(long, env = "KIOSKLINK_WIFI_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

impl CommandArgs {
    pub fn into_command(self) -> DeviceCommand {
        match self {
            CommandArgs::Capture => DeviceCommand::Capture,
            CommandArgs::Restart => DeviceCommand::RestartService,
            CommandArgs::Logs { lines } => DeviceCommand::ShowLogs { lines },
            CommandArgs::Wifi { ssid, password } => DeviceCommand::WifiConnect { ssid, password },
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `150ms`, `5s`, `2m`, or bare seconds. Zero is rejected.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit_ms): (&str, u64) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, 60_000)
    } else {
        (input, 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(Duration::from_millis(value.saturating_mul(unit_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(" 7 ").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn rejects_bad_durations() {
        for input in ["", "0s", "abc", "-1s", "1h"] {
            let err = parse_duration(input).unwrap_err();
            assert_eq!(err.code, USAGE, "{input:?} should be a usage error");
        }
    }

    #[test]
    fn maps_cli_commands_to_device_commands() {
        assert_eq!(CommandArgs::Capture.into_command(), DeviceCommand::Capture);
        assert_eq!(
            CommandArgs::Logs { lines: 20 }.into_command(),
            DeviceCommand::ShowLogs { lines: 20 }
        );
        assert_eq!(
            CommandArgs::Wifi {
                ssid: "kiosk".to_string(),
                password: "hunter2".to_string(),
            }
            .into_command()
            .name(),
            "WIFI_CONNECT"
        );
    }
}
