mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use kiosklink::config::TRANSPORT_ENV;
use kiosklink::KioskConfig;

use crate::cmd::Command;
use crate::exit::{config_error, CliResult};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "kiosklink", version, about = "Kiosk device protocol client")]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, short = 'c', value_name = "PATH", env = "KIOSKLINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Device host, overriding `server.host`.
    #[arg(long, value_name = "HOST", global = true)]
    host: Option<String>,

    /// Device control port, overriding `server.port`.
    #[arg(long, value_name = "PORT", global = true)]
    port: Option<u16>,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn kiosk_config(&self) -> CliResult<KioskConfig> {
        let mut config = match &self.config {
            Some(path) => KioskConfig::load(path).map_err(config_error)?,
            None => {
                let mut config = KioskConfig::default();
                config.normalize(std::env::var(TRANSPORT_ENV).ok().as_deref());
                config
            }
        };
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cli
        .kiosk_config()
        .and_then(|config| cmd::run(cli.command, config, format));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
