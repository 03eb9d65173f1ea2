use std::time::Duration;

use crossbeam_channel::bounded;
use kiosklink::control::{CommandCallback, CommandResult};
use kiosklink::{Client, ClientConfig, KioskConfig};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{client_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_command_result, OutputFormat};

/// Slack past the command timeout before giving up on the callback.
const SETTLE_GRACE: Duration = Duration::from_secs(1);

pub fn run(args: SendArgs, config: KioskConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;

    let mut client_config = ClientConfig::new(config.channel_config(), None);
    client_config.dispatcher.default_timeout = timeout;
    let addr = client_config.channel.addr.clone();

    let client =
        Client::new(client_config).map_err(|err| client_error("client setup failed", err))?;
    client
        .start()
        .map_err(|err| client_error("client start failed", err))?;

    if !client.wait_connected(connect_timeout) {
        client.stop();
        return Err(CliError::new(
            TIMEOUT,
            format!("device at {addr} not reachable within {}", args.connect_timeout),
        ));
    }

    let (tx, rx) = bounded(1);
    let callback: CommandCallback = Box::new(move |result: CommandResult| {
        let _ = tx.send(result);
    });
    let command = args.command.into_command();
    let name = command.name().to_string();
    let id = client.dispatcher().send_command(command, Some(callback));

    let result = rx.recv_timeout(timeout + SETTLE_GRACE);
    client.stop();
    let result = result.map_err(|_| CliError::new(INTERNAL, format!("{name} never settled")))?;

    print_command_result(&name, id.as_str(), &result, format);
    Ok(exit_code(&result))
}

fn exit_code(result: &CommandResult) -> i32 {
    if result.success {
        SUCCESS
    } else if result.is_timeout() {
        TIMEOUT
    } else {
        FAILURE
    }
}
