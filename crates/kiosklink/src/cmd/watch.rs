use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use kiosklink::control::DeviceEvent;
use kiosklink::frame::Frame;
use kiosklink::{Client, KioskConfig, TransportKind};
use tracing::{debug, info};

use crate::cmd::{parse_duration, WatchArgs};
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, print_frame, OutputFormat};

/// Frames buffered between the video worker and stdout before new ones are
/// skipped.
const FRAME_BACKLOG: usize = 32;
const POLL: Duration = Duration::from_millis(200);

pub fn run(args: WatchArgs, mut config: KioskConfig, format: OutputFormat) -> CliResult<i32> {
    if let Some(transport) = args.transport {
        config.video.transport = TransportKind::from(transport).as_str().to_string();
    }
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;

    let client = Client::new(config.client_config())
        .map_err(|err| client_error("client setup failed", err))?;

    let (frames_tx, frames) = bounded::<Frame>(FRAME_BACKLOG);
    client.set_frame_handler(Arc::new(move |frame: Frame| {
        if frames_tx.try_send(frame).is_err() {
            debug!("output is behind; frame skipped");
        }
    }));
    client.set_event_handler(Arc::new(move |event: DeviceEvent| {
        print_event(&event, format);
    }));

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    client
        .start()
        .map_err(|err| client_error("client start failed", err))?;
    let transport = config.transport().as_str();

    let started = Instant::now();
    let mut printed: u64 = 0;
    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        match frames.recv_timeout(POLL) {
            Ok(frame) => {
                printed = printed.saturating_add(1);
                print_frame(&frame, printed, transport, format);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    client.stop();
    info!(frames = printed, "watch finished");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
