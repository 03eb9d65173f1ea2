use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kiosklink_frame::encode_line;
use kiosklink_transport::panic_message;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::channel::ControlChannel;
use crate::command::{
    registration_message, Command, CommandId, CommandResult, Params, CONNECTION_LOST_MESSAGE,
};
use crate::error::{ControlError, Result};
use crate::inbound::{parse_inbound, DeviceEvent, Inbound};
use crate::timeout::TimeoutWheel;

/// Where encoded command lines are written.
pub trait CommandSink: Send + Sync {
    /// Write one complete message, returning the generation of the connection
    /// it went out on.
    fn send_message(&self, message: &[u8]) -> Result<u64>;
}

impl CommandSink for ControlChannel {
    fn send_message(&self, message: &[u8]) -> Result<u64> {
        self.send_tracked(message)
    }
}

/// Invoked exactly once with the command's outcome.
pub type CommandCallback = Box<dyn FnOnce(CommandResult) + Send + 'static>;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Timeout applied by [`CommandDispatcher::send_command`]. Default: 30s.
    pub default_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

struct PendingCommand {
    id: CommandId,
    name: String,
    /// Parameters the command was issued with, wire form or not.
    payload: Params,
    issued_at: Instant,
    timeout: Duration,
    /// Connection the command was written to; `None` while the write is in flight.
    generation: Option<u64>,
    callback: Option<CommandCallback>,
}

type PendingTable = Arc<Mutex<HashMap<CommandId, PendingCommand>>>;

/// Correlates outgoing commands with their responses.
///
/// Every command sent is tracked until it settles, which happens exactly
/// once: a matching response, its timeout, an immediate send failure, or
/// abandonment when its connection is lost. Callbacks run outside the table
/// lock, on whichever thread settled the command, except that timeouts are
/// delivered on a short-lived thread of their own so that no callback can
/// hold up another command's deadline. A panicking callback is logged and
/// contained.
pub struct CommandDispatcher {
    sink: Arc<dyn CommandSink>,
    pending: PendingTable,
    /// Newest connection generation abandoned so far. Read and written only
    /// while the pending table is locked.
    lost_through: Mutex<Option<u64>>,
    timeouts: TimeoutWheel,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(sink: Arc<dyn CommandSink>) -> Result<Self> {
        Self::with_config(sink, DispatcherConfig::default())
    }

    pub fn with_config(sink: Arc<dyn CommandSink>, config: DispatcherConfig) -> Result<Self> {
        let pending: PendingTable = Arc::default();
        let table = Arc::downgrade(&pending);
        let timeouts = TimeoutWheel::spawn(move |id| {
            if let Some(table) = table.upgrade() {
                expire(&table, &id);
            }
        })
        .map_err(ControlError::Worker)?;

        Ok(Self {
            sink,
            pending,
            lost_through: Mutex::new(None),
            timeouts,
            config,
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Send `command` with the default timeout.
    pub fn send_command(&self, command: Command, callback: Option<CommandCallback>) -> CommandId {
        self.send_command_with_timeout(command, callback, self.config.default_timeout)
    }

    /// Send `command`, settling `callback` within `timeout` at the latest.
    ///
    /// Commands sent without a callback are still tracked and purged at their
    /// timeout. If the write fails, the callback runs before this returns.
    pub fn send_command_with_timeout(
        &self,
        command: Command,
        callback: Option<CommandCallback>,
        timeout: Duration,
    ) -> CommandId {
        let id = CommandId::generate();
        let name = command.name().to_string();
        let payload = command.params();
        let params = param_names(&payload);
        let line = encode_line(&command.wire(&id));

        self.pending.lock().insert(
            id.clone(),
            PendingCommand {
                id: id.clone(),
                name: name.clone(),
                payload,
                issued_at: Instant::now(),
                timeout,
                generation: None,
                callback,
            },
        );
        self.timeouts.arm(id.clone(), timeout);

        match self.sink.send_message(&line) {
            Ok(generation) => {
                // The connection may have been abandoned while the write was
                // in flight; such a command settles as lost right away.
                let lost = {
                    let mut pending = self.pending.lock();
                    if self.lost_through.lock().is_some_and(|lost| generation <= lost) {
                        pending.remove(&id)
                    } else {
                        if let Some(entry) = pending.get_mut(&id) {
                            entry.generation = Some(generation);
                        }
                        None
                    }
                };
                if let Some(entry) = lost {
                    warn!(
                        command = %name,
                        command_id = %id,
                        generation,
                        "command written to a lost connection"
                    );
                    self.timeouts.cancel(&id);
                    deliver(entry, CommandResult::failure(CONNECTION_LOST_MESSAGE));
                    return id;
                }
                info!(
                    command = %name,
                    command_id = %id,
                    params = %params,
                    timeout_ms = timeout.as_millis() as u64,
                    "command sent"
                );
            }
            Err(err) => {
                warn!(command = %name, command_id = %id, error = %err, "command send failed");
                self.timeouts.cancel(&id);
                let entry = self.pending.lock().remove(&id);
                if let Some(entry) = entry {
                    deliver(entry, CommandResult::send_error(&err));
                }
            }
        }

        id
    }

    /// Send a named command with a parameter mapping.
    ///
    /// Names the device knows are encoded in their wire form; any other name
    /// goes out as `NAME:id` with its parameters kept on the pending entry.
    pub fn send_named(
        &self,
        name: &str,
        params: Params,
        callback: Option<CommandCallback>,
        timeout: Option<Duration>,
    ) -> CommandId {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        self.send_command_with_timeout(Command::new(name, params), callback, timeout)
    }

    pub fn send_capture(&self, callback: Option<CommandCallback>) -> CommandId {
        self.send_command(Command::Capture, callback)
    }

    pub fn send_wifi_connect(
        &self,
        ssid: &str,
        password: &str,
        callback: Option<CommandCallback>,
    ) -> CommandId {
        self.send_command(
            Command::WifiConnect {
                ssid: ssid.to_string(),
                password: password.to_string(),
            },
            callback,
        )
    }

    pub fn send_restart_service(&self, callback: Option<CommandCallback>) -> CommandId {
        self.send_command(Command::RestartService, callback)
    }

    pub fn send_show_logs(&self, lines: u32, callback: Option<CommandCallback>) -> CommandId {
        self.send_command(Command::ShowLogs { lines }, callback)
    }

    /// Settle the command `command_id` with a response.
    ///
    /// Returns `false` if no such command is pending (unknown, already
    /// timed out, or already answered); such responses are dropped.
    pub fn on_response(&self, command_id: &str, result: CommandResult) -> bool {
        let entry = self.pending.lock().remove(command_id);
        let Some(entry) = entry else {
            warn!(command_id, "response for unknown or settled command dropped");
            return false;
        };

        self.timeouts.cancel(&entry.id);
        info!(
            command = %entry.name,
            command_id,
            params = %param_names(&entry.payload),
            success = result.success,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "command settled by response"
        );
        deliver(entry, result);
        true
    }

    /// Route one received control line.
    ///
    /// Responses settle their command; anything else is returned for the host.
    pub fn handle_line(&self, line: &str) -> Option<DeviceEvent> {
        match parse_inbound(line) {
            Inbound::Response { command_id, result } => {
                self.on_response(&command_id, result);
                None
            }
            Inbound::Event(event) => Some(event),
        }
    }

    /// Tell the device which local port receives datagram video.
    ///
    /// Fire-and-forget: no correlation id, no pending entry.
    pub fn register_transport_port(&self, port: u16) -> Result<()> {
        match self.sink.send_message(&encode_line(&registration_message(port))) {
            Ok(_) => {
                info!(port, "registered datagram video port");
                Ok(())
            }
            Err(err) => {
                warn!(port, error = %err, "datagram video port registration failed");
                Err(err)
            }
        }
    }

    /// Settle every pending command with a failure carrying `reason`.
    pub fn abandon_pending(&self, reason: &str) -> usize {
        let drained: Vec<PendingCommand> = self.pending.lock().drain().map(|(_, entry)| entry).collect();
        self.settle_abandoned(drained, reason)
    }

    /// Settle commands written on connection `generation` or earlier.
    ///
    /// Commands written on a newer connection stay pending. A write still in
    /// flight settles as lost when it completes on an abandoned connection.
    pub fn abandon_connection(&self, generation: u64, reason: &str) -> usize {
        let drained: Vec<PendingCommand> = {
            let mut pending = self.pending.lock();
            {
                let mut lost = self.lost_through.lock();
                *lost = (*lost).max(Some(generation));
            }
            let stale: Vec<CommandId> = pending
                .values()
                .filter(|entry| entry.generation.is_some_and(|g| g <= generation))
                .map(|entry| entry.id.clone())
                .collect();
            stale.iter().filter_map(|id| pending.remove(id)).collect()
        };
        self.settle_abandoned(drained, reason)
    }

    fn settle_abandoned(&self, drained: Vec<PendingCommand>, reason: &str) -> usize {
        let count = drained.len();
        if count > 0 {
            warn!(count, reason, "abandoning pending commands");
        }
        for entry in drained {
            self.timeouts.cancel(&entry.id);
            deliver(entry, CommandResult::failure(reason));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, command_id: &str) -> bool {
        self.pending.lock().contains_key(command_id)
    }

    /// Parameters of a command still awaiting its outcome.
    pub fn pending_payload(&self, command_id: &str) -> Option<Params> {
        self.pending
            .lock()
            .get(command_id)
            .map(|entry| entry.payload.clone())
    }

    /// Abandon everything pending and stop the timer thread. Idempotent.
    pub fn shutdown(&self) {
        self.abandon_pending("Dispatcher shut down");
        self.timeouts.shutdown();
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("pending", &self.pending_count())
            .field("config", &self.config)
            .finish()
    }
}

fn expire(table: &Mutex<HashMap<CommandId, PendingCommand>>, id: &CommandId) {
    let entry = table.lock().remove(id);
    match entry {
        Some(entry) => {
            warn!(
                command = %entry.name,
                command_id = %entry.id,
                params = %param_names(&entry.payload),
                timeout_ms = entry.timeout.as_millis() as u64,
                "command timed out"
            );
            deliver_detached(entry, CommandResult::timeout());
        }
        None => debug!(command_id = %id, "timeout for settled command ignored"),
    }
}

/// Deliver off the timer thread. Falls back to delivering inline only when
/// no thread can be spawned.
fn deliver_detached(entry: PendingCommand, result: CommandResult) {
    if entry.callback.is_none() {
        deliver(entry, result);
        return;
    }

    let command_id = entry.id.clone();
    let slot = Arc::new(Mutex::new(Some((entry, result))));
    let worker_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name("kiosklink-timeout-callback".to_string())
        .spawn(move || {
            let settled = worker_slot.lock().take();
            if let Some((entry, result)) = settled {
                deliver(entry, result);
            }
        });

    if let Err(err) = spawned {
        error!(command_id = %command_id, error = %err, "timeout callback thread spawn failed");
        let settled = slot.lock().take();
        if let Some((entry, result)) = settled {
            deliver(entry, result);
        }
    }
}

/// Parameter names only; values may carry credentials.
fn param_names(params: &Params) -> String {
    params.keys().map(String::as_str).collect::<Vec<_>>().join(",")
}

fn deliver(entry: PendingCommand, result: CommandResult) {
    let Some(callback) = entry.callback else {
        debug!(command_id = %entry.id, "command settled without callback");
        return;
    };
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(move || callback(result))) {
        error!(
            command = %entry.name,
            command_id = %entry.id,
            panic = panic_message(panic.as_ref()),
            "command callback panicked"
        );
    }
}
