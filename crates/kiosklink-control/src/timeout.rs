use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::command::CommandId;

enum TimerOp {
    Arm { id: CommandId, deadline: Instant },
    Cancel(CommandId),
    Shutdown,
}

/// One thread serving every pending command's deadline.
///
/// Cancellation is lazy: a cancelled entry stays in the heap until its
/// deadline passes and is then skipped. Re-arming an id supersedes the
/// earlier deadline.
pub struct TimeoutWheel {
    ops: Sender<TimerOp>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutWheel {
    /// Start the timer thread. `on_expire` runs on that thread.
    pub fn spawn<F>(on_expire: F) -> std::io::Result<Self>
    where
        F: Fn(CommandId) + Send + 'static,
    {
        let (ops, rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("kiosklink-timeouts".to_string())
            .spawn(move || run(rx, on_expire))?;

        Ok(Self {
            ops,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn arm(&self, id: CommandId, after: Duration) {
        let deadline = Instant::now() + after;
        if self.ops.send(TimerOp::Arm { id, deadline }).is_err() {
            debug!("timeout wheel stopped; deadline not armed");
        }
    }

    pub fn cancel(&self, id: &CommandId) {
        let _ = self.ops.send(TimerOp::Cancel(id.clone()));
    }

    /// Stop the timer thread. Armed deadlines never fire afterwards.
    pub fn shutdown(&self) {
        let _ = self.ops.send(TimerOp::Shutdown);
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        // The last owner may be dropped from inside `on_expire`.
        if worker.thread().id() != thread::current().id() {
            let _ = worker.join();
        }
    }
}

impl Drop for TimeoutWheel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TimeoutWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutWheel")
            .field("running", &self.worker.lock().is_some())
            .finish()
    }
}

type Deadlines = BinaryHeap<Reverse<(Instant, u64, CommandId)>>;

fn run<F>(rx: Receiver<TimerOp>, on_expire: F)
where
    F: Fn(CommandId),
{
    let mut deadlines = Deadlines::new();
    let mut armed: HashMap<CommandId, u64> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        fire_expired(&mut deadlines, &mut armed, &on_expire);

        let next = deadlines.peek().map(|Reverse((deadline, _, _))| *deadline);
        let op = match next {
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(op) => op,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match rx.recv() {
                Ok(op) => op,
                Err(_) => return,
            },
        };

        match op {
            TimerOp::Arm { id, deadline } => {
                seq += 1;
                armed.insert(id.clone(), seq);
                deadlines.push(Reverse((deadline, seq, id)));
            }
            TimerOp::Cancel(id) => {
                armed.remove(&id);
            }
            TimerOp::Shutdown => {
                trace!(armed = armed.len(), "timeout wheel stopping");
                return;
            }
        }
    }
}

fn fire_expired<F>(deadlines: &mut Deadlines, armed: &mut HashMap<CommandId, u64>, on_expire: &F)
where
    F: Fn(CommandId),
{
    let now = Instant::now();
    while deadlines
        .peek()
        .is_some_and(|Reverse((deadline, _, _))| *deadline <= now)
    {
        let Some(Reverse((_, seq, id))) = deadlines.pop() else {
            break;
        };
        if armed.get(&id) == Some(&seq) {
            armed.remove(&id);
            on_expire(id);
        }
    }
}
