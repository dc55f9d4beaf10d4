//! In-order execution stream
//!
//! Operations enqueued on a [`Stream`] run on a dedicated worker thread in
//! submission order, and `enqueue` returns as soon as the operation is queued.
//! The first failing operation poisons the stream: later operations are
//! skipped and the failure is reported by the next [`Stream::synchronize`],
//! after which the stream is usable again.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{FlexForgeError, ForgeResult};

/// Unit of work executed on the stream worker.
pub type StreamOp = Box<dyn FnOnce() -> ForgeResult<()> + Send + 'static>;

enum Command {
    Run { label: &'static str, op: StreamOp },
    Barrier(mpsc::Sender<()>),
}

#[derive(Default)]
struct StreamState {
    error: Mutex<Option<String>>,
    completed: AtomicU64,
    skipped: AtomicU64,
}

/// Stream wrapper
pub struct Stream {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<StreamState>,
}

impl Stream {
    /// Create a new stream and spawn its worker
    pub fn new(name: impl Into<String>) -> ForgeResult<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Command>();
        let state = Arc::new(StreamState::default());

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(receiver, worker_state))?;

        tracing::debug!(stream = %name, "stream created");
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `op` behind everything already submitted.
    pub fn enqueue<F>(&self, label: &'static str, op: F) -> ForgeResult<()>
    where
        F: FnOnce() -> ForgeResult<()> + Send + 'static,
    {
        self.send(Command::Run {
            label,
            op: Box::new(op),
        })
    }

    /// Block until every queued operation has finished.
    ///
    /// Returns `StreamFailed` with the first error raised since the previous
    /// barrier, if any.
    pub fn synchronize(&self) -> ForgeResult<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(Command::Barrier(done_tx))?;
        done_rx
            .recv()
            .map_err(|_| FlexForgeError::StreamFailed(format!("{}: worker exited", self.name)))?;

        match self.state.error.lock()?.take() {
            Some(message) => Err(FlexForgeError::StreamFailed(message)),
            None => Ok(()),
        }
    }

    /// Operations executed successfully so far.
    pub fn completed(&self) -> u64 {
        self.state.completed.load(Ordering::Relaxed)
    }

    /// Operations skipped because an earlier one failed.
    pub fn skipped(&self) -> u64 {
        self.state.skipped.load(Ordering::Relaxed)
    }

    fn send(&self, command: Command) -> ForgeResult<()> {
        let guard = self.sender.lock()?;
        let sender = guard
            .as_ref()
            .ok_or_else(|| FlexForgeError::StreamFailed(format!("{}: stream closed", self.name)))?;
        sender
            .send(command)
            .map_err(|_| FlexForgeError::StreamFailed(format!("{}: worker exited", self.name)))
    }
}

fn run_worker(receiver: mpsc::Receiver<Command>, state: Arc<StreamState>) {
    for command in receiver {
        match command {
            Command::Run { label, op } => {
                let failed = match state.error.lock() {
                    Ok(error) => error.is_some(),
                    Err(_) => true,
                };
                if failed {
                    state.skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                let outcome = panic::catch_unwind(AssertUnwindSafe(op));
                let message = match outcome {
                    Ok(Ok(())) => {
                        state.completed.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                    Ok(Err(e)) => Some(format!("{}: {}", label, e)),
                    Err(_) => Some(format!("{}: operation panicked", label)),
                };
                if let Some(message) = message {
                    tracing::error!(op = label, error = %message, "stream operation failed");
                    if let Ok(mut error) = state.error.lock() {
                        error.get_or_insert(message);
                    }
                }
            }
            Command::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("completed", &self.completed())
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}
