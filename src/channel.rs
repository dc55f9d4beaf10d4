//! Point-to-point channels between endpoints.
//!
//! A channel carries host snapshots of tensors from one `Send` kernel to one
//! `Recv` kernel in FIFO order. Each value is taken at most once. Bounded
//! channels make `put` wait while full; `get` always waits for a value.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{FlexForgeError, ForgeResult};
use crate::tensor::HostTensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelCapacity {
    Unbounded,
    Bounded(usize),
}

impl FromStr for ChannelCapacity {
    type Err = FlexForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(ChannelCapacity::Unbounded);
        }
        s.parse::<usize>()
            .map(ChannelCapacity::Bounded)
            .map_err(|_| FlexForgeError::InvalidConfiguration(format!("invalid channel capacity {:?}", s)))
    }
}

impl fmt::Display for ChannelCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelCapacity::Unbounded => write!(f, "unbounded"),
            ChannelCapacity::Bounded(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone)]
enum SenderKind {
    Unbounded(Sender<HostTensor>),
    Bounded(SyncSender<HostTensor>),
}

/// Producing end of a channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    inner: SenderKind,
    capacity: ChannelCapacity,
}

impl ChannelSender {
    pub fn capacity(&self) -> ChannelCapacity {
        self.capacity
    }

    /// Enqueue `value`. Waits only when a bounded channel is full.
    pub fn put(&self, value: HostTensor) -> ForgeResult<()> {
        let sent = match &self.inner {
            SenderKind::Unbounded(tx) => tx.send(value).is_ok(),
            SenderKind::Bounded(tx) => tx.send(value).is_ok(),
        };
        if sent {
            Ok(())
        } else {
            Err(FlexForgeError::ChannelClosed)
        }
    }
}

/// Consuming end of a channel.
///
/// Clones share one queue; each value still goes to exactly one `get`.
#[derive(Debug, Clone)]
pub struct ChannelReceiver {
    inner: Arc<Mutex<Receiver<HostTensor>>>,
}

impl ChannelReceiver {
    /// Dequeue the oldest value, waiting until one is available.
    pub fn get(&self) -> ForgeResult<HostTensor> {
        self.inner
            .lock()?
            .recv()
            .map_err(|_| FlexForgeError::ChannelClosed)
    }

    /// Dequeue the oldest value if one is ready.
    pub fn try_get(&self) -> ForgeResult<Option<HostTensor>> {
        match self.inner.lock()?.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(FlexForgeError::ChannelClosed),
        }
    }
}

/// Create a connected sender/receiver pair.
pub fn channel(capacity: ChannelCapacity) -> (ChannelSender, ChannelReceiver) {
    let (inner, rx) = match capacity {
        ChannelCapacity::Unbounded => {
            let (tx, rx) = mpsc::channel();
            (SenderKind::Unbounded(tx), rx)
        }
        ChannelCapacity::Bounded(n) => {
            let (tx, rx) = mpsc::sync_channel(n);
            (SenderKind::Bounded(tx), rx)
        }
    };
    (
        ChannelSender { inner, capacity },
        ChannelReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}
