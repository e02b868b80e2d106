//! The writable end of one client's stream.
//!
//! The registry and broadcaster only ever see `dyn Sink`; whatever serves the
//! HTTP stream supplies the implementation.

use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use storefront_core::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The client is gone or the sink was closed.
    #[error("sink is closed")]
    Closed,

    /// The outbound buffer is full and the policy is to disconnect.
    #[error("outbound buffer full ({capacity} frames)")]
    Overflow { capacity: usize },

    #[error("sink write failed: {0}")]
    Io(String),
}

/// One client's open stream.
///
/// `write` must not block: it is called from the fan-out loop for every
/// recipient in turn.
pub trait Sink: Send + Sync {
    fn write(&self, frame: &[u8]) -> Result<(), SinkError>;

    /// Stop accepting frames and end the client's stream. Idempotent.
    fn close(&self);
}

/// What a [`ChannelSink`] does when its buffer is full.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SlowConsumerPolicy {
    /// Report overflow so the registry evicts the connection.
    #[default]
    Disconnect,
    /// Discard the frame for this connection only and keep it open.
    DropMessage,
}

impl SlowConsumerPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::DropMessage => "drop",
        }
    }
}

impl FromStr for SlowConsumerPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disconnect" => Ok(Self::Disconnect),
            "drop" | "drop_message" => Ok(Self::DropMessage),
            other => Err(DomainError::validation(format!(
                "unknown slow consumer policy '{other}' (expected disconnect or drop)"
            ))),
        }
    }
}

/// Sink backed by a bounded Tokio channel.
///
/// The receiving half is turned into the HTTP response body. Closing the sink
/// drops the sender, which ends that body.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    capacity: usize,
    policy: SlowConsumerPolicy,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink buffering up to `capacity` frames (at least one).
    pub fn new(capacity: usize, policy: SlowConsumerPolicy) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Self {
            tx: Mutex::new(Some(tx)),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        };
        (sink, rx)
    }

    /// Frames discarded under [`SlowConsumerPolicy::DropMessage`].
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.as_ref().is_none_or(|tx| tx.is_closed()),
            Err(_) => true,
        }
    }
}

impl Sink for ChannelSink {
    fn write(&self, frame: &[u8]) -> Result<(), SinkError> {
        let guard = self.tx.lock().map_err(|_| SinkError::Closed)?;
        let tx = guard.as_ref().ok_or(SinkError::Closed)?;

        match tx.try_send(frame.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
            Err(TrySendError::Full(_)) => match self.policy {
                SlowConsumerPolicy::Disconnect => Err(SinkError::Overflow {
                    capacity: self.capacity,
                }),
                SlowConsumerPolicy::DropMessage => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(dropped, "slow consumer; frame dropped");
                    Ok(())
                }
            },
        }
    }

    fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}
