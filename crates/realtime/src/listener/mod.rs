//! Database bridge: one persistent subscription, decoded into change events.
//!
//! The listener owns a single supervisor task, started lazily on first use.
//! The task subscribes, forwards decoded events into the dispatch queue, and
//! resubscribes with bounded exponential backoff whenever the subscription is
//! lost. A payload that fails to decode is logged and dropped; it never ends
//! the subscription.

mod backoff;
mod in_memory;
mod postgres;
mod source;

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use storefront_core::ChannelName;
use storefront_events::ChangeEvent;

pub use backoff::ReconnectPolicy;
pub use in_memory::InMemoryNotificationSource;
pub use postgres::PgNotificationSource;
pub use source::{NotificationSource, NotificationSubscription, RawNotification};

use backoff::Backoff;

const PAYLOAD_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("notification source unavailable: {0}")]
    Unavailable(String),
}

/// Where the supervisor task is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    /// Not started yet.
    Idle,
    Connecting,
    Listening,
    /// Waiting before the next subscribe attempt.
    Backoff,
    /// Stopped by shutdown.
    Stopped,
    /// Gave up after exhausting `max_attempts`.
    Failed,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl core::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ChangeListener {
    worker: ListenerWorker,
    task: OnceLock<JoinHandle<()>>,
}

impl ChangeListener {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        channels: Vec<ChannelName>,
        reconnect: ReconnectPolicy,
        events: mpsc::Sender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            worker: ListenerWorker {
                source,
                channels,
                reconnect,
                events,
                shutdown,
                state: Arc::new(state),
            },
            task: OnceLock::new(),
        }
    }

    /// Start the subscription if it is not running yet.
    ///
    /// Concurrent first callers race on a `OnceLock`, so exactly one
    /// supervisor task (and one subscription) is ever created. Must be called
    /// from within a Tokio runtime.
    pub fn ensure_started(&self) {
        self.task.get_or_init(|| {
            info!(channels = ?self.worker.channels, "starting change listener");
            tokio::spawn(self.worker.clone().run())
        });
    }

    pub fn is_started(&self) -> bool {
        self.task.get().is_some()
    }

    pub fn state(&self) -> ListenerState {
        *self.worker.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.worker.state.subscribe()
    }

    pub fn channels(&self) -> &[ChannelName] {
        &self.worker.channels
    }
}

impl core::fmt::Debug for ChangeListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChangeListener")
            .field("channels", &self.worker.channels)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

enum PumpExit {
    Shutdown,
    QueueClosed,
    Lost(String),
}

#[derive(Clone)]
struct ListenerWorker {
    source: Arc<dyn NotificationSource>,
    channels: Vec<ChannelName>,
    reconnect: ReconnectPolicy,
    events: mpsc::Sender<ChangeEvent>,
    shutdown: CancellationToken,
    state: Arc<watch::Sender<ListenerState>>,
}

impl ListenerWorker {
    async fn run(self) {
        let mut backoff = Backoff::new(&self.reconnect);
        let mut failures: u32 = 0;

        loop {
            self.set_state(ListenerState::Connecting);
            let subscribed = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                subscribed = self.source.subscribe(&self.channels) => subscribed,
            };

            match subscribed {
                Ok(mut subscription) => {
                    failures = 0;
                    backoff.reset();
                    self.set_state(ListenerState::Listening);
                    info!(channels = ?self.channels, "listening for change notifications");

                    match self.pump(subscription.as_mut()).await {
                        PumpExit::Shutdown => break,
                        PumpExit::QueueClosed => {
                            debug!("dispatch queue closed; stopping change listener");
                            break;
                        }
                        PumpExit::Lost(reason) => {
                            warn!(reason = %reason, "notification subscription lost");
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(error = %err, attempt = failures, "failed to subscribe to notifications");

                    if self.reconnect.max_attempts.is_some_and(|max| failures >= max) {
                        error!(
                            attempts = failures,
                            "giving up on notification subscription; realtime delivery is down"
                        );
                        self.set_state(ListenerState::Failed);
                        return;
                    }
                }
            }

            let delay = backoff.next_delay();
            self.set_state(ListenerState::Backoff);
            info!(delay_ms = delay.as_millis() as u64, "resubscribing after delay");

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ListenerState::Stopped);
        debug!("change listener stopped");
    }

    async fn pump(&self, subscription: &mut dyn NotificationSubscription) -> PumpExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return PumpExit::Shutdown,
                next = subscription.next() => next,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => return PumpExit::Lost("subscription closed".to_string()),
                Err(err) => return PumpExit::Lost(err.to_string()),
            };

            let event = match ChangeEvent::decode(&raw.channel, &raw.payload) {
                Ok(event) => event,
                Err(err) => {
                    warn!(
                        channel = %raw.channel,
                        error = %err,
                        payload_preview = %payload_preview(&raw.payload),
                        "dropping undecodable notification"
                    );
                    continue;
                }
            };

            // Full queue: wait here rather than drop, keeping publisher order.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return PumpExit::Shutdown,
                sent = self.events.send(event) => {
                    if sent.is_err() {
                        return PumpExit::QueueClosed;
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
    }
}

fn payload_preview(payload: &str) -> String {
    if payload.chars().count() > PAYLOAD_PREVIEW_CHARS {
        let head: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        payload.to_string()
    }
}
