//! The one realtime object per process.
//!
//! Built once at startup and handed to every HTTP handler. Owns the
//! registry, the database listener, the dispatcher task and the root
//! cancellation token that tears all of it down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use storefront_events::BroadcastMessage;

use crate::broadcaster::Broadcaster;
use crate::config::RealtimeConfig;
use crate::lifecycle::{ConnectionHandle, ConnectionLifecycle};
use crate::listener::{ChangeListener, ListenerState, NotificationSource};
use crate::registry::{ConnectionRegistry, DeliveryReport, RegistryStats};
use crate::sink::{ChannelSink, Sink, SinkError};

pub struct RealtimeHub {
    config: RealtimeConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    listener: ChangeListener,
    lifecycle: ConnectionLifecycle,
    shutdown: CancellationToken,
}

impl RealtimeHub {
    /// Wire up the hub and start its dispatcher task.
    ///
    /// The database subscription itself starts on first use
    /// ([`open_connection`](Self::open_connection) or
    /// [`ensure_listening`](Self::ensure_listening)). Must be called from
    /// within a Tokio runtime.
    pub fn new(config: RealtimeConfig, source: Arc<dyn NotificationSource>) -> Arc<Self> {
        if config.channels.is_empty() {
            warn!("no notification channels configured; only manual broadcasts will be delivered");
        }

        let shutdown = CancellationToken::new();
        let registry = Arc::new(ConnectionRegistry::with_root(shutdown.child_token()));
        let broadcaster = Broadcaster::new(registry.clone());

        let (events_tx, events_rx) = mpsc::channel(config.dispatch_queue_capacity.max(1));
        broadcaster.spawn_dispatcher(events_rx, shutdown.clone());

        let listener = ChangeListener::new(
            source,
            config.channels.clone(),
            config.reconnect.clone(),
            events_tx,
            shutdown.clone(),
        );
        let lifecycle = ConnectionLifecycle::new(registry.clone(), config.keepalive_interval);

        Arc::new(Self {
            config,
            registry,
            broadcaster,
            listener,
            lifecycle,
            shutdown,
        })
    }

    /// Open a connection on a caller-supplied sink.
    pub fn open_connection(&self, sink: Arc<dyn Sink>) -> Result<ConnectionHandle, SinkError> {
        self.ensure_listening();
        self.lifecycle.open(sink)
    }

    /// Open a connection on a bounded [`ChannelSink`] sized from the config.
    ///
    /// The receiver yields pre-framed bytes and ends when the connection
    /// closes.
    pub fn open_channel(&self) -> Result<(ConnectionHandle, mpsc::Receiver<Vec<u8>>), SinkError> {
        let (sink, rx) = ChannelSink::new(self.config.outbound_capacity, self.config.slow_consumer);
        let handle = self.open_connection(Arc::new(sink))?;
        Ok((handle, rx))
    }

    /// Start the database subscription if it is not running yet.
    pub fn ensure_listening(&self) {
        if !self.shutdown.is_cancelled() {
            self.listener.ensure_started();
        }
    }

    /// Deliver a manual message to every live connection, bypassing the listener.
    pub fn broadcast(&self, message: &BroadcastMessage) -> DeliveryReport {
        self.broadcaster.inject(message)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn listener(&self) -> &ChangeListener {
        &self.listener
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Stop the listener and dispatcher and close every connection. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(
                active_connections = self.registry.len(),
                "shutting down realtime hub"
            );
        }
        self.shutdown.cancel();
        self.registry.close_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl core::fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("registry", &self.registry)
            .field("listener", &self.listener)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
