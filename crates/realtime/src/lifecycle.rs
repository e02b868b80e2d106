//! Per-connection lifecycle: `Init -> Open -> Closed`.
//!
//! Opening a connection registers it, greets it with a `connected` frame and
//! starts its keepalive task. The registry entry and the keepalive task share
//! one cancellation scope. Every way a connection can end (client abort,
//! failed write, shutdown) cancels that scope and removes the entry, so
//! neither can outlive the other.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use storefront_core::ConnectionId;
use storefront_events::{ControlFrame, StreamFrame, encode_frame};

use crate::registry::{ConnectionRegistry, ConnectionScope};
use crate::sink::{Sink, SinkError};

/// Shortest keepalive period; shorter intervals are raised to it.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Init,
    Open,
    /// Terminal.
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    keepalive_interval: Duration,
}

impl ConnectionLifecycle {
    pub fn new(registry: Arc<ConnectionRegistry>, keepalive_interval: Duration) -> Self {
        if keepalive_interval < MIN_KEEPALIVE_INTERVAL {
            warn!(
                requested_ms = keepalive_interval.as_millis() as u64,
                applied_ms = MIN_KEEPALIVE_INTERVAL.as_millis() as u64,
                "keepalive interval too short; raising it"
            );
        }
        Self {
            registry,
            keepalive_interval: keepalive_interval.max(MIN_KEEPALIVE_INTERVAL),
        }
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Open a new connection on `sink`.
    ///
    /// The `connected` frame is written before the connection is registered,
    /// so it is always the first frame the client sees. Must be called from
    /// within a Tokio runtime.
    pub fn open(&self, sink: Arc<dyn Sink>) -> Result<ConnectionHandle, SinkError> {
        let id = ConnectionId::new();
        debug!(connection_id = %id, state = ?ConnectionState::Init, "opening connection");

        let hello = encode_control(ControlFrame::connected(id))?;
        if let Err(err) = sink.write(&hello) {
            sink.close();
            return Err(err);
        }

        let scope = self.registry.register(id, sink);
        if scope.is_cancelled() {
            // Registry is shutting down.
            self.registry.release(&scope);
            return Err(SinkError::Closed);
        }

        tokio::spawn(keepalive(
            self.registry.clone(),
            scope.clone(),
            self.keepalive_interval,
        ));

        info!(connection_id = %id, state = ?ConnectionState::Open, "realtime connection opened");
        Ok(ConnectionHandle {
            scope,
            registry: self.registry.clone(),
        })
    }
}

/// Owner's handle on an open connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    scope: ConnectionScope,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.scope.id()
    }

    pub fn state(&self) -> ConnectionState {
        if self.scope.is_cancelled() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    /// Client went away: remove the entry and stop the keepalive now.
    pub fn close(&self) {
        if self.registry.release(&self.scope) {
            info!(connection_id = %self.id(), state = ?ConnectionState::Closed, "realtime connection closed");
        }
    }

    /// Resolves once the connection is closed, for whatever reason.
    pub async fn closed(&self) {
        self.scope.token().cancelled().await;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

async fn keepalive(registry: Arc<ConnectionRegistry>, scope: ConnectionScope, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = scope.token().cancelled() => break,
            _ = ticker.tick() => {
                let ping = match encode_control(ControlFrame::ping_now()) {
                    Ok(ping) => ping,
                    Err(err) => {
                        error!(connection_id = %scope.id(), error = %err, "failed to encode ping");
                        break;
                    }
                };
                if registry.send_to(&scope, &ping).is_err() {
                    break;
                }
            }
        }
    }

    if registry.release(&scope) {
        info!(connection_id = %scope.id(), state = ?ConnectionState::Closed, "realtime connection closed");
    }
    debug!(connection_id = %scope.id(), "keepalive stopped");
}

fn encode_control(frame: ControlFrame) -> Result<Vec<u8>, SinkError> {
    encode_frame(&StreamFrame::Control(frame)).map_err(|e| SinkError::Io(e.to_string()))
}
