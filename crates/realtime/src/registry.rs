//! Process-wide table of live connections.
//!
//! ## Concurrency
//!
//! The table is a [`DashMap`], so registration from request handlers,
//! eviction from the fan-out loop and removal from keepalive tasks can
//! interleave freely. Fan-out works on a snapshot: entries are cloned out
//! before the first write, so no shard lock is ever held while a sink runs,
//! and concurrent (un)registration cannot skip or corrupt unrelated entries.
//!
//! ## Scopes and generations
//!
//! Every entry owns a [`CancellationToken`] (its scope). Whatever removes the
//! entry also cancels the scope, which stops the connection's keepalive
//! timer. Entries carry a generation number so a late cleanup of a replaced
//! entry never removes its replacement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use storefront_core::{ConnectionId, Entity};
use storefront_events::{BroadcastMessage, encode_message};

use crate::sink::{Sink, SinkError};

/// A registered connection.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    sink: Arc<dyn Sink>,
    created_at: DateTime<Utc>,
    generation: u64,
    scope: CancellationToken,
}

impl Connection {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    fn retire(&self) {
        self.scope.cancel();
        self.sink.close();
    }

    fn shares_sink(&self, other: &Arc<dyn Sink>) -> bool {
        // Address only: vtable pointers of the same type may differ.
        core::ptr::addr_eq(Arc::as_ptr(&self.sink), Arc::as_ptr(other))
    }
}

impl Entity for Connection {
    type Id = ConnectionId;

    fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Proof of one registration, held by whoever manages the connection.
#[derive(Debug, Clone)]
pub struct ConnectionScope {
    id: ConnectionId,
    generation: u64,
    token: CancellationToken,
}

impl ConnectionScope {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub active_connections: usize,
    pub connection_ids: Vec<ConnectionId>,
}

/// Outcome of one fan-out.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sinks that accepted the frame.
    pub delivered: usize,
    /// Connections removed because their write failed.
    pub evicted: usize,
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    next_generation: AtomicU64,
    root: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_root(CancellationToken::new())
    }

    /// Create a registry whose connection scopes are children of `root`.
    ///
    /// Cancelling `root` cancels every scope (process shutdown).
    pub fn with_root(root: CancellationToken) -> Self {
        Self {
            connections: DashMap::new(),
            next_generation: AtomicU64::new(1),
            root,
        }
    }

    /// Insert or replace the entry for `id`.
    ///
    /// A replaced entry is retired: its scope is cancelled and its sink
    /// closed, unless the new registration reuses that same sink. After
    /// shutdown the sink is closed immediately and the returned scope is
    /// already cancelled.
    pub fn register(&self, id: ConnectionId, sink: Arc<dyn Sink>) -> ConnectionScope {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let scope = ConnectionScope {
            id,
            generation,
            token: token.clone(),
        };

        if self.root.is_cancelled() {
            sink.close();
            return scope;
        }

        let connection = Connection {
            id,
            sink: sink.clone(),
            created_at: Utc::now(),
            generation,
            scope: token,
        };

        if let Some(previous) = self.connections.insert(id, connection) {
            debug!(connection_id = %id, "replaced existing registration");
            if previous.shares_sink(&sink) {
                previous.scope.cancel();
            } else {
                previous.retire();
            }
        }

        // `close_all` may have run between the check above and the insert.
        if self.root.is_cancelled() {
            self.evict(&id, generation);
        }

        scope
    }

    /// Remove `id` if present. Returns whether an entry was removed.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some((_, connection)) => {
                connection.retire();
                true
            }
            None => false,
        }
    }

    /// Remove the entry created for `scope` (and only that one) and cancel
    /// the scope. Returns whether an entry was removed.
    pub fn release(&self, scope: &ConnectionScope) -> bool {
        scope.token.cancel();
        self.evict(&scope.id, scope.generation)
    }

    fn evict(&self, id: &ConnectionId, generation: u64) -> bool {
        match self
            .connections
            .remove_if(id, |_, c| c.generation == generation)
        {
            Some((_, connection)) => {
                connection.retire();
                true
            }
            None => false,
        }
    }

    /// Write `message` to every live connection.
    ///
    /// A failed write evicts that connection; it never reaches other
    /// recipients or the caller.
    pub fn broadcast_all(&self, message: &BroadcastMessage) -> DeliveryReport {
        let frame = match encode_message(message) {
            Ok(frame) => frame,
            Err(err) => {
                error!(channel = %message.channel, error = %err, "dropping unencodable message");
                return DeliveryReport::default();
            }
        };

        let snapshot: Vec<Connection> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut report = DeliveryReport::default();
        for connection in snapshot {
            // Closed while this fan-out was in flight.
            if connection.scope.is_cancelled() {
                continue;
            }

            match connection.sink.write(&frame) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(
                        connection_id = %connection.id,
                        error = %err,
                        "write failed; dropping connection"
                    );
                    if self.evict(&connection.id, connection.generation) {
                        report.evicted += 1;
                    }
                }
            }
        }

        report
    }

    /// Write a frame to the connection registered under `scope`.
    ///
    /// Fails with [`SinkError::Closed`] once the registration is gone. A
    /// failed write evicts the connection.
    pub fn send_to(&self, scope: &ConnectionScope, frame: &[u8]) -> Result<(), SinkError> {
        let connection = self
            .connections
            .get(&scope.id)
            .filter(|entry| entry.generation == scope.generation)
            .map(|entry| entry.value().clone())
            .ok_or(SinkError::Closed)?;

        connection.sink.write(frame).inspect_err(|err| {
            warn!(connection_id = %connection.id, error = %err, "write failed; dropping connection");
            self.evict(&connection.id, connection.generation);
        })
    }

    pub fn stats(&self) -> RegistryStats {
        let mut connection_ids: Vec<ConnectionId> =
            self.connections.iter().map(|entry| *entry.key()).collect();
        connection_ids.sort();

        RegistryStats {
            active_connections: connection_ids.len(),
            connection_ids,
        }
    }

    /// Cancel every scope and remove every entry. Later registrations are
    /// closed on arrival.
    pub fn close_all(&self) {
        self.root.cancel();

        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.unregister(&id);
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
