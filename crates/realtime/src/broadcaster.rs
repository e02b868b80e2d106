//! Turns change events into client messages and fans them out.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use storefront_events::{BroadcastMessage, ChangeEvent};

use crate::registry::{ConnectionRegistry, DeliveryReport};

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Event tag = lowercased operation; payload = record verbatim.
    pub fn format(event: ChangeEvent) -> BroadcastMessage {
        BroadcastMessage {
            event: event.operation.event_tag(),
            channel: event.channel,
            payload: event.record,
        }
    }

    pub fn publish(&self, event: ChangeEvent) -> DeliveryReport {
        let message = Self::format(event);
        let report = self.registry.broadcast_all(&message);
        debug!(
            channel = %message.channel,
            event = %message.event,
            delivered = report.delivered,
            evicted = report.evicted,
            "change event broadcast"
        );
        report
    }

    /// Broadcast a message that did not come from the database.
    pub fn inject(&self, message: &BroadcastMessage) -> DeliveryReport {
        let report = self.registry.broadcast_all(message);
        info!(
            channel = %message.channel,
            event = %message.event,
            delivered = report.delivered,
            evicted = report.evicted,
            "manual broadcast"
        );
        report
    }

    /// Consume the listener's queue on a single task, preserving its order.
    ///
    /// Stops on `shutdown` or once every sender is gone.
    pub fn spawn_dispatcher(
        &self,
        mut events: mpsc::Receiver<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = events.recv() => match next {
                        Some(event) => {
                            this.publish(event);
                        }
                        None => break,
                    },
                }
            }
            debug!("change dispatcher stopped");
        })
    }
}
