//! In-memory notification source for dev/tests.
//!
//! Emulates `pg_notify`: [`InMemoryNotificationSource::notify`] reaches every
//! subscription that is live at that moment and listens on the channel.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use storefront_core::ChannelName;

use super::ListenerError;
use super::source::{NotificationSource, NotificationSubscription, RawNotification};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct InMemoryNotificationSource {
    tx: broadcast::Sender<RawNotification>,
    // Replaced on every `disconnect_all`; live subscriptions hold the old one.
    epoch: Mutex<CancellationToken>,
    failures_remaining: AtomicU32,
    subscribe_calls: AtomicUsize,
}

impl InMemoryNotificationSource {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            epoch: Mutex::new(CancellationToken::new()),
            failures_remaining: AtomicU32::new(0),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Publish `payload` on `channel`. Returns how many subscriptions saw it.
    pub fn notify(&self, channel: &str, payload: impl Into<String>) -> usize {
        self.tx
            .send(RawNotification::new(channel, payload))
            .unwrap_or(0)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total `subscribe` calls so far, successful or not.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Sever every live subscription, as if the database connection dropped.
    pub fn disconnect_all(&self) {
        if let Ok(mut epoch) = self.epoch.lock() {
            let old = std::mem::replace(&mut *epoch, CancellationToken::new());
            old.cancel();
        }
    }

    /// Make the next `attempts` subscribe calls fail.
    pub fn fail_next_subscribes(&self, attempts: u32) {
        self.failures_remaining.store(attempts, Ordering::SeqCst);
    }
}

impl Default for InMemoryNotificationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSource for InMemoryNotificationSource {
    async fn subscribe(
        &self,
        channels: &[ChannelName],
    ) -> Result<Box<dyn NotificationSubscription>, ListenerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ListenerError::Unavailable(
                "in-memory source refused subscription".to_string(),
            ));
        }

        let severed = self
            .epoch
            .lock()
            .map_err(|_| ListenerError::Unavailable("source state poisoned".to_string()))?
            .clone();

        Ok(Box::new(InMemorySubscription {
            rx: self.tx.subscribe(),
            channels: channels.iter().map(|c| c.as_str().to_string()).collect(),
            severed,
        }))
    }
}

struct InMemorySubscription {
    rx: broadcast::Receiver<RawNotification>,
    channels: Vec<String>,
    severed: CancellationToken,
}

#[async_trait]
impl NotificationSubscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<RawNotification>, ListenerError> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.severed.cancelled() => return Ok(None),
                received = self.rx.recv() => received,
            };

            match received {
                Ok(n) if self.channels.iter().any(|c| *c == n.channel) => return Ok(Some(n)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "in-memory notification subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Vec<ChannelName> {
        vec![ChannelName::new("orders").unwrap()]
    }

    #[tokio::test]
    async fn delivers_only_subscribed_channels() {
        let source = InMemoryNotificationSource::new();
        let mut sub = source.subscribe(&orders()).await.unwrap();

        source.notify("products", "{}");
        source.notify("orders", "payload");

        assert_eq!(
            sub.next().await.unwrap(),
            Some(RawNotification::new("orders", "payload"))
        );
    }

    #[tokio::test]
    async fn disconnect_all_ends_live_subscriptions() {
        let source = InMemoryNotificationSource::new();
        let mut sub = source.subscribe(&orders()).await.unwrap();

        source.disconnect_all();

        assert_eq!(sub.next().await.unwrap(), None);

        // New subscriptions are unaffected.
        let mut fresh = source.subscribe(&orders()).await.unwrap();
        source.notify("orders", "again");
        assert!(fresh.next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let source = InMemoryNotificationSource::new();
        source.fail_next_subscribes(2);

        assert!(source.subscribe(&orders()).await.is_err());
        assert!(source.subscribe(&orders()).await.is_err());
        assert!(source.subscribe(&orders()).await.is_ok());
        assert_eq!(source.subscribe_calls(), 3);
    }
}
