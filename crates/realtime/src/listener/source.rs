//! Where raw notifications come from.

use async_trait::async_trait;

use storefront_core::ChannelName;

use super::ListenerError;

/// One notification as delivered by the database, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

impl RawNotification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// A publish/subscribe backend (Postgres `LISTEN/NOTIFY`, or in-memory for dev/tests).
#[async_trait]
pub trait NotificationSource: Send + Sync + 'static {
    /// Open one subscription covering every channel in `channels`.
    async fn subscribe(
        &self,
        channels: &[ChannelName],
    ) -> Result<Box<dyn NotificationSubscription>, ListenerError>;
}

/// A live subscription.
#[async_trait]
pub trait NotificationSubscription: Send {
    /// Wait for the next notification.
    ///
    /// `Ok(None)` means the subscription is gone (connection lost or source
    /// closed) and will never yield again.
    async fn next(&mut self) -> Result<Option<RawNotification>, ListenerError>;
}
