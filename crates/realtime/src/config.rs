//! Tuning knobs for the realtime hub.

use std::time::Duration;

use storefront_core::ChannelName;

use crate::lifecycle::MIN_KEEPALIVE_INTERVAL;
use crate::listener::ReconnectPolicy;
use crate::sink::SlowConsumerPolicy;

/// Channel watched when nothing else is configured.
pub const DEFAULT_CHANNEL: &str = "orders";

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Notification channels to `LISTEN` on (one subscription covers all).
    pub channels: Vec<ChannelName>,
    /// Interval between `ping` frames on each connection.
    pub keepalive_interval: Duration,
    /// Frames buffered per connection before the slow-consumer policy applies.
    pub outbound_capacity: usize,
    pub slow_consumer: SlowConsumerPolicy,
    /// Decoded events buffered between the listener and the broadcaster.
    pub dispatch_queue_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channels: ChannelName::new(DEFAULT_CHANNEL).into_iter().collect(),
            keepalive_interval: Duration::from_secs(30),
            outbound_capacity: 64,
            slow_consumer: SlowConsumerPolicy::Disconnect,
            dispatch_queue_capacity: 1024,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RealtimeConfig {
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = ChannelName>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    /// Raised to [`MIN_KEEPALIVE_INTERVAL`] if shorter.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval.max(MIN_KEEPALIVE_INTERVAL);
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_slow_consumer(mut self, policy: SlowConsumerPolicy) -> Self {
        self.slow_consumer = policy;
        self
    }

    pub fn with_dispatch_queue_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_queue_capacity = capacity;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
