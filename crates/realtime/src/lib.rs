//! Realtime change distribution: database notifications in, push streams out.
//!
//! ```text
//! LISTEN/NOTIFY ──► ChangeListener ──(bounded queue)──► Broadcaster ──► ConnectionRegistry ──► Sink × N
//!                                                                          ▲
//!                               ConnectionLifecycle (connected + keepalive)┘
//! ```
//!
//! [`RealtimeHub`] wires the pieces together and is the only thing the HTTP
//! layer talks to.

pub mod broadcaster;
pub mod config;
pub mod hub;
pub mod lifecycle;
pub mod listener;
pub mod registry;
pub mod sink;

pub use broadcaster::Broadcaster;
pub use config::RealtimeConfig;
pub use hub::RealtimeHub;
pub use lifecycle::{ConnectionHandle, ConnectionLifecycle, ConnectionState, MIN_KEEPALIVE_INTERVAL};
pub use listener::{
    ChangeListener, InMemoryNotificationSource, ListenerError, ListenerState, NotificationSource,
    NotificationSubscription, PgNotificationSource, RawNotification, ReconnectPolicy,
};
pub use registry::{Connection, ConnectionRegistry, ConnectionScope, DeliveryReport, RegistryStats};
pub use sink::{ChannelSink, Sink, SinkError, SlowConsumerPolicy};
