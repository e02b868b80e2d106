//! Postgres `LISTEN/NOTIFY` notification source.
//!
//! Rows are announced by triggers owned by the schema, e.g.
//!
//! ```sql
//! PERFORM pg_notify(
//!     'orders',
//!     json_build_object('operation', TG_OP, 'record', row_to_json(NEW))::text
//! );
//! ```
//!
//! One dedicated connection (a [`PgListener`]) carries the `LISTEN` for every
//! configured channel. Notifications are transient: anything sent while the
//! connection is down is lost.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::instrument;

use storefront_core::ChannelName;

use super::ListenerError;
use super::source::{NotificationSource, NotificationSubscription, RawNotification};

#[derive(Debug, Clone)]
pub struct PgNotificationSource {
    pool: PgPool,
}

impl PgNotificationSource {
    /// Listener connections are opened with the pool's connect options.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a source from a database URL without connecting yet.
    ///
    /// Only the URL is validated here; connection failures surface on
    /// `subscribe`, where the listener's reconnect loop handles them.
    pub fn from_url(database_url: &str) -> Result<Self, ListenerError> {
        let pool = PgPool::connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    #[instrument(skip(self), err)]
    async fn subscribe(
        &self,
        channels: &[ChannelName],
    ) -> Result<Box<dyn NotificationSubscription>, ListenerError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all(channels.iter().map(ChannelName::as_str))
            .await?;

        Ok(Box::new(PgSubscription { listener }))
    }
}

struct PgSubscription {
    listener: PgListener,
}

#[async_trait]
impl NotificationSubscription for PgSubscription {
    async fn next(&mut self) -> Result<Option<RawNotification>, ListenerError> {
        // `try_recv` reports a dropped connection as `None` instead of
        // silently reconnecting, so the caller sees the gap.
        let notification = self.listener.try_recv().await?;
        Ok(notification.map(|n| RawNotification::new(n.channel(), n.payload())))
    }
}
