use std::sync::Arc;

use anyhow::Context;

use storefront_realtime::{InMemoryNotificationSource, PgNotificationSource, RealtimeHub};

use crate::config::AppConfig;

/// Everything the HTTP layer needs, built once at startup.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub hub: Arc<RealtimeHub>,
    /// Set when running without a database; lets dev tooling and tests
    /// emulate `pg_notify`.
    pub in_memory: Option<Arc<InMemoryNotificationSource>>,
}

/// Pick the notification source from the configuration and build the hub.
///
/// Must be called from within a Tokio runtime.
pub fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match config.database_url.as_deref() {
        Some(url) => build_postgres_services(config, url),
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory notification source");
            Ok(build_in_memory_services(config))
        }
    }
}

fn build_postgres_services(config: &AppConfig, database_url: &str) -> anyhow::Result<AppServices> {
    let source = PgNotificationSource::from_url(database_url)
        .context("failed to configure postgres notification source")?;
    tracing::info!(
        channels = ?config.realtime.channels,
        "using postgres LISTEN/NOTIFY source"
    );

    Ok(AppServices {
        hub: RealtimeHub::new(config.realtime.clone(), Arc::new(source)),
        in_memory: None,
    })
}

pub fn build_in_memory_services(config: &AppConfig) -> AppServices {
    let source = Arc::new(InMemoryNotificationSource::new());
    AppServices {
        hub: RealtimeHub::new(config.realtime.clone(), source.clone()),
        in_memory: Some(source),
    }
}
