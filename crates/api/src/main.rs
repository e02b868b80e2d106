use anyhow::Context;

use storefront_api::{app, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    storefront_observability::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(variable = err.var, error = %err, "invalid configuration");
            return Err(err.into());
        }
    };

    let services = app::services::build_services(&config)?;
    let hub = services.hub.clone();
    let app = app::build_app(services.hub);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("shutdown signal received"),
                Err(err) => tracing::error!(error = %err, "failed to listen for shutdown signal"),
            }
            // Ends every open stream so the server can drain.
            hub.shutdown();
        })
        .await
        .context("server error")?;

    Ok(())
}
