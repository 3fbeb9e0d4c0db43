use std::sync::Arc;

use progress_hub::config::Settings;
use progress_hub::{AppState, EventBus, ProgressAggregator, Result, api};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting progress hub");

    let settings = Settings::new().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let bus = Arc::new(EventBus::new());
    let aggregator = ProgressAggregator::register(&bus, settings.aggregator.clone())?;
    info!(pattern = %settings.aggregator.pattern, "aggregator subscribed");

    let reaper = aggregator.spawn_reaper();

    let app = api::router(AppState::new(bus.clone(), aggregator.clone()));

    let addr = settings.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Starting server on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    info!(running = aggregator.len(), "progress hub stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
