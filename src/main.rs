use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use graph_recommender::{
    api::{create_router, AppState},
    bootstrap,
    config::Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let state = AppState::new(config.graph_export_path.clone());

    // Serve immediately; endpoints report 503 until initialisation completes
    let init = tokio::spawn(bootstrap::initialize(state.clone(), config.clone()));

    let app = create_router(state);
    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if init.is_finished() {
        match init.await {
            Ok(handles) => handles.shutdown().await,
            Err(e) => tracing::error!(error = %e, "Initialisation task panicked"),
        }
    } else {
        init.abort();
        tracing::warn!("Shutting down before initialisation completed");
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
