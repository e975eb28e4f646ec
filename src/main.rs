use std::sync::Arc;

use stream_gateway::config::GatewayConfig;
use stream_gateway::controller::GenerationController;
use stream_gateway::factory::BackendFactory;
use stream_gateway::registry::catalog::builtin_models;
use stream_gateway::resilience::ResilientClient;
use stream_gateway::server::{router, AppState};
use stream_gateway::tools::builtin_tools;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "SIGTERM handler unavailable; waiting for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = GatewayConfig::from_env()?;
    let client = ResilientClient::new(&config.pool, config.retry_policy())?;
    let registry = BackendFactory::from_config(&config, client.clone()).build_registry(builtin_models())?;
    let tools = builtin_tools(client)?;

    let bind = config.bind;
    let controller = GenerationController::new(Arc::new(registry));
    let app = router(AppState::new(controller, tools, config));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "stream-gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;
    tracing::info!("stream-gateway stopped");
    Ok(())
}
