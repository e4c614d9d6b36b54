use std::sync::Arc;

use runner_dispatch::api;
use runner_dispatch::config::Config;
use runner_dispatch::engine;
use runner_dispatch::error::AppError;
use runner_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let (app_state, channels) = AppState::from_config(&config);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::dispatch::run_dispatch_engine(
        shared_state.clone(),
        channels.order_rx,
    ));
    tokio::spawn(engine::queue::run_queue_drainer(shared_state.clone()));
    tokio::spawn(engine::notify::run_notification_relay(channels.outbound_rx));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        radius_miles = config.dispatch.search_radius_miles,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
