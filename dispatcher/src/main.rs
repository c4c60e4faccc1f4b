use anyhow::Result;
use dispatcher::AppState;
use shared::{Config, LogFormat};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    tracing::info!(
        "Starting order dispatcher {} ({}@{}, built {})",
        config.dispatcher.dispatcher_id,
        env!("GIT_BRANCH"),
        env!("GIT_HASH"),
        env!("BUILD_TIME")
    );

    let app_state = AppState::new(&config).await?;
    tracing::info!("AppState initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, finishing the current poll");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                // keep the sender alive so the loop keeps running
                std::future::pending::<()>().await;
            }
        }
    });

    let dispatcher = app_state.dispatcher.clone();
    let poller = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });
    poller.await?;

    tracing::info!("Dispatcher stopped");
    Ok(())
}
