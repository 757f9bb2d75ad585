use anyhow::Context;
use santa_backend::config::Config;
use santa_backend::{app, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("santa_backend=info,santa_core=info,warn")),
        )
        .with_target(true)
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    let state = AppState::from_config(&config).await;
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, persist = ?config.persist_path, "starting server");
    axum::serve(listener, app(state))
        .await
        .context("server error")?;
    Ok(())
}
