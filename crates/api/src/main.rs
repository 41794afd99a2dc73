use anyhow::Context;

use modgate_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    modgate_observability::init();

    let config = ApiConfig::from_env().context("reading configuration")?;
    let app = modgate_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
