//! Binary entrypoint for the Geoloc API server.
use geoloc_api::{config::AppConfig, run};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Config path from GEOLOC_CONFIG, listen address overridable with GEOLOC_ADDR
    let config = AppConfig::from_env()?;
    run(config).await
}
