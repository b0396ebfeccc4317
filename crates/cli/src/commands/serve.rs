//! `palaver serve`: start the HTTP gateway.

use anyhow::Context;
use palaver_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    eprintln!("palaver gateway");
    eprintln!("  Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    eprintln!("  History:   {} ({})", config.history.backend, config.history.resolved_path().display());

    palaver_gateway::start(config).await.map_err(|e| anyhow::anyhow!(e))
}
