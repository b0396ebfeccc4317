//! `palaver chat`: run one turn and print its frames as NDJSON.

use std::io::Write;

use anyhow::{Context, bail};
use palaver_agent::SessionContext;
use palaver_config::AppConfig;
use palaver_core::message::ConversationId;
use tracing::debug;

pub async fn run(message: &str, conversation: &str) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;

    let id = ConversationId::parse(conversation)?;
    debug!(conversation_id = %id, provider = %config.default_provider, "Running one turn");
    let state = palaver_gateway::build_state(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let store = state.repository.open(&id).await?;

    let ctx = SessionContext::new(store, state.backend.clone());
    let mut turn = state.orchestrator.submit(ctx, message)?;

    let mut stdout = std::io::stdout().lock();
    while let Some(frame) = turn.next().await {
        stdout.write_all(&frame.to_line())?;
        stdout.flush()?;
    }
    drop(stdout);

    let (_, outcome) = turn.collect().await?;
    if let Some(err) = outcome.error {
        bail!("turn failed: {err}");
    }
    Ok(())
}
