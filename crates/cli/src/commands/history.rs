//! `palaver history`: print a conversation's Wire Messages.

use anyhow::Context;
use palaver_agent::StreamOrchestrator;
use palaver_config::AppConfig;
use palaver_core::message::ConversationId;
use palaver_core::wire::{Projection, to_ndjson};
use tracing::debug;

pub async fn run(conversation: &str, strict: bool) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let id = ConversationId::parse(conversation)?;

    let repository = palaver_history::open_repository(&config.history).await?;
    let store = repository.open(&id).await?;

    let policy = if strict { Projection::Strict } else { Projection::Lenient };
    debug!(conversation_id = %id, backend = repository.name(), ?policy, "Listing history");
    let messages = StreamOrchestrator::default().list(store.as_ref(), policy).await?;

    if messages.is_empty() {
        eprintln!("No messages in conversation '{id}'");
    } else {
        println!("{}", to_ndjson(&messages));
    }
    Ok(())
}
