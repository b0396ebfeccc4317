//! palaver CLI: the main entry point.
//!
//! Commands:
//! - `init`     write a default config file
//! - `serve`    start the HTTP gateway
//! - `chat`     run a single turn and print its frames
//! - `history`  print a conversation as the client sees it

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "palaver",
    about = "palaver: streaming conversational session engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write ~/.palaver/config.toml with defaults
    Init,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one prompt and stream the reply as NDJSON
    Chat {
        /// The prompt to send
        #[arg(short, long)]
        message: String,

        /// Conversation to continue
        #[arg(short, long, default_value = palaver_core::message::DEFAULT_CONVERSATION)]
        conversation: String,
    },

    /// Print a conversation's history
    History {
        #[arg(short, long, default_value = palaver_core::message::DEFAULT_CONVERSATION)]
        conversation: String,

        /// Fail on records with no client-facing form instead of skipping them
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so stdout stays NDJSON
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run()?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            message,
            conversation,
        } => commands::chat::run(&message, &conversation).await?,
        Commands::History {
            conversation,
            strict,
        } => commands::history::run(&conversation, strict).await?,
    }

    Ok(())
}
