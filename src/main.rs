mod cli;
mod config;
mod graph;
mod llm_client;

use std::io;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::cli::chat::tutor::ItemDecodePolicy;
use crate::config::TutorConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a tutoring session
    Chat(ChatArgs),
}

#[derive(Args, Clone, Default)]
struct ChatArgs {
    /// Send a single message and exit
    #[arg(short, long)]
    input: Option<String>,

    /// Print each response as JSON
    #[arg(long)]
    json: bool,

    /// Maximum number of workflow steps per message
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    step_limit: Option<u64>,

    /// What to do when a finalized practice problem cannot be decoded
    #[arg(long, value_enum)]
    on_item_decode_failure: Option<ItemDecodePolicy>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();
    let args = match cli.command {
        Some(Commands::Chat(args)) => args,
        None => cli.chat,
    };

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Starting Tutor Chat CLI");

    let mut config = TutorConfig::from_env()?;
    if let Some(step_limit) = args.step_limit {
        config.step_limit = usize::try_from(step_limit).unwrap_or(usize::MAX);
    }
    if let Some(policy) = args.on_item_decode_failure {
        config.item_policy = policy;
    }

    let interactive = args.input.is_none();
    let mut chat_context = ChatContext::new(
        Box::new(io::stdout()),
        args.input,
        interactive,
        args.json,
        config,
    );
    chat_context.run().await
}
