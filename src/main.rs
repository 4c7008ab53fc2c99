//! agent-dispatch command line
//!
//! Validates a dispatch configuration or sends one message through a
//! dispatcher built from it.

use agent_dispatch::config::DispatchConfig;
use agent_dispatch::dispatcher::{Dispatcher, ProcessOptions};
use agent_dispatch::observability::{init_default_logging, init_logging, LogFormat};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};

/// Route messages to agents and follow their handoffs
#[derive(Parser)]
#[command(name = "agent-dispatch")]
#[command(about = "Message routing and agent handoff engine")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "dispatch.toml", env = "DISPATCH_CONFIG")]
    config: PathBuf,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Send one message and print the outcome
    Send {
        message: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation_id: Option<String>,

        /// Print stream events as JSON lines
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, log_format(), false),
        _ => init_logging(Level::TRACE, log_format(), true),
    }

    info!(config = %cli.config.display(), "Loading configuration");
    let config = match DispatchConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Send {
            message,
            conversation_id,
            stream,
        } => handle_send_command(&config, &message, conversation_id, stream).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn log_format() -> LogFormat {
    LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()))
}

fn handle_config_command(
    config: &DispatchConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(
        agents = config.agents.len(),
        intents = config.intents.len(),
        rules = config.rules.as_ref().map(|r| r.rules.len()).unwrap_or(0),
        "Configuration validation complete"
    );
    Ok(())
}

async fn handle_send_command(
    config: &DispatchConfig,
    message: &str,
    conversation_id: Option<String>,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Dispatcher::from_config(config)?;

    let mut options = ProcessOptions::default();
    if let Some(conversation_id) = conversation_id {
        options = options.with_conversation_id(conversation_id);
    }

    if stream {
        let mut events = dispatcher.process_stream(message, options).await?;
        while let Some(event) = events.next().await {
            println!("{}", serde_json::to_string(&event?)?);
        }
    } else {
        let outcome = dispatcher.process(message, options).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    Ok(())
}
