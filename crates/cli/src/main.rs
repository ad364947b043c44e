//! chatforge CLI: the main entry point.
//!
//! Commands:
//! - `serve`  : Start the HTTP gateway
//! - `chat`   : Run one streamed turn from the terminal
//! - `models` : List a provider's models
//! - `check`  : Check a provider's connectivity
//! - `config` : Write or print the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatforge",
    about = "chatforge: streaming multi-provider chat back-end",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Read configuration from this file instead of ~/.chatforge/config.toml
    #[arg(short, long, global = true, env = "CHATFORGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message and stream the answer to stdout
    Chat {
        /// The message to send
        message: String,

        #[arg(long)]
        provider: Option<String>,

        #[arg(short, long)]
        model: Option<String>,

        /// Ask the model to reason before answering
        #[arg(short, long)]
        reasoning: bool,

        /// Reasoning effort: a level name or a token budget
        #[arg(long, requires = "reasoning")]
        effort: Option<String>,
    },

    /// List the models a provider offers
    Models {
        provider: String,
    },

    /// Check that a provider answers
    Check {
        provider: String,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(config_path, host, port).await?,
        Commands::Chat {
            message,
            provider,
            model,
            reasoning,
            effort,
        } => {
            let options = commands::chat::ChatOptions {
                provider,
                model,
                reasoning,
                effort,
            };
            commands::chat::run(config_path, message, options).await?
        }
        Commands::Models { provider } => commands::providers::models(config_path, &provider).await?,
        Commands::Check { provider } => commands::providers::check(config_path, &provider).await?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
        },
    }

    Ok(())
}
