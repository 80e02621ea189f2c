//! Quarry CLI: the main entry point.
//!
//! Commands:
//! - `init`    Create the config directory and a default config.toml
//! - `ask`     Run one research query and print the result
//! - `config`  Show or validate the effective configuration
//! - `doctor`  Diagnose setup problems

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Quarry: an autonomous multi-step research agent",
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
    json_logs: bool,

    /// Use this config file instead of ~/.quarry/config.toml
    #[arg(long, global = true, env = "QUARRY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config directory and a default config.toml
    Init,

    /// Run one research query
    Ask {
        /// The question to research
        query: String,

        /// Conversation thread to continue
        #[arg(short, long, default_value = "default")]
        thread: String,

        /// User scope for cache, documents and history
        #[arg(short, long, default_value = "local", env = "QUARRY_USER")]
        user: String,

        /// Directory of .txt/.md documents to make retrievable for this run
        #[arg(short, long)]
        documents: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Only validate, print nothing on success
        #[arg(long)]
        check: bool,
    },

    /// Diagnose setup problems
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init => commands::init::run(config_path)?,
        Commands::Ask {
            query,
            thread,
            user,
            documents,
            json,
        } => {
            let args = commands::ask::AskArgs {
                query,
                thread,
                user,
                documents,
                json,
            };
            commands::ask::run(config_path, args).await?
        }
        Commands::Config { check } => commands::config_cmd::run(config_path, check)?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "warn" };
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
