//! Turnwright CLI: the main entry point.
//!
//! Commands:
//! - `run`: Run one conversation turn, streaming events as JSON lines
//! - `providers`: List configured providers and model routes
//! - `config`: Validate or print configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod sink;
mod workspace;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant working in the user's workspace.";

#[derive(Parser)]
#[command(
    name = "turnwright",
    about = "Turnwright: provider-agnostic tool-calling engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON (stderr)
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.turnwright/config.toml)
    #[arg(short, long, global = true, env = "TURNWRIGHT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine on one user message
    Run {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Model id; falls back to `default_model`
        #[arg(long)]
        model: Option<String>,

        /// System prompt
        #[arg(short, long, default_value = DEFAULT_SYSTEM_PROMPT)]
        system: String,

        /// Workspace root the built-in file tools are confined to
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Offer no tools to the model
        #[arg(long)]
        no_tools: bool,
    },

    /// List configured providers and model routes
    Providers,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the configuration file
    Validate,
    /// Print the default configuration as TOML
    Default,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the event stream.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            message,
            model,
            system,
            workspace,
            no_tools,
        } => {
            let args = commands::run::RunArgs {
                message,
                model,
                system,
                workspace,
                no_tools,
            };
            commands::run::run(config_path, args).await?
        }
        Commands::Providers => commands::providers::run(config_path)?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Default => commands::config_cmd::print_default(),
        },
    }

    Ok(())
}
