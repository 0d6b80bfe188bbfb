//! Dotprompt CLI
//!
//! Main entry point for the dotprompt command-line tool.
//! Renders `.prompt` files and lists the prompts in a prompt directory.

mod commands;

use clap::{Parser, Subcommand};
use commands::{ListCommand, RenderCommand};
use dotprompt_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// Dotprompt CLI - compile and render prompt templates
#[derive(Parser, Debug)]
#[command(name = "dotprompt")]
#[command(about = "Compile and render .prompt templates", long_about = None)]
#[command(version)]
struct Cli {
    /// Prompt directory (default: ./prompts)
    #[arg(short, long, global = true, env = "DOTPROMPT_DIR")]
    dir: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "DOTPROMPT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Default model for prompts that do not name one
    #[arg(short, long, global = true, env = "DOTPROMPT_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a prompt file or a named prompt from the prompt directory
    Render(RenderCommand),

    /// List prompts (or partials) in the prompt directory
    List(ListCommand),
}

fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration; --dir and --config decide which file is read
    let config = AppConfig::load_from(cli.dir.clone(), cli.config.clone())?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.dir,
        cli.config,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("Dotprompt CLI starting");
    tracing::debug!("Prompt dir: {:?}", config.prompt_dir);
    tracing::debug!("Default model: {:?}", config.default_model);

    let command_name = match &cli.command {
        Commands::Render(_) => "render",
        Commands::List(_) => "list",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Render(cmd) => cmd.execute(&config),
        Commands::List(cmd) => cmd.execute(&config),
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
