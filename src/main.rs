//! Main entry point for the long-document translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use longdoc_translator::cli::commands::{self, Commands};
use longdoc_translator::core::config::TranslatorConfig;

/// Long-document translator - resumable chunked translation tool
#[derive(Parser, Debug)]
#[command(name = "longdoc-translator", version, about, long_about = None)]
struct Args {
    /// API key (optional, defaults to TRANSLATOR_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Configuration file (JSON or YAML) used instead of environment variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("longdoc_translator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(command) = args.command else {
        println!("Please specify a command. Use --help for more information.");
        return Ok(());
    };

    let mut config = match &args.config {
        Some(path) => TranslatorConfig::from_file(path)?,
        None => {
            // Override config with CLI args if provided
            if let Some(api_key) = &args.api_key {
                std::env::set_var("TRANSLATOR_API_KEY", api_key);
            }
            // Listing checkpoints never calls the API
            if matches!(command, Commands::Checkpoints { .. }) {
                TranslatorConfig::load_local()?
            } else {
                TranslatorConfig::load()?
            }
        }
    };
    if let Some(api_key) = args.api_key {
        config.api_key = api_key;
    }

    // Execute command
    match command {
        Commands::Translate {
            file,
            output,
            model,
            source_lang,
            target_lang,
            budget,
            prompt_file,
        } => {
            commands::handle_translate(
                config,
                file,
                output,
                model,
                source_lang,
                target_lang,
                budget,
                prompt_file,
            )
            .await?;
        }
        Commands::Resume {
            job_id,
            file,
            output,
        } => {
            commands::handle_resume(config, job_id, file, output).await?;
        }
        Commands::RetryFailed {
            job_id,
            file,
            output,
        } => {
            commands::handle_retry_failed(config, job_id, file, output).await?;
        }
        Commands::Checkpoints { clear } => {
            commands::handle_checkpoints(config, clear).await?;
        }
        Commands::Server { host, port } => {
            commands::handle_server(config, host, port).await?;
        }
    }

    Ok(())
}
