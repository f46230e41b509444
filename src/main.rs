//! xlens - per-account X archive views
//!
//! Main entry point for the xlens command-line tool.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use tracing::debug;

use xlens::cli::{self, Cli, Commands, ConfigFormat};
use xlens::config::Backend;
use xlens::error::format_error;
use xlens::logging::init_cli_logging;
use xlens::{ArchiveService, Config, LensError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };
    if !config.output.colors {
        colored::control::set_override(false);
    }
    init_cli_logging(cli.quiet, cli.verbose, config.output.colors);
    debug!(backend = ?config.store.backend, "Effective configuration loaded");

    if let Err(e) = run(&cli, &config).await {
        exit_with(&e);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_with_file(path)?,
        None => Config::load(),
    };
    if let Some(root) = &cli.root {
        config.store.root.clone_from(root);
        if cli.base_url.is_none() {
            config.store.backend = Backend::Fs;
        }
    }
    if let Some(url) = &cli.base_url {
        config.store.base_url = Some(url.clone());
        config.store.backend = Backend::Http;
    }
    if cli.compact {
        config.output.pretty = false;
    }
    if cli.no_color {
        config.output.colors = false;
    }
    Ok(config)
}

async fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Config(args) => cmd_config(config, args),
        Commands::List => cmd_list(config).await,
        Commands::Bundle(args) => {
            let service = open_service(config)?;
            let bundle = service.bundle(&args.account).await?;
            for (producer, message) in &bundle.errors {
                eprintln!("{} {} failed: {}", "warning:".yellow().bold(), producer, message);
            }
            print_json(config, &bundle)
        }
        Commands::Summary(args)
        | Commands::Clusters(args)
        | Commands::Threads(args)
        | Commands::Embeddings(args) => {
            let producer = cli
                .command
                .producer()
                .context("command does not map to a producer")?;
            let service = open_service(config)?;
            let value = service.produce_json(producer, &args.account).await?;
            print_json(config, &value)
        }
    }
}

fn open_service(config: &Config) -> Result<ArchiveService> {
    let store = config.open_store()?;
    debug!(store = %store.describe(), "Opened store");
    Ok(ArchiveService::new(store, config))
}

async fn cmd_list(config: &Config) -> Result<()> {
    let service = open_service(config)?;
    let accounts = service.list_accounts().await?;
    if accounts.is_empty() {
        eprintln!(
            "{}",
            format!("No accounts found in {}", service.gateway().store().describe()).yellow()
        );
        return Ok(());
    }
    let mut out = io::stdout().lock();
    for account in accounts {
        writeln!(out, "{account}")?;
    }
    Ok(())
}

fn cmd_config(config: &Config, args: &cli::ConfigArgs) -> Result<()> {
    if args.init {
        print!("{}", Config::default_config_content());
        return Ok(());
    }
    match args.format {
        ConfigFormat::Toml => {
            let text = toml::to_string_pretty(config).context("serializing configuration")?;
            print!("{text}");
            Ok(())
        }
        ConfigFormat::Json => print_json(config, config),
    }
}

fn print_json<T: Serialize>(config: &Config, value: &T) -> Result<()> {
    let text = if config.output.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    writeln!(io::stdout().lock(), "{text}")?;
    Ok(())
}

fn exit_with(error: &anyhow::Error) -> ! {
    match error.downcast_ref::<LensError>() {
        Some(lens) => {
            let root = lens.root();
            let title = match root {
                LensError::AccountNotFound { .. } => "Account not found",
                LensError::Decode { .. } | LensError::Parquet(_) => "Corrupt artifact",
                LensError::Store { .. } | LensError::Http(_) => "Store unavailable",
                LensError::ConfigError { .. } => "Invalid configuration",
                _ => "Request failed",
            };
            let suggestion = lens.suggestion();
            let suggestions: Vec<&str> = suggestion.as_deref().into_iter().collect();
            eprintln!("{}", format_error(title, &root.to_string(), &suggestions));
        }
        None => eprintln!("{} {error:#}", "Error:".red().bold()),
    }
    std::process::exit(1)
}
