// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Keel CLI
//!
//! The `keel` binary drives the planning half of the orchestrator offline:
//! it loads the configured component catalog, turns an analysis document
//! into a deployment plan and compares stored plans.
//!
//! ## Commands
//!
//! - `keel config show|validate|generate` - Configuration management
//! - `keel catalog list|validate` - Inspect the component catalog
//! - `keel plan --facts FILE` - Produce a deployment plan
//! - `keel diff OLD NEW` - Structural diff of two plan files

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use keel_cli::commands::{self, CatalogCommand, ConfigCommand, OutputFormat};

/// Keel - Plan and progressively roll out platform components
#[derive(Parser)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "KEEL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "KEEL_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Component catalog inspection
    #[command(name = "catalog")]
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },

    /// Produce a deployment plan from an analysis document
    #[command(name = "plan")]
    Plan {
        /// Analysis document (YAML or JSON)
        #[arg(long, short = 'f', value_name = "FILE")]
        facts: PathBuf,

        /// Previously produced plan; versions and objectives continue from it
        #[arg(long, value_name = "FILE")]
        previous: Option<PathBuf>,

        /// Write the plan to a file instead of stdout
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Show the structural difference between two plan files
    #[command(name = "diff")]
    Diff {
        #[arg(value_name = "OLD")]
        old: PathBuf,

        #[arg(value_name = "NEW")]
        new: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Catalog { command }) => commands::catalog::handle_command(command, cli.config).await,
        Some(Commands::Plan {
            facts,
            previous,
            output,
            format,
        }) => commands::plan::plan(cli.config, facts, previous, output, format).await,
        Some(Commands::Diff { old, new }) => commands::plan::diff(old, new).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
