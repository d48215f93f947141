// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use keel_core::domain::orchestrator_config::{OrchestratorConfigManifest, StorageKind};

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const ANNOTATED_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./keel-config.yaml)
        #[arg(short, long, default_value = "./keel-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. KEEL_CONFIG_PATH: {}",
            std::env::var("KEEL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./keel-config.yaml");
        println!("  4. ~/.keel/config.yaml");
        println!("  5. /etc/keel/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{} {}", "Orchestrator:".bold(), config.metadata.name);
    println!();

    println!("{}", "Approval:".bold());
    println!("  Timeout: {:?}", spec.approval.timeout);
    println!();

    println!("{}", "Retry:".bold());
    println!("  Max attempts: {}", spec.retry.max_attempts);
    println!(
        "  Backoff: {:?} doubling up to {:?}",
        spec.retry.initial_backoff, spec.retry.max_backoff
    );
    println!("  Call timeout: {:?}", spec.retry.call_timeout);
    println!();

    println!("{}", "Rollout:".bold());
    println!("  Apply concurrency: {}", spec.rollout.apply_concurrency);
    println!("  Inconclusive verdict: {:?}", spec.rollout.inconclusive);
    println!("  Readiness timeout: {:?}", spec.rollout.readiness_timeout);
    println!("  Health poll interval: {:?}", spec.rollout.health_poll_interval);
    println!(
        "  Default observation window: {:?}",
        spec.rollout.default_observation_window
    );
    println!();

    println!("{}", "SLO Guard:".bold());
    println!("  Sample interval: {:?}", spec.guard.sample_interval);
    println!("  Minimum samples: {}", spec.guard.min_samples);
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageKind::InMemory => println!("  Backend: in-memory"),
        StorageKind::Postgres => {
            println!("  Backend: postgres");
            if let Some(conn) = spec.storage.connection_string.as_deref() {
                // only env indirections are safe to echo
                if conn.starts_with("env:") {
                    println!("  Connection: {}", conn);
                } else {
                    println!("  Connection: {}", "(inline)".dimmed());
                }
            }
        }
    }
    println!();

    println!("{}", "Catalog:".bold());
    println!("  Built-in templates: {}", spec.catalog.include_builtin);
    for file in &spec.catalog.template_files {
        println!("  - {}", file.display());
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        ANNOTATED_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_template_is_valid() {
        let config = OrchestratorConfigManifest::from_yaml_str(MINIMAL_TEMPLATE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.spec.storage.backend, StorageKind::InMemory);
    }

    #[test]
    fn test_annotated_template_parses() {
        let config = OrchestratorConfigManifest::from_yaml_str(ANNOTATED_TEMPLATE).unwrap();
        assert_eq!(config.spec.storage.backend, StorageKind::Postgres);
        assert_eq!(config.spec.catalog.template_files.len(), 1);
        assert!(config.validate().is_ok());
    }
}
