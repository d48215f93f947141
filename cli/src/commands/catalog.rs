// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Component catalog commands
//!
//! - `keel catalog list [--capability TAG]` - Templates in registration order
//! - `keel catalog validate FILE` - Parse a template file and check it registers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use keel_core::domain::capability::CapabilityTag;
use keel_core::domain::catalog::{ComponentCatalog, ComponentTemplate};
use keel_core::domain::orchestrator_config::{CatalogSources, OrchestratorConfigManifest};
use keel_core::infrastructure::CatalogLoader;

#[derive(Subcommand)]
pub enum CatalogCommand {
    /// List registered templates
    List {
        /// Only templates implementing this capability
        #[arg(long, value_name = "TAG")]
        capability: Option<CapabilityTag>,
    },

    /// Validate a template file against the configured catalog
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

pub async fn handle_command(command: CatalogCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;

    match command {
        CatalogCommand::List { capability } => list(&config.spec.catalog, capability),
        CatalogCommand::Validate { file } => validate(&config.spec.catalog, file),
    }
}

/// Catalog described by the configuration
pub fn load_catalog(sources: &CatalogSources) -> Result<ComponentCatalog> {
    CatalogLoader::build(sources).context("Failed to build component catalog")
}

fn list(sources: &CatalogSources, capability: Option<CapabilityTag>) -> Result<()> {
    let catalog = load_catalog(sources)?;

    let templates: Vec<&ComponentTemplate> = catalog
        .iter()
        .map(|t| t.as_ref())
        .filter(|t| capability.as_ref().map_or(true, |c| &t.capability == c))
        .collect();

    if templates.is_empty() {
        println!("{}", "No templates found".yellow());
        return Ok(());
    }

    println!(
        "{:<20} {:<24} {:<36} {}",
        "NAME".bold(),
        "CAPABILITY".bold(),
        "REQUIRES".bold(),
        "CONFLICTS".bold()
    );
    for template in templates {
        println!("{}", format_row(template));
        if let Some(description) = &template.description {
            println!("  {}", description.dimmed());
        }
    }

    Ok(())
}

fn format_row(template: &ComponentTemplate) -> String {
    let requires: Vec<String> = template.requires.iter().map(|r| r.to_string()).collect();
    let conflicts: Vec<&str> = template.conflicts_with.iter().map(String::as_str).collect();
    format!(
        "{:<20} {:<24} {:<36} {}",
        template.name,
        template.capability.to_string(),
        if requires.is_empty() { "-".to_string() } else { requires.join(", ") },
        if conflicts.is_empty() { "-".to_string() } else { conflicts.join(", ") },
    )
}

fn validate(sources: &CatalogSources, file: PathBuf) -> Result<()> {
    println!("Validating {}...", file.display());

    let mut with_file = sources.clone();
    if !with_file.template_files.contains(&file) {
        with_file.template_files.push(file.clone());
    }
    let templates = CatalogLoader::parse_file(&file)?;
    let catalog = load_catalog(&with_file)?;

    println!(
        "{}",
        format!(
            "✓ {} template(s) valid ({} in catalog)",
            templates.len(),
            catalog.len()
        )
        .green()
    );
    Ok(())
}
