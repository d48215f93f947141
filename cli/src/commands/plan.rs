// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Planning commands
//!
//! - `keel plan --facts FILE [--previous FILE] [--output FILE]`
//! - `keel diff OLD NEW`

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::debug;

use keel_core::application::Planner;
use keel_core::domain::facts::FactStore;
use keel_core::domain::orchestrator_config::OrchestratorConfigManifest;
use keel_core::domain::plan::{diff as plan_diff, Plan, PlanChange};

use super::catalog::load_catalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

pub async fn plan(
    config_override: Option<PathBuf>,
    facts_path: PathBuf,
    previous_path: Option<PathBuf>,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let catalog = load_catalog(&config.spec.catalog)?;

    let content = std::fs::read_to_string(&facts_path)
        .with_context(|| format!("Failed to read {:?}", facts_path))?;
    let facts = FactStore::from_yaml_str(&content)
        .with_context(|| format!("Invalid analysis document {:?}", facts_path))?;

    let previous = previous_path.as_deref().map(load_plan).transpose()?;
    let plan = Planner::new(&catalog)
        .plan(&facts, previous.as_ref())
        .context("Planning failed")?;
    debug!(fingerprint = %plan.fingerprint(), "Plan produced");

    let rendered = render(&plan, format)?;
    match output {
        Some(path) => {
            std::fs::write(&path, rendered).with_context(|| format!("Failed to write plan to {:?}", path))?;
            print_summary(&plan);
            if let Some(previous) = &previous {
                println!();
                print_changes(&plan_diff(previous, &plan));
            }
            println!();
            println!("{}", format!("✓ Plan written: {}", path.display()).green());
        }
        None => print!("{}", rendered),
    }

    Ok(())
}

pub async fn diff(old: PathBuf, new: PathBuf) -> Result<()> {
    let before = load_plan(&old)?;
    let after = load_plan(&new)?;

    if before.application() != after.application() {
        anyhow::bail!(
            "Plans belong to different applications ('{}' and '{}')",
            before.application(),
            after.application()
        );
    }

    println!(
        "{} {} {} {}",
        before.application().to_string().bold(),
        before.version(),
        "→".dimmed(),
        after.version()
    );
    print_changes(&plan_diff(&before, &after));
    Ok(())
}

/// Read a plan written by `keel plan`; YAML and JSON are both accepted
pub fn load_plan(path: &Path) -> Result<Plan> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Invalid plan file {:?}", path))
}

pub fn render(plan: &Plan, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(plan)?,
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(plan)?;
            json.push('\n');
            json
        }
    })
}

fn print_summary(plan: &Plan) {
    println!(
        "{} {} ({})",
        plan.application().to_string().bold(),
        plan.version(),
        &plan.fingerprint()[..12]
    );

    println!("{}", "Components:".bold());
    for component in plan.components() {
        if component.depends_on.is_empty() {
            println!("  {} ({})", component.name(), component.capability());
        } else {
            println!(
                "  {} ({}) {} {}",
                component.name(),
                component.capability(),
                "after".dimmed(),
                component.depends_on.join(", ")
            );
        }
    }

    if !plan.objectives().is_empty() {
        println!("{}", "Objectives:".bold());
        for objective in plan.objectives() {
            println!(
                "  {} {} over {:?}",
                objective.name,
                objective.query.expression.dimmed(),
                objective.window
            );
        }
    }

    if !plan.policies().is_empty() {
        let rules: Vec<&str> = plan.policies().iter().map(String::as_str).collect();
        println!("{} {}", "Policies:".bold(), rules.join(", "));
    }

    for note in plan.notes() {
        println!("{} {}", "note:".yellow(), note);
    }
}

fn print_changes(changes: &[PlanChange]) {
    if changes.is_empty() {
        println!("{}", "No changes".dimmed());
        return;
    }
    for change in changes {
        let line = change.to_string();
        match change {
            PlanChange::Added { .. } => println!("{}", line.green()),
            PlanChange::Removed { .. } => println!("{}", line.red()),
            PlanChange::Reconfigured { .. } => println!("{}", line.yellow()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::facts::{ingest_facts, ContainerFacts, RawAnalysis};
    use keel_core::infrastructure::builtin_catalog::builtin_catalog;

    fn sample_plan() -> Plan {
        let facts = ingest_facts(RawAnalysis {
            application: "checkout".to_string(),
            container: ContainerFacts {
                exposed_ports: vec![8080],
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        Planner::new(&builtin_catalog().unwrap()).plan(&facts, None).unwrap()
    }

    #[test]
    fn test_written_plan_loads_back_in_both_formats() {
        let plan = sample_plan();
        let dir = tempfile::tempdir().unwrap();

        for (format, name) in [(OutputFormat::Yaml, "plan.yaml"), (OutputFormat::Json, "plan.json")] {
            let path = dir.path().join(name);
            std::fs::write(&path, render(&plan, format).unwrap()).unwrap();
            let loaded = load_plan(&path).unwrap();
            assert_eq!(loaded.fingerprint(), plan.fingerprint());
            assert_eq!(loaded.version(), plan.version());
        }
    }

    #[tokio::test]
    async fn test_diff_refuses_different_applications() {
        let plan = sample_plan();
        let other = {
            let facts = ingest_facts(RawAnalysis {
                application: "billing".to_string(),
                ..Default::default()
            })
            .unwrap();
            Planner::new(&builtin_catalog().unwrap()).plan(&facts, None).unwrap()
        };

        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        std::fs::write(&a, render(&plan, OutputFormat::Yaml).unwrap()).unwrap();
        std::fs::write(&b, render(&other, OutputFormat::Yaml).unwrap()).unwrap();

        assert!(diff(a, b).await.is_err());
    }
}
