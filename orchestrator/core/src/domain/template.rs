// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Template Behavior
//!
//! Per-component behavior is a closed set of tagged variants rather than open
//! trait objects: each variant answers `applicable(facts)` and
//! `parameterize(facts)` as pure functions. The planner only ever calls those
//! two methods and never special-cases a component.
//!
//! `Custom` carries a data-driven [`FactPredicate`] and a static
//! [`ConfigFragment`], which is how templates loaded from YAML participate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::capability::CapabilityTag;
use crate::domain::facts::{ArtifactKind, ComplianceProfile, FactStore};

/// Typed configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<ConfigValue>),
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

impl ConfigValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(v) => Some(*v as f64),
            ConfigValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// Resolved configuration of one selected component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigFragment(BTreeMap<String, ConfigValue>);

impl ConfigFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }

    /// Structural checks on well-known keys
    ///
    /// - `*replicas`: non-negative integers, `min_replicas <= max_replicas`
    /// - `*_percent`: numeric in `[0, 100]`
    /// - `port` / `*_port`: integer in `[1, 65535]`
    /// - floats must be finite
    pub fn validate(&self) -> Result<(), String> {
        for (key, value) in &self.0 {
            if let ConfigValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(format!("'{}' is not a finite number", key));
                }
            }

            if key.ends_with("replicas") {
                match value {
                    ConfigValue::Integer(v) if *v >= 0 => {}
                    ConfigValue::Integer(v) => {
                        return Err(format!("'{}' must be non-negative, got {}", key, v))
                    }
                    _ => return Err(format!("'{}' must be an integer", key)),
                }
            }

            if key.ends_with("_percent") {
                match value.as_number() {
                    Some(v) if (0.0..=100.0).contains(&v) => {}
                    Some(v) => return Err(format!("'{}' must be within 0-100, got {}", key, v)),
                    None => return Err(format!("'{}' must be numeric", key)),
                }
            }

            if key == "port" || key.ends_with("_port") {
                match value {
                    ConfigValue::Integer(v) if (1..=65535).contains(v) => {}
                    _ => return Err(format!("'{}' must be a port number within 1-65535", key)),
                }
            }
        }

        if let (Some(ConfigValue::Integer(min)), Some(ConfigValue::Integer(max))) =
            (self.0.get("min_replicas"), self.0.get("max_replicas"))
        {
            if min > max {
                return Err(format!(
                    "min_replicas ({}) exceeds max_replicas ({})",
                    min, max
                ));
            }
        }

        Ok(())
    }
}

/// Data-driven applicability predicate over the fact store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FactPredicate {
    Always,
    Never,
    CapabilityRequested(CapabilityTag),
    DependencyDetected(String),
    PortExposed,
    HealthEndpointDeclared,
    ArtifactPresent(ArtifactKind),
    ComplianceIs(ComplianceProfile),
    StrictCompliance,
    BaseImageFamily(String),
    All(Vec<FactPredicate>),
    Any(Vec<FactPredicate>),
    Not(Box<FactPredicate>),
}

impl FactPredicate {
    pub fn evaluate(&self, facts: &FactStore) -> bool {
        match self {
            FactPredicate::Always => true,
            FactPredicate::Never => false,
            FactPredicate::CapabilityRequested(tag) => facts.requests(tag),
            FactPredicate::DependencyDetected(name) => facts.has_dependency(name),
            FactPredicate::PortExposed => !facts.container().exposed_ports.is_empty(),
            FactPredicate::HealthEndpointDeclared => facts.container().health_endpoint.is_some(),
            FactPredicate::ArtifactPresent(kind) => facts.artifacts().get(*kind).is_some(),
            FactPredicate::ComplianceIs(profile) => facts.compliance() == *profile,
            FactPredicate::StrictCompliance => facts.compliance().is_strict(),
            FactPredicate::BaseImageFamily(family) => facts
                .container()
                .base_image_family
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case(family)),
            FactPredicate::All(predicates) => predicates.iter().all(|p| p.evaluate(facts)),
            FactPredicate::Any(predicates) => predicates.iter().any(|p| p.evaluate(facts)),
            FactPredicate::Not(predicate) => !predicate.evaluate(facts),
        }
    }
}

/// Closed set of component behaviors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateBehavior {
    Ingress { class: String },
    ServiceMesh { flavor: String },
    Observability { stack: String },
    Database {
        engine: String,
        default_port: u16,
        /// Dependency names that identify this engine in container facts
        markers: Vec<String>,
    },
    Secrets { provider: String },
    PolicyEngine { engine: String },
    Autoscaler,
    ProgressiveDelivery { controller: String },
    Chaos { tool: String },
    Backup { tool: String },
    Identity { provider: String },
    CostMonitor { tool: String },
    CiCd { system: String },
    Custom {
        when: FactPredicate,
        #[serde(default)]
        config: ConfigFragment,
    },
}

impl TemplateBehavior {
    /// Capability this behavior implements; `None` for custom behavior
    pub fn capability(&self) -> Option<CapabilityTag> {
        match self {
            TemplateBehavior::Ingress { .. } => Some(CapabilityTag::Ingress),
            TemplateBehavior::ServiceMesh { .. } => Some(CapabilityTag::Mesh),
            TemplateBehavior::Observability { .. } => Some(CapabilityTag::Observability),
            TemplateBehavior::Database { .. } => Some(CapabilityTag::Database),
            TemplateBehavior::Secrets { .. } => Some(CapabilityTag::Secrets),
            TemplateBehavior::PolicyEngine { .. } => Some(CapabilityTag::Policy),
            TemplateBehavior::Autoscaler => Some(CapabilityTag::Autoscaling),
            TemplateBehavior::ProgressiveDelivery { .. } => Some(CapabilityTag::Delivery),
            TemplateBehavior::Chaos { .. } => Some(CapabilityTag::Chaos),
            TemplateBehavior::Backup { .. } => Some(CapabilityTag::Backup),
            TemplateBehavior::Identity { .. } => Some(CapabilityTag::Identity),
            TemplateBehavior::CostMonitor { .. } => Some(CapabilityTag::Cost),
            TemplateBehavior::CiCd { .. } => Some(CapabilityTag::CiCd),
            TemplateBehavior::Custom { .. } => None,
        }
    }

    pub fn applicable(&self, facts: &FactStore) -> bool {
        let requested = |tag: CapabilityTag| facts.requests(&tag);
        match self {
            TemplateBehavior::Ingress { .. } => {
                requested(CapabilityTag::Ingress) || !facts.container().exposed_ports.is_empty()
            }
            TemplateBehavior::ServiceMesh { .. } => {
                requested(CapabilityTag::Mesh) || facts.compliance().is_strict()
            }
            // SLO evaluation depends on a metrics pipeline, so every plan gets one
            TemplateBehavior::Observability { .. } => true,
            TemplateBehavior::Database { markers, .. } => {
                markers.iter().any(|m| facts.has_dependency(m)) || requested(CapabilityTag::Database)
            }
            TemplateBehavior::Secrets { .. } => {
                requested(CapabilityTag::Secrets)
                    || facts.artifacts().get(ArtifactKind::SecretsCatalogue).is_some()
                    || facts.compliance().is_strict()
            }
            TemplateBehavior::PolicyEngine { .. } => {
                requested(CapabilityTag::Policy) || facts.compliance() != ComplianceProfile::Standard
            }
            TemplateBehavior::Autoscaler => {
                requested(CapabilityTag::Autoscaling)
                    || matches!(
                        (facts.resources().min_replicas, facts.resources().max_replicas),
                        (Some(min), Some(max)) if max > min
                    )
            }
            TemplateBehavior::ProgressiveDelivery { .. } => requested(CapabilityTag::Delivery),
            TemplateBehavior::Chaos { .. } => {
                requested(CapabilityTag::Chaos) && !facts.compliance().is_strict()
            }
            TemplateBehavior::Backup { .. } => {
                requested(CapabilityTag::Backup)
                    || matches!(
                        facts.compliance(),
                        ComplianceProfile::Hipaa | ComplianceProfile::PciDss
                    )
            }
            TemplateBehavior::Identity { .. } => requested(CapabilityTag::Identity),
            TemplateBehavior::CostMonitor { .. } => requested(CapabilityTag::Cost),
            TemplateBehavior::CiCd { .. } => requested(CapabilityTag::CiCd),
            TemplateBehavior::Custom { when, .. } => when.evaluate(facts),
        }
    }

    pub fn parameterize(&self, facts: &FactStore) -> ConfigFragment {
        let strict = facts.compliance().is_strict();
        let hints = facts.resources();
        match self {
            TemplateBehavior::Ingress { class } => {
                let port = facts.container().exposed_ports.first().copied().unwrap_or(8080);
                let health_path = facts
                    .container()
                    .health_endpoint
                    .clone()
                    .unwrap_or_else(|| "/".to_string());
                ConfigFragment::new()
                    .with("class", class.as_str())
                    .with("port", i64::from(port))
                    .with("tls", strict || facts.compliance() == ComplianceProfile::Soc2)
                    .with("health_path", health_path)
            }
            TemplateBehavior::ServiceMesh { flavor } => ConfigFragment::new()
                .with("flavor", flavor.as_str())
                .with("mtls_mode", if strict { "STRICT" } else { "PERMISSIVE" })
                .with("sidecar_cpu_millis", 100_i64),
            TemplateBehavior::Observability { stack } => ConfigFragment::new()
                .with("stack", stack.as_str())
                .with("scrape_interval_seconds", 15_i64)
                .with("retention_days", if strict { 365_i64 } else { 15 }),
            TemplateBehavior::Database {
                engine,
                default_port,
                ..
            } => ConfigFragment::new()
                .with("engine", engine.as_str())
                .with("port", i64::from(*default_port))
                .with("storage_gib", hints.storage_gib.unwrap_or(10))
                .with("replicas", if strict { 3_i64 } else { 1 })
                .with("encrypt_at_rest", strict),
            TemplateBehavior::Secrets { provider } => ConfigFragment::new()
                .with("provider", provider.as_str())
                .with(
                    "catalogue",
                    facts
                        .artifacts()
                        .get(ArtifactKind::SecretsCatalogue)
                        .unwrap_or("generated")
                        .to_string(),
                )
                .with("rotation_days", if strict { 30_i64 } else { 90 }),
            TemplateBehavior::PolicyEngine { engine } => ConfigFragment::new()
                .with("engine", engine.as_str())
                .with("enforcement", if strict { "deny" } else { "audit" }),
            TemplateBehavior::Autoscaler => {
                let min = hints.min_replicas.unwrap_or(1);
                let max = hints
                    .max_replicas
                    .unwrap_or_else(|| min.max(1).saturating_mul(3));
                ConfigFragment::new()
                    .with("min_replicas", min)
                    .with("max_replicas", max)
                    .with("target_cpu_percent", 70_i64)
            }
            TemplateBehavior::ProgressiveDelivery { controller } => ConfigFragment::new()
                .with("controller", controller.as_str())
                .with(
                    "canary_steps",
                    ConfigValue::List(vec![10_i64.into(), 25_i64.into(), 50_i64.into(), 100_i64.into()]),
                )
                .with("initial_weight_percent", 10_i64),
            TemplateBehavior::Chaos { tool } => ConfigFragment::new()
                .with("tool", tool.as_str())
                .with("experiments_enabled", false),
            TemplateBehavior::Backup { tool } => ConfigFragment::new()
                .with("tool", tool.as_str())
                .with("schedule", "0 2 * * *")
                .with("retention_days", if strict { 2555_i64 } else { 30 }),
            TemplateBehavior::Identity { provider } => ConfigFragment::new()
                .with("provider", provider.as_str())
                .with("oidc", true),
            TemplateBehavior::CostMonitor { tool } => ConfigFragment::new()
                .with("tool", tool.as_str())
                .with("allocation_labels", ConfigValue::List(vec!["app".into(), "team".into()])),
            TemplateBehavior::CiCd { system } => ConfigFragment::new()
                .with("system", system.as_str())
                .with("sync_policy", if strict { "manual" } else { "automated" }),
            TemplateBehavior::Custom { config, .. } => config.clone(),
        }
    }
}
