// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Fact Store
//!
//! Immutable snapshot of everything known about one deployment request. The
//! analysis collaborator hands over a [`RawAnalysis`]; [`ingest_facts`]
//! validates and normalizes it into a [`FactStore`], which the planner only
//! ever reads.
//!
//! Functional requirements are carried verbatim. They are the analysis
//! collaborator's input and are never reinterpreted here.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::domain::capability::{is_slug, CapabilityTag};
use crate::domain::slo::ServiceLevelObjective;

/// Application identity (DNS label format)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn new(name: impl Into<String>) -> Result<Self, FactError> {
        let name = name.into();
        if !is_slug(&name) {
            return Err(FactError::InvalidApplicationId(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ApplicationId {
    type Error = FactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApplicationId> for String {
    fn from(id: ApplicationId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceProfile {
    #[default]
    Standard,
    PciDss,
    Hipaa,
    Soc2,
    Fedramp,
}

impl ComplianceProfile {
    /// Profiles that demand encrypted service-to-service traffic and enforced policy
    pub fn is_strict(&self) -> bool {
        matches!(
            self,
            ComplianceProfile::PciDss | ComplianceProfile::Hipaa | ComplianceProfile::Fedramp
        )
    }

    /// Policy rules activated by this profile
    pub fn policy_rules(&self) -> &'static [&'static str] {
        match self {
            ComplianceProfile::Standard => &["baseline-pod-security"],
            ComplianceProfile::Soc2 => &["baseline-pod-security", "audit-logging", "change-approval"],
            ComplianceProfile::PciDss => &[
                "restricted-pod-security",
                "audit-logging",
                "encrypt-in-transit",
                "network-segmentation",
                "change-approval",
            ],
            ComplianceProfile::Hipaa => &[
                "restricted-pod-security",
                "audit-logging",
                "encrypt-in-transit",
                "encrypt-at-rest",
                "change-approval",
            ],
            ComplianceProfile::Fedramp => &[
                "restricted-pod-security",
                "audit-logging",
                "encrypt-in-transit",
                "encrypt-at-rest",
                "fips-crypto",
                "change-approval",
            ],
        }
    }
}

impl fmt::Display for ComplianceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComplianceProfile::Standard => "standard",
            ComplianceProfile::PciDss => "pci-dss",
            ComplianceProfile::Hipaa => "hipaa",
            ComplianceProfile::Soc2 => "soc2",
            ComplianceProfile::Fedramp => "fedramp",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    ApiSpec,
    Schema,
    SloSpec,
    EventContract,
    SecretsCatalogue,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::ApiSpec,
        ArtifactKind::Schema,
        ArtifactKind::SloSpec,
        ArtifactKind::EventContract,
        ArtifactKind::SecretsCatalogue,
    ];
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtifactKind::ApiSpec => "api-spec",
            ArtifactKind::Schema => "schema",
            ArtifactKind::SloSpec => "slo-spec",
            ArtifactKind::EventContract => "event-contract",
            ArtifactKind::SecretsCatalogue => "secrets-catalogue",
        };
        f.write_str(label)
    }
}

/// References to artifacts provided alongside the request. Each is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slo_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_contract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_catalogue: Option<String>,
}

impl ArtifactRefs {
    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::ApiSpec => self.api_spec.as_deref(),
            ArtifactKind::Schema => self.schema.as_deref(),
            ArtifactKind::SloSpec => self.slo_spec.as_deref(),
            ArtifactKind::EventContract => self.event_contract.as_deref(),
            ArtifactKind::SecretsCatalogue => self.secrets_catalogue.as_deref(),
        }
    }

    pub fn missing(&self) -> Vec<ArtifactKind> {
        ArtifactKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFacts {
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image_family: Option<String>,
    #[serde(default)]
    pub detected_dependencies: BTreeSet<String>,
}

/// Numeric resource hints. Signed on purpose: the analysis step may emit
/// nonsense, and rejecting it is the parameterizer's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mib: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_gib: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_rps: Option<i64>,
}

/// Structured output of the analysis collaborator, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAnalysis {
    pub application: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub container: ContainerFacts,
    #[serde(default)]
    pub resources: ResourceHints,
    #[serde(default)]
    pub compliance: ComplianceProfile,
    #[serde(default)]
    pub artifacts: ArtifactRefs,
    #[serde(default)]
    pub requested_capabilities: Vec<CapabilityTag>,
    /// Explicit template choice per capability (e.g. database engine)
    #[serde(default)]
    pub pinned_templates: BTreeMap<CapabilityTag, String>,
    #[serde(default)]
    pub objectives: Vec<ServiceLevelObjective>,
    /// Objectives of the previous plan that the new plan intentionally drops
    #[serde(default)]
    pub retired_objectives: Vec<String>,
}

#[derive(Debug, Error)]
pub enum FactError {
    #[error("Invalid application id '{0}': must be a lowercase DNS label")]
    InvalidApplicationId(String),

    #[error("Invalid exposed port 0")]
    InvalidPort,

    #[error("Pinned template for {capability} has an empty name")]
    EmptyPin { capability: CapabilityTag },

    #[error("Invalid objective: {0}")]
    InvalidObjective(String),

    #[error("Duplicate objective '{0}'")]
    DuplicateObjective(String),

    #[error("Failed to parse analysis document: {0}")]
    Parse(String),
}

/// Immutable per-request snapshot consumed by the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactStore {
    application: ApplicationId,
    requirements: Vec<String>,
    container: ContainerFacts,
    resources: ResourceHints,
    compliance: ComplianceProfile,
    artifacts: ArtifactRefs,
    requested_capabilities: BTreeSet<CapabilityTag>,
    pinned_templates: BTreeMap<CapabilityTag, String>,
    objectives: Vec<ServiceLevelObjective>,
    retired_objectives: BTreeSet<String>,
}

/// Validate and normalize the analysis collaborator's output
pub fn ingest_facts(raw: RawAnalysis) -> Result<FactStore, FactError> {
    let application = ApplicationId::new(raw.application)?;

    let mut container = raw.container;
    if container.exposed_ports.contains(&0) {
        return Err(FactError::InvalidPort);
    }
    container.exposed_ports.sort_unstable();
    container.exposed_ports.dedup();
    container.detected_dependencies = container
        .detected_dependencies
        .into_iter()
        .map(|dep| dep.trim().to_ascii_lowercase())
        .filter(|dep| !dep.is_empty())
        .collect();

    for (capability, name) in &raw.pinned_templates {
        if name.trim().is_empty() {
            return Err(FactError::EmptyPin {
                capability: capability.clone(),
            });
        }
    }

    let mut seen = BTreeSet::new();
    for objective in &raw.objectives {
        objective.validate().map_err(FactError::InvalidObjective)?;
        if !seen.insert(objective.name.clone()) {
            return Err(FactError::DuplicateObjective(objective.name.clone()));
        }
    }

    Ok(FactStore {
        application,
        requirements: raw.requirements,
        container,
        resources: raw.resources,
        compliance: raw.compliance,
        artifacts: raw.artifacts,
        requested_capabilities: raw.requested_capabilities.into_iter().collect(),
        pinned_templates: raw.pinned_templates,
        objectives: raw.objectives,
        retired_objectives: raw.retired_objectives.into_iter().collect(),
    })
}

impl FactStore {
    /// Parse a YAML analysis document and ingest it
    pub fn from_yaml_str(yaml: &str) -> Result<Self, FactError> {
        let raw: RawAnalysis =
            serde_yaml::from_str(yaml).map_err(|e| FactError::Parse(e.to_string()))?;
        ingest_facts(raw)
    }

    pub fn application(&self) -> &ApplicationId {
        &self.application
    }

    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    pub fn container(&self) -> &ContainerFacts {
        &self.container
    }

    pub fn resources(&self) -> &ResourceHints {
        &self.resources
    }

    pub fn compliance(&self) -> ComplianceProfile {
        self.compliance
    }

    pub fn artifacts(&self) -> &ArtifactRefs {
        &self.artifacts
    }

    pub fn requests(&self, capability: &CapabilityTag) -> bool {
        self.requested_capabilities.contains(capability)
    }

    pub fn requested_capabilities(&self) -> &BTreeSet<CapabilityTag> {
        &self.requested_capabilities
    }

    pub fn pinned_template(&self, capability: &CapabilityTag) -> Option<&str> {
        self.pinned_templates.get(capability).map(String::as_str)
    }

    pub fn pinned_templates(&self) -> &BTreeMap<CapabilityTag, String> {
        &self.pinned_templates
    }

    pub fn has_dependency(&self, name: &str) -> bool {
        self.container
            .detected_dependencies
            .contains(&name.to_ascii_lowercase())
    }

    pub fn objectives(&self) -> &[ServiceLevelObjective] {
        &self.objectives
    }

    pub fn is_retired(&self, objective: &str) -> bool {
        self.retired_objectives.contains(objective)
    }
}
