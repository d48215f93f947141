// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Plan Aggregate
//!
//! The immutable output of a successful planning attempt. A plan is never
//! mutated: a new version supersedes the old one, and the plan repository
//! decides which version is active.
//!
//! # Invariants
//! - `components` is a topological order of the `requires` graph
//! - no two components conflict
//! - `objectives` is sorted by name and names are unique

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::capability::CapabilityTag;
use crate::domain::catalog::ComponentTemplate;
use crate::domain::facts::{ApplicationId, ArtifactKind, ComplianceProfile};
use crate::domain::slo::ServiceLevelObjective;
use crate::domain::template::ConfigFragment;

/// Version number scoped to one application; starts at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanVersion(pub u64);

impl PlanVersion {
    pub const INITIAL: PlanVersion = PlanVersion(1);

    pub fn next(self) -> Self {
        PlanVersion(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlanVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One selected `(template, config)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedComponent {
    pub template: ComponentTemplate,
    pub config: ConfigFragment,
    /// Names of selected components this one requires, sorted
    pub depends_on: Vec<String>,
}

impl PlannedComponent {
    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub fn capability(&self) -> &CapabilityTag {
        &self.template.capability
    }
}

/// Compliance rules active for a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySet(BTreeSet<String>);

impl PolicySet {
    pub fn for_profile(profile: ComplianceProfile) -> Self {
        Self(profile.policy_rules().iter().map(|rule| rule.to_string()).collect())
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.0.insert(rule.into());
        self
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.0.contains(rule)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Non-fatal observation made while planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum PlanningNote {
    /// Several templates were applicable and nothing in the facts chose one
    AmbiguousCapability {
        capability: CapabilityTag,
        chosen: String,
        alternatives: Vec<String>,
    },
    /// An optional artifact was not provided; defaults were used
    MissingArtifact { kind: ArtifactKind },
    /// An objective of the previous plan was kept because nothing superseded it
    ObjectiveCarriedOver { name: String, from_version: PlanVersion },
}

impl fmt::Display for PlanningNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanningNote::AmbiguousCapability {
                capability,
                chosen,
                alternatives,
            } => write!(
                f,
                "{} is ambiguous: chose '{}' over {}",
                capability,
                chosen,
                alternatives.join(", ")
            ),
            PlanningNote::MissingArtifact { kind } => {
                write!(f, "no {} provided, using defaults", kind)
            }
            PlanningNote::ObjectiveCarriedOver { name, from_version } => {
                write!(f, "objective '{}' carried over from {}", name, from_version)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    application: ApplicationId,
    version: PlanVersion,
    components: Vec<PlannedComponent>,
    objectives: Vec<ServiceLevelObjective>,
    policies: PolicySet,
    notes: Vec<PlanningNote>,
}

#[derive(Serialize)]
struct FingerprintView<'a> {
    application: &'a ApplicationId,
    components: &'a [PlannedComponent],
    objectives: &'a [ServiceLevelObjective],
    policies: &'a PolicySet,
}

impl Plan {
    pub(crate) fn new(
        application: ApplicationId,
        version: PlanVersion,
        components: Vec<PlannedComponent>,
        mut objectives: Vec<ServiceLevelObjective>,
        policies: PolicySet,
        notes: Vec<PlanningNote>,
    ) -> Self {
        objectives.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            application,
            version,
            components,
            objectives,
            policies,
            notes,
        }
    }

    pub fn application(&self) -> &ApplicationId {
        &self.application
    }

    pub fn version(&self) -> PlanVersion {
        self.version
    }

    pub fn components(&self) -> &[PlannedComponent] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&PlannedComponent> {
        self.components.iter().find(|c| c.name() == name)
    }

    pub fn objectives(&self) -> &[ServiceLevelObjective] {
        &self.objectives
    }

    pub fn objective(&self, name: &str) -> Option<&ServiceLevelObjective> {
        self.objectives.iter().find(|o| o.name == name)
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn notes(&self) -> &[PlanningNote] {
        &self.notes
    }

    /// Longest evaluation window among the objectives
    pub fn observation_window(&self) -> Option<std::time::Duration> {
        self.objectives.iter().map(|o| o.window).max()
    }

    /// Plans equal in everything but the version number
    pub fn same_content(&self, other: &Plan) -> bool {
        self.application == other.application
            && self.components == other.components
            && self.objectives == other.objectives
            && self.policies == other.policies
            && self.notes == other.notes
    }

    /// SHA-256 over the canonical JSON of the plan content (version excluded)
    pub fn fingerprint(&self) -> String {
        let view = FingerprintView {
            application: &self.application,
            components: &self.components,
            objectives: &self.objectives,
            policies: &self.policies,
        };
        let canonical = serde_json::to_vec(&view).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// One structural difference between two plans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum PlanChange {
    Added {
        component: String,
        capability: CapabilityTag,
    },
    Removed {
        component: String,
        capability: CapabilityTag,
    },
    Reconfigured {
        component: String,
        before: ConfigFragment,
        after: ConfigFragment,
    },
}

impl PlanChange {
    pub fn component(&self) -> &str {
        match self {
            PlanChange::Added { component, .. }
            | PlanChange::Removed { component, .. }
            | PlanChange::Reconfigured { component, .. } => component,
        }
    }
}

impl fmt::Display for PlanChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanChange::Added { component, capability } => {
                write!(f, "+ {} ({})", component, capability)
            }
            PlanChange::Removed { component, capability } => {
                write!(f, "- {} ({})", component, capability)
            }
            PlanChange::Reconfigured { component, before, after } => {
                let mut keys: BTreeSet<&String> = before.iter().map(|(k, _)| k).collect();
                keys.extend(after.iter().map(|(k, _)| k));
                let changed: Vec<&str> = keys
                    .into_iter()
                    .filter(|k| before.get(k) != after.get(k))
                    .map(String::as_str)
                    .collect();
                write!(f, "~ {} [{}]", component, changed.join(", "))
            }
        }
    }
}

/// Structural diff from `a` to `b`, ordered by component name.
///
/// Components are matched by name; a matched pair is `Reconfigured` when the
/// config fragments differ.
pub fn diff(a: &Plan, b: &Plan) -> Vec<PlanChange> {
    let before: BTreeMap<&str, &PlannedComponent> =
        a.components.iter().map(|c| (c.name(), c)).collect();
    let after: BTreeMap<&str, &PlannedComponent> =
        b.components.iter().map(|c| (c.name(), c)).collect();

    let names: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    names
        .into_iter()
        .filter_map(|name| match (before.get(name), after.get(name)) {
            (Some(old), None) => Some(PlanChange::Removed {
                component: name.to_string(),
                capability: old.capability().clone(),
            }),
            (None, Some(new)) => Some(PlanChange::Added {
                component: name.to_string(),
                capability: new.capability().clone(),
            }),
            (Some(old), Some(new)) if old.config != new.config => Some(PlanChange::Reconfigured {
                component: name.to_string(),
                before: old.config.clone(),
                after: new.config.clone(),
            }),
            _ => None,
        })
        .collect()
}
