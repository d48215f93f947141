// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Planner
//!
//! Resolves the component catalog against a fact snapshot into a
//! conflict-free, dependency-closed [`Plan`]. Planning is synchronous and
//! side-effect free: the same catalog, facts and previous plan always produce
//! the same plan.
//!
//! ## Pipeline
//!
//! 1. Candidate selection: per capability, the pinned template if the facts pin
//!    one, otherwise the first applicable template in registration order
//!    (ambiguity is recorded as a planning note).
//! 2. Dependency closure over `requires`.
//! 3. Conflict check.
//! 4. Topological order, dependencies first, ties broken by name.
//! 5. Parameterization and fragment validation.
//! 6. SLO derivation and carry-over from the previous plan.
//! 7. Versioning.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Pure planning use case over the domain catalog

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::domain::capability::CapabilityTag;
use crate::domain::catalog::{ComponentCatalog, ComponentTemplate, Requirement};
use crate::domain::facts::FactStore;
use crate::domain::plan::{Plan, PlanVersion, PlannedComponent, PlanningNote, PolicySet};
use crate::domain::slo::ServiceLevelObjective;

/// Rule added to every plan that deploys a policy engine
pub const ADMISSION_CONTROL_RULE: &str = "admission-control";

/// Fatal to one planning attempt; nothing is applied
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("'{component}' requires {requirement}, but no applicable template provides it")]
    UnsatisfiableDependency { component: String, requirement: String },

    #[error("Selected components '{first}' and '{second}' conflict")]
    ConflictingComponents { first: String, second: String },

    #[error("Template '{template}' produced an invalid configuration: {reason}")]
    ParameterizationError { template: String, reason: String },

    #[error("Template '{name}' is not registered in the catalog")]
    UnknownTemplate { name: String },

    #[error("Dependency cycle among selected components: {}", components.join(", "))]
    DependencyCycle { components: Vec<String> },
}

impl PlanningError {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanningError::UnsatisfiableDependency { .. } => "unsatisfiable_dependency",
            PlanningError::ConflictingComponents { .. } => "conflicting_components",
            PlanningError::ParameterizationError { .. } => "parameterization_error",
            PlanningError::UnknownTemplate { .. } => "unknown_template",
            PlanningError::DependencyCycle { .. } => "dependency_cycle",
        }
    }
}

pub struct Planner<'a> {
    catalog: &'a ComponentCatalog,
}

/// Working set of the closure phase
#[derive(Default)]
struct Selection {
    templates: BTreeMap<String, Arc<ComponentTemplate>>,
    /// First selected template per capability
    by_capability: BTreeMap<CapabilityTag, String>,
    notes: Vec<PlanningNote>,
}

impl Selection {
    fn insert(&mut self, template: Arc<ComponentTemplate>) -> bool {
        if self.templates.contains_key(&template.name) {
            return false;
        }
        self.by_capability
            .entry(template.capability.clone())
            .or_insert_with(|| template.name.clone());
        self.templates.insert(template.name.clone(), template);
        true
    }
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a ComponentCatalog) -> Self {
        Self { catalog }
    }

    pub fn plan(&self, facts: &FactStore, previous: Option<&Plan>) -> Result<Plan, PlanningError> {
        let previous = previous.filter(|p| {
            let same = p.application() == facts.application();
            if !same {
                tracing::warn!(
                    application = %facts.application(),
                    previous = %p.application(),
                    "Ignoring previous plan of a different application"
                );
            }
            same
        });

        let mut selection = self.select_candidates(facts)?;
        let edges = self.close_dependencies(facts, &mut selection)?;
        check_conflicts(&selection)?;
        let order = topological_order(&selection, &edges)?;

        let mut components = Vec::with_capacity(order.len());
        for name in &order {
            let template = &selection.templates[name];
            let config = template.parameterize(facts);
            config
                .validate()
                .map_err(|reason| PlanningError::ParameterizationError {
                    template: name.clone(),
                    reason,
                })?;
            components.push(PlannedComponent {
                template: template.as_ref().clone(),
                config,
                depends_on: edges.get(name).map(|d| d.iter().cloned().collect()).unwrap_or_default(),
            });
        }

        let mut notes = selection.notes;
        let objectives = derive_objectives(facts, &components, previous, &mut notes);

        for kind in facts.artifacts().missing() {
            notes.push(PlanningNote::MissingArtifact { kind });
        }

        let mut policies = PolicySet::for_profile(facts.compliance());
        if components.iter().any(|c| c.capability() == &CapabilityTag::Policy) {
            policies = policies.with_rule(ADMISSION_CONTROL_RULE);
        }

        let version = previous
            .map(|p| p.version().next())
            .unwrap_or(PlanVersion::INITIAL);

        debug!(
            application = %facts.application(),
            version = version.as_u64(),
            components = components.len(),
            objectives = objectives.len(),
            "Planned"
        );

        Ok(Plan::new(
            facts.application().clone(),
            version,
            components,
            objectives,
            policies,
            notes,
        ))
    }

    /// Template to use for `capability`: the pinned one, else the first
    /// applicable one. `Ok(None)` when nothing applies.
    fn resolve_capability(
        &self,
        facts: &FactStore,
        capability: &CapabilityTag,
        notes: &mut Vec<PlanningNote>,
    ) -> Result<Option<Arc<ComponentTemplate>>, PlanningError> {
        let candidates = self.catalog.by_capability(capability);

        if let Some(pinned) = facts.pinned_template(capability) {
            return candidates
                .into_iter()
                .find(|t| t.name == pinned)
                .cloned()
                .map(Some)
                .ok_or_else(|| PlanningError::UnknownTemplate {
                    name: pinned.to_string(),
                });
        }

        let applicable: Vec<&Arc<ComponentTemplate>> =
            candidates.into_iter().filter(|t| t.applicable(facts)).collect();

        match applicable.split_first() {
            None => Ok(None),
            Some((chosen, rest)) => {
                if !rest.is_empty() {
                    notes.push(PlanningNote::AmbiguousCapability {
                        capability: capability.clone(),
                        chosen: chosen.name.clone(),
                        alternatives: rest.iter().map(|t| t.name.clone()).collect(),
                    });
                }
                Ok(Some(Arc::clone(chosen)))
            }
        }
    }

    fn select_candidates(&self, facts: &FactStore) -> Result<Selection, PlanningError> {
        let mut selection = Selection::default();

        for capability in self.catalog.capabilities() {
            let any_applicable = self
                .catalog
                .by_capability(&capability)
                .iter()
                .any(|t| t.applicable(facts));
            if !any_applicable && !facts.requests(&capability) {
                continue;
            }
            if let Some(template) = self.resolve_capability(facts, &capability, &mut selection.notes)? {
                selection.insert(template);
            }
        }

        for capability in facts.requested_capabilities() {
            if !selection.by_capability.contains_key(capability) {
                return Err(PlanningError::UnsatisfiableDependency {
                    component: facts.application().to_string(),
                    requirement: Requirement::Capability(capability.clone()).to_string(),
                });
            }
        }

        Ok(selection)
    }

    /// Pull in everything the selected templates require. Returns the
    /// dependency edges (component -> components it requires).
    fn close_dependencies(
        &self,
        facts: &FactStore,
        selection: &mut Selection,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, PlanningError> {
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut worklist: Vec<String> = selection.templates.keys().cloned().collect();

        while let Some(name) = worklist.pop() {
            let template = Arc::clone(&selection.templates[&name]);
            let deps = edges.entry(name.clone()).or_default();

            for requirement in &template.requires {
                let provider = match requirement {
                    Requirement::Capability(tag) => {
                        if let Some(existing) = selection.by_capability.get(tag) {
                            existing.clone()
                        } else {
                            let resolved = self
                                .resolve_capability(facts, tag, &mut selection.notes)?
                                .ok_or_else(|| PlanningError::UnsatisfiableDependency {
                                    component: name.clone(),
                                    requirement: requirement.to_string(),
                                })?;
                            let provider = resolved.name.clone();
                            if selection.insert(resolved) {
                                worklist.push(provider.clone());
                            }
                            provider
                        }
                    }
                    Requirement::Template(required) => {
                        if !selection.templates.contains_key(required) {
                            let resolved = self.catalog.lookup(required).map_err(|_| {
                                PlanningError::UnknownTemplate {
                                    name: required.clone(),
                                }
                            })?;
                            selection.insert(Arc::clone(resolved));
                            worklist.push(required.clone());
                        }
                        required.clone()
                    }
                };
                deps.insert(provider);
            }
        }

        Ok(edges)
    }
}

fn check_conflicts(selection: &Selection) -> Result<(), PlanningError> {
    let templates: Vec<&Arc<ComponentTemplate>> = selection.templates.values().collect();
    for (i, first) in templates.iter().enumerate() {
        for second in &templates[i + 1..] {
            if first.conflicts(second) {
                return Err(PlanningError::ConflictingComponents {
                    first: first.name.clone(),
                    second: second.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm with a name-ordered ready set
fn topological_order(
    selection: &Selection,
    edges: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<String>, PlanningError> {
    let mut remaining: BTreeMap<&str, usize> = selection
        .templates
        .keys()
        .map(|name| (name.as_str(), edges.get(name).map_or(0, BTreeSet::len)))
        .collect();

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, deps) in edges {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while let Some(next) = ready.pop_first() {
        remaining.remove(next);
        order.push(next.to_string());
        for dependent in dependents.get(next).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(*dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if !remaining.is_empty() {
        return Err(PlanningError::DependencyCycle {
            components: remaining.keys().map(|name| name.to_string()).collect(),
        });
    }
    Ok(order)
}

/// Capability defaults, overridden by name with facts-supplied objectives,
/// plus objectives of the previous plan that nothing superseded or retired.
fn derive_objectives(
    facts: &FactStore,
    components: &[PlannedComponent],
    previous: Option<&Plan>,
    notes: &mut Vec<PlanningNote>,
) -> Vec<ServiceLevelObjective> {
    let mut objectives: BTreeMap<String, ServiceLevelObjective> = BTreeMap::new();

    for component in components {
        for objective in component.capability().default_objectives() {
            objectives.entry(objective.name.clone()).or_insert(objective);
        }
    }
    for objective in facts.objectives() {
        objectives.insert(objective.name.clone(), objective.clone());
    }

    if let Some(previous) = previous {
        for objective in previous.objectives() {
            if objectives.contains_key(&objective.name) || facts.is_retired(&objective.name) {
                continue;
            }
            notes.push(PlanningNote::ObjectiveCarriedOver {
                name: objective.name.clone(),
                from_version: previous.version(),
            });
            objectives.insert(objective.name.clone(), objective.clone());
        }
    }

    objectives.into_values().collect()
}
