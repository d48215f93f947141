// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Component Catalog
//!
//! Registry of component templates. Built once at startup with `&mut` access,
//! then shared read-only (typically behind an `Arc`) with every planner. There
//! is no global instance; tests build independent catalogs.
//!
//! Capability tags in `requires` are checked at registration. Template names in
//! `requires` / `conflicts_with` may point at templates that are registered
//! later; they are resolved lazily by the planner.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::capability::{is_slug, CapabilityTag};
use crate::domain::facts::FactStore;
use crate::domain::template::{ConfigFragment, TemplateBehavior};

/// A dependency on either a capability or a specific template.
///
/// Serialized as a single-key map: `{capability: mesh}` or `{template: vault}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RequirementRepr", into = "RequirementRepr")]
pub enum Requirement {
    Capability(CapabilityTag),
    Template(String),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequirementRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    capability: Option<CapabilityTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<String>,
}

impl TryFrom<RequirementRepr> for Requirement {
    type Error = String;

    fn try_from(repr: RequirementRepr) -> Result<Self, Self::Error> {
        match (repr.capability, repr.template) {
            (Some(tag), None) => Ok(Requirement::Capability(tag)),
            (None, Some(name)) => Ok(Requirement::Template(name)),
            _ => Err("a requirement names exactly one of `capability` or `template`".to_string()),
        }
    }
}

impl From<Requirement> for RequirementRepr {
    fn from(requirement: Requirement) -> Self {
        match requirement {
            Requirement::Capability(tag) => RequirementRepr {
                capability: Some(tag),
                template: None,
            },
            Requirement::Template(name) => RequirementRepr {
                capability: None,
                template: Some(name),
            },
        }
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::Capability(tag) => write!(f, "capability '{}'", tag),
            Requirement::Template(name) => write!(f, "template '{}'", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTemplate {
    pub name: String,
    pub capability: CapabilityTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    #[serde(default)]
    pub conflicts_with: BTreeSet<String>,
    pub behavior: TemplateBehavior,
}

impl ComponentTemplate {
    pub fn new(name: impl Into<String>, capability: CapabilityTag, behavior: TemplateBehavior) -> Self {
        Self {
            name: name.into(),
            capability,
            description: None,
            requires: Vec::new(),
            conflicts_with: BTreeSet::new(),
            behavior,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn requires_capability(mut self, tag: CapabilityTag) -> Self {
        self.push_requirement(Requirement::Capability(tag));
        self
    }

    pub fn requires_template(mut self, name: impl Into<String>) -> Self {
        self.push_requirement(Requirement::Template(name.into()));
        self
    }

    pub fn conflicts_with(mut self, name: impl Into<String>) -> Self {
        self.conflicts_with.insert(name.into());
        self
    }

    fn push_requirement(&mut self, requirement: Requirement) {
        if !self.requires.contains(&requirement) {
            self.requires.push(requirement);
        }
    }

    pub fn applicable(&self, facts: &FactStore) -> bool {
        self.behavior.applicable(facts)
    }

    pub fn parameterize(&self, facts: &FactStore) -> ConfigFragment {
        self.behavior.parameterize(facts)
    }

    pub fn conflicts(&self, other: &ComponentTemplate) -> bool {
        self.conflicts_with.contains(&other.name) || other.conflicts_with.contains(&self.name)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidTemplate {
            name: self.name.clone(),
            reason,
        };

        if !is_slug(&self.name) {
            return Err(invalid("name must be a lowercase DNS label".to_string()));
        }
        if !self.capability.is_well_formed() {
            return Err(invalid(format!("malformed capability tag '{}'", self.capability)));
        }
        if let Some(expected) = self.behavior.capability() {
            if expected != self.capability {
                return Err(invalid(format!(
                    "{} behavior cannot implement capability '{}'",
                    expected, self.capability
                )));
            }
        }

        for requirement in &self.requires {
            match requirement {
                Requirement::Capability(tag) if !tag.is_well_formed() => {
                    return Err(invalid(format!("requires unknown capability tag '{}'", tag)));
                }
                Requirement::Template(name) if name == &self.name => {
                    return Err(invalid("template requires itself".to_string()));
                }
                Requirement::Template(name) if !is_slug(name) => {
                    return Err(invalid(format!("requires malformed template name '{}'", name)));
                }
                Requirement::Template(name) if self.conflicts_with.contains(name) => {
                    return Err(invalid(format!("both requires and conflicts with '{}'", name)));
                }
                _ => {}
            }
        }

        for name in &self.conflicts_with {
            if name == &self.name {
                return Err(invalid("template conflicts with itself".to_string()));
            }
            if !is_slug(name) {
                return Err(invalid(format!("conflicts with malformed template name '{}'", name)));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Template '{0}' is already registered")]
    DuplicateTemplate(String),

    #[error("Invalid template '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("Template '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Default)]
pub struct ComponentCatalog {
    templates: Vec<Arc<ComponentTemplate>>,
    index: HashMap<String, usize>,
}

impl ComponentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: ComponentTemplate) -> Result<(), CatalogError> {
        if self.index.contains_key(&template.name) {
            return Err(CatalogError::DuplicateTemplate(template.name));
        }
        template.validate()?;

        self.index.insert(template.name.clone(), self.templates.len());
        self.templates.push(Arc::new(template));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<ComponentTemplate>, CatalogError> {
        self.index
            .get(name)
            .map(|idx| &self.templates[*idx])
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// Templates of one capability in registration order
    pub fn by_capability(&self, tag: &CapabilityTag) -> Vec<&Arc<ComponentTemplate>> {
        self.templates
            .iter()
            .filter(|template| &template.capability == tag)
            .collect()
    }

    /// Capabilities present in the catalog, in first-registration order
    pub fn capabilities(&self) -> Vec<CapabilityTag> {
        let mut seen = Vec::new();
        for template in &self.templates {
            if !seen.contains(&template.capability) {
                seen.push(template.capability.clone());
            }
        }
        seen
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ComponentTemplate>> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
