// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Component Catalog YAML Loader
//!
//! Parses custom template definitions and registers them into a
//! [`ComponentCatalog`]. Custom templates are data-driven: applicability is a
//! [`FactPredicate`] and the configuration is a static fragment.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain templates
//! - **Anti-Corruption:** The YAML schema is kept separate from `ComponentTemplate`
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: keel.dev/v1
//! kind: ComponentCatalog
//! metadata:
//!   name: platform-extras
//! spec:
//!   templates:
//!     - name: flagd
//!       capability: custom:feature-flags
//!       requires:
//!         capabilities: [observability]
//!       when:
//!         kind: capability_requested
//!         value: custom:feature-flags
//!       config:
//!         replicas: 2
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::capability::CapabilityTag;
use crate::domain::catalog::{CatalogError, ComponentCatalog, ComponentTemplate};
use crate::domain::orchestrator_config::{CatalogSources, API_VERSION};
use crate::domain::template::{ConfigFragment, FactPredicate, TemplateBehavior};
use crate::infrastructure::builtin_catalog::builtin_templates;

pub const CATALOG_KIND: &str = "ComponentCatalog";

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: CatalogMetadataYaml,
    pub spec: CatalogSpecYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMetadataYaml {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSpecYaml {
    #[serde(default)]
    pub templates: Vec<TemplateYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateYaml {
    pub name: String,
    pub capability: CapabilityTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub requires: RequiresYaml,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
    #[serde(default = "always")]
    pub when: FactPredicate,
    #[serde(default)]
    pub config: ConfigFragment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequiresYaml {
    #[serde(default)]
    pub capabilities: Vec<CapabilityTag>,
    #[serde(default)]
    pub templates: Vec<String>,
}

fn always() -> FactPredicate {
    FactPredicate::Always
}

// ============================================================================
// Parser
// ============================================================================

/// Catalog manifest parser (Infrastructure service)
pub struct CatalogLoader;

impl CatalogLoader {
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<ComponentTemplate>, CatalogParseError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| CatalogParseError::IoError {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(yaml: &str) -> Result<Vec<ComponentTemplate>, CatalogParseError> {
        let manifest: CatalogManifest =
            serde_yaml::from_str(yaml).map_err(|e| CatalogParseError::YamlError(e.to_string()))?;

        if manifest.api_version != API_VERSION {
            return Err(CatalogParseError::InvalidApiVersion {
                expected: API_VERSION.to_string(),
                got: manifest.api_version,
            });
        }
        if manifest.kind != CATALOG_KIND {
            return Err(CatalogParseError::InvalidKind {
                expected: CATALOG_KIND.to_string(),
                got: manifest.kind,
            });
        }

        Ok(manifest.spec.templates.into_iter().map(Self::convert).collect())
    }

    fn convert(yaml: TemplateYaml) -> ComponentTemplate {
        let mut template = ComponentTemplate::new(
            yaml.name,
            yaml.capability,
            TemplateBehavior::Custom {
                when: yaml.when,
                config: yaml.config,
            },
        );
        if let Some(description) = yaml.description {
            template = template.describe(description);
        }
        for tag in yaml.requires.capabilities {
            template = template.requires_capability(tag);
        }
        for name in yaml.requires.templates {
            template = template.requires_template(name);
        }
        for name in yaml.conflicts_with {
            template = template.conflicts_with(name);
        }
        template
    }

    /// Build the catalog described by the configuration: stock templates
    /// first (when enabled), then every template file in order
    pub fn build(sources: &CatalogSources) -> Result<ComponentCatalog, CatalogParseError> {
        let mut catalog = ComponentCatalog::new();

        if sources.include_builtin {
            for template in builtin_templates() {
                catalog.register(template)?;
            }
        }

        for path in &sources.template_files {
            let templates = Self::parse_file(path)?;
            debug!(path = %path.display(), count = templates.len(), "Loaded template file");
            for template in templates {
                catalog.register(template)?;
            }
        }

        info!(templates = catalog.len(), "Component catalog initialized");
        Ok(catalog)
    }
}

#[derive(Debug, Error)]
pub enum CatalogParseError {
    #[error("Failed to read '{path}': {error}")]
    IoError { path: String, error: String },

    #[error("YAML parse error: {0}")]
    YamlError(String),

    #[error("Invalid API version: expected '{expected}', got '{got}'")]
    InvalidApiVersion { expected: String, got: String },

    #[error("Invalid kind: expected '{expected}', got '{got}'")]
    InvalidKind { expected: String, got: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::Requirement;
    use std::io::Write;

    const FLAGS: &str = r#"
apiVersion: keel.dev/v1
kind: ComponentCatalog
metadata:
  name: platform-extras
spec:
  templates:
    - name: flagd
      capability: custom:feature-flags
      description: Feature flag daemon
      requires:
        capabilities: [observability]
      conflicts_with: [unleash]
      when:
        kind: capability_requested
        value: custom:feature-flags
      config:
        replicas: 2
        provider: flagd
"#;

    #[test]
    fn test_parse_custom_template() {
        let templates = CatalogLoader::parse_yaml(FLAGS).unwrap();
        assert_eq!(templates.len(), 1);

        let flagd = &templates[0];
        assert_eq!(flagd.capability, CapabilityTag::Custom("feature-flags".to_string()));
        assert_eq!(flagd.requires, vec![Requirement::Capability(CapabilityTag::Observability)]);
        assert!(flagd.conflicts_with.contains("unleash"));
        match &flagd.behavior {
            TemplateBehavior::Custom { when, config } => {
                assert_eq!(
                    *when,
                    FactPredicate::CapabilityRequested(CapabilityTag::Custom("feature-flags".to_string()))
                );
                assert_eq!(config.len(), 2);
            }
            other => panic!("unexpected behavior {:?}", other),
        }
    }

    #[test]
    fn test_invalid_kind() {
        let yaml = FLAGS.replace("kind: ComponentCatalog", "kind: Workflow");
        assert!(matches!(
            CatalogLoader::parse_yaml(&yaml),
            Err(CatalogParseError::InvalidKind { .. })
        ));
    }

    #[test]
    fn test_build_appends_files_after_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FLAGS.as_bytes()).unwrap();

        let catalog = CatalogLoader::build(&CatalogSources {
            include_builtin: true,
            template_files: vec![file.path().to_path_buf()],
        })
        .unwrap();
        assert_eq!(catalog.len(), builtin_templates().len() + 1);
        assert!(catalog.lookup("flagd").is_ok());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let yaml = FLAGS.replace("name: flagd", "name: vault");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let result = CatalogLoader::build(&CatalogSources {
            include_builtin: true,
            template_files: vec![file.path().to_path_buf()],
        });
        assert!(matches!(
            result,
            Err(CatalogParseError::Catalog(CatalogError::DuplicateTemplate(_)))
        ));
    }
}
