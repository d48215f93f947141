// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Taxonomy
//!
//! Every component template belongs to exactly one capability. The taxonomy is
//! fixed; `custom:<slug>` is the escape hatch for site-specific categories.
//!
//! Capabilities also contribute default service level objectives: an ingress
//! brings a latency objective, a mesh brings a success-rate objective, and so on.
//! Facts-supplied objectives override these by name during planning.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::slo::{Comparator, MetricQuery, ServiceLevelObjective, Threshold};

/// Capability tag of a component template
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CapabilityTag {
    Ingress,
    Mesh,
    Observability,
    Database,
    Secrets,
    Policy,
    Autoscaling,
    Delivery,
    Chaos,
    Backup,
    Identity,
    Cost,
    CiCd,
    Custom(String),
}

impl CapabilityTag {
    /// All built-in capabilities in taxonomy order
    pub const BUILTIN: [CapabilityTag; 13] = [
        CapabilityTag::Ingress,
        CapabilityTag::Mesh,
        CapabilityTag::Observability,
        CapabilityTag::Database,
        CapabilityTag::Secrets,
        CapabilityTag::Policy,
        CapabilityTag::Autoscaling,
        CapabilityTag::Delivery,
        CapabilityTag::Chaos,
        CapabilityTag::Backup,
        CapabilityTag::Identity,
        CapabilityTag::Cost,
        CapabilityTag::CiCd,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            CapabilityTag::Ingress => "ingress",
            CapabilityTag::Mesh => "mesh",
            CapabilityTag::Observability => "observability",
            CapabilityTag::Database => "database",
            CapabilityTag::Secrets => "secrets",
            CapabilityTag::Policy => "policy",
            CapabilityTag::Autoscaling => "autoscaling",
            CapabilityTag::Delivery => "delivery",
            CapabilityTag::Chaos => "chaos",
            CapabilityTag::Backup => "backup",
            CapabilityTag::Identity => "identity",
            CapabilityTag::Cost => "cost",
            CapabilityTag::CiCd => "ci-cd",
            CapabilityTag::Custom(slug) => slug,
        }
    }

    /// Custom tags must carry a lowercase alphanumeric/hyphen slug
    pub fn is_well_formed(&self) -> bool {
        match self {
            CapabilityTag::Custom(slug) => is_slug(slug),
            _ => true,
        }
    }

    /// Objectives every component of this capability contributes unless the
    /// facts supply an objective with the same name.
    pub fn default_objectives(&self) -> Vec<ServiceLevelObjective> {
        match self {
            CapabilityTag::Ingress => vec![
                ServiceLevelObjective::new(
                    "p99-latency",
                    MetricQuery::new(
                        "histogram_quantile(0.99, sum(rate(http_request_duration_seconds_bucket[1m])) by (le))",
                    )
                    .with_unit("seconds"),
                    Threshold::new(Comparator::LessOrEqual, 0.5),
                    Duration::from_secs(300),
                ),
                ServiceLevelObjective::new(
                    "error-rate",
                    MetricQuery::new(
                        "sum(rate(http_requests_total{code=~\"5..\"}[1m])) / sum(rate(http_requests_total[1m]))",
                    )
                    .with_unit("ratio"),
                    Threshold::new(Comparator::LessOrEqual, 0.01),
                    Duration::from_secs(300),
                ),
            ],
            CapabilityTag::Mesh => vec![ServiceLevelObjective::new(
                "mesh-success-rate",
                MetricQuery::new(
                    "sum(rate(requests_total{response_class=\"success\"}[1m])) / sum(rate(requests_total[1m]))",
                )
                .with_unit("ratio"),
                Threshold::new(Comparator::GreaterOrEqual, 0.99),
                Duration::from_secs(300),
            )],
            CapabilityTag::Database => vec![ServiceLevelObjective::new(
                "db-connection-saturation",
                MetricQuery::new("max(db_connections_in_use / db_connections_max)").with_unit("ratio"),
                Threshold::new(Comparator::LessThan, 0.9),
                Duration::from_secs(600),
            )],
            CapabilityTag::Autoscaling => vec![ServiceLevelObjective::new(
                "replica-headroom",
                MetricQuery::new("min(kube_hpa_status_current_replicas / kube_hpa_spec_max_replicas)")
                    .with_unit("ratio"),
                Threshold::new(Comparator::LessThan, 1.0),
                Duration::from_secs(300),
            )],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityTag::Custom(slug) => write!(f, "custom:{}", slug),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability tag '{0}' (expected one of the built-in tags or 'custom:<slug>')")]
pub struct UnknownCapability(pub String);

impl FromStr for CapabilityTag {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(slug) = s.strip_prefix("custom:") {
            let tag = CapabilityTag::Custom(slug.to_string());
            return if tag.is_well_formed() {
                Ok(tag)
            } else {
                Err(UnknownCapability(s.to_string()))
            };
        }

        CapabilityTag::BUILTIN
            .iter()
            .find(|tag| tag.as_str() == s)
            .cloned()
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

impl TryFrom<String> for CapabilityTag {
    type Error = UnknownCapability;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CapabilityTag> for String {
    fn from(tag: CapabilityTag) -> Self {
        tag.to_string()
    }
}

/// Lowercase alphanumeric + hyphens, starting and ending with alphanumeric
pub(crate) fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin_tags() {
        for tag in CapabilityTag::BUILTIN.iter() {
            let parsed: CapabilityTag = tag.to_string().parse().unwrap();
            assert_eq!(&parsed, tag);
        }
        assert_eq!("ci-cd".parse::<CapabilityTag>().unwrap(), CapabilityTag::CiCd);
    }

    #[test]
    fn test_parse_custom_tag() {
        let tag: CapabilityTag = "custom:feature-flags".parse().unwrap();
        assert_eq!(tag, CapabilityTag::Custom("feature-flags".to_string()));
        assert_eq!(tag.to_string(), "custom:feature-flags");
    }

    #[test]
    fn test_reject_unknown_tags() {
        assert!("loadbalancer".parse::<CapabilityTag>().is_err());
        assert!("custom:".parse::<CapabilityTag>().is_err());
        assert!("custom:Bad_Slug".parse::<CapabilityTag>().is_err());
    }

    #[test]
    fn test_serde_uses_string_form() {
        let yaml = serde_yaml::to_string(&CapabilityTag::CiCd).unwrap();
        assert_eq!(yaml.trim(), "ci-cd");
        let parsed: CapabilityTag = serde_yaml::from_str("custom:edge-cache").unwrap();
        assert_eq!(parsed, CapabilityTag::Custom("edge-cache".to_string()));
        assert!(serde_yaml::from_str::<CapabilityTag>("queue").is_err());
    }

    #[test]
    fn test_ingress_contributes_latency_objective() {
        let names: Vec<String> = CapabilityTag::Ingress
            .default_objectives()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert!(names.contains(&"p99-latency".to_string()));
        assert!(CapabilityTag::Chaos.default_objectives().is_empty());
    }
}
