// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Built-in Component Templates
//
// Stock templates covering every built-in capability. Registration order is
// the planner's tie-break order, so the preferred template of each capability
// comes first.

use crate::domain::capability::CapabilityTag;
use crate::domain::catalog::{CatalogError, ComponentCatalog, ComponentTemplate};
use crate::domain::template::TemplateBehavior;

pub fn builtin_templates() -> Vec<ComponentTemplate> {
    vec![
        // ingress
        ComponentTemplate::new(
            "ingress-nginx",
            CapabilityTag::Ingress,
            TemplateBehavior::Ingress {
                class: "nginx".to_string(),
            },
        )
        .describe("NGINX ingress controller"),
        ComponentTemplate::new(
            "traefik",
            CapabilityTag::Ingress,
            TemplateBehavior::Ingress {
                class: "traefik".to_string(),
            },
        )
        .describe("Traefik edge router"),
        // observability
        ComponentTemplate::new(
            "prometheus-stack",
            CapabilityTag::Observability,
            TemplateBehavior::Observability {
                stack: "kube-prometheus".to_string(),
            },
        )
        .describe("Prometheus, Alertmanager and Grafana"),
        // mesh
        ComponentTemplate::new(
            "istio",
            CapabilityTag::Mesh,
            TemplateBehavior::ServiceMesh {
                flavor: "istio".to_string(),
            },
        )
        .describe("Istio service mesh")
        .requires_capability(CapabilityTag::Observability)
        .conflicts_with("linkerd"),
        ComponentTemplate::new(
            "linkerd",
            CapabilityTag::Mesh,
            TemplateBehavior::ServiceMesh {
                flavor: "linkerd".to_string(),
            },
        )
        .describe("Linkerd service mesh"),
        // database
        database("postgresql", "postgres", 5432, &["postgres", "postgresql", "psycopg2", "pg", "sqlx"]),
        database("mysql", "mysql", 3306, &["mysql", "mysql2", "mysqlclient", "pymysql"]),
        database("mongodb", "mongo", 27017, &["mongodb", "mongoose", "pymongo"]),
        database("redis", "redis", 6379, &["redis", "ioredis", "redis-py"]),
        // secrets
        ComponentTemplate::new(
            "vault",
            CapabilityTag::Secrets,
            TemplateBehavior::Secrets {
                provider: "vault".to_string(),
            },
        )
        .describe("HashiCorp Vault with the agent injector"),
        ComponentTemplate::new(
            "sealed-secrets",
            CapabilityTag::Secrets,
            TemplateBehavior::Secrets {
                provider: "sealed-secrets".to_string(),
            },
        )
        .describe("Bitnami sealed secrets controller")
        .conflicts_with("vault"),
        // policy
        ComponentTemplate::new(
            "opa-gatekeeper",
            CapabilityTag::Policy,
            TemplateBehavior::PolicyEngine {
                engine: "gatekeeper".to_string(),
            },
        )
        .describe("OPA Gatekeeper admission controller")
        .conflicts_with("kyverno"),
        ComponentTemplate::new(
            "kyverno",
            CapabilityTag::Policy,
            TemplateBehavior::PolicyEngine {
                engine: "kyverno".to_string(),
            },
        )
        .describe("Kyverno policy engine"),
        // autoscaling
        ComponentTemplate::new("hpa", CapabilityTag::Autoscaling, TemplateBehavior::Autoscaler)
            .describe("Horizontal pod autoscaler")
            .requires_capability(CapabilityTag::Observability),
        // delivery
        ComponentTemplate::new(
            "argo-rollouts",
            CapabilityTag::Delivery,
            TemplateBehavior::ProgressiveDelivery {
                controller: "argo-rollouts".to_string(),
            },
        )
        .describe("Argo Rollouts canary controller")
        .requires_capability(CapabilityTag::Ingress),
        ComponentTemplate::new(
            "chaos-mesh",
            CapabilityTag::Chaos,
            TemplateBehavior::Chaos {
                tool: "chaos-mesh".to_string(),
            },
        ),
        ComponentTemplate::new(
            "velero",
            CapabilityTag::Backup,
            TemplateBehavior::Backup {
                tool: "velero".to_string(),
            },
        )
        .describe("Velero cluster backups"),
        ComponentTemplate::new(
            "dex",
            CapabilityTag::Identity,
            TemplateBehavior::Identity {
                provider: "dex".to_string(),
            },
        )
        .describe("Dex OIDC provider"),
        ComponentTemplate::new(
            "opencost",
            CapabilityTag::Cost,
            TemplateBehavior::CostMonitor {
                tool: "opencost".to_string(),
            },
        )
        .requires_capability(CapabilityTag::Observability),
        ComponentTemplate::new(
            "argo-cd",
            CapabilityTag::CiCd,
            TemplateBehavior::CiCd {
                system: "argo-cd".to_string(),
            },
        )
        .describe("Argo CD GitOps controller"),
    ]
}

fn database(name: &str, engine: &str, default_port: u16, markers: &[&str]) -> ComponentTemplate {
    ComponentTemplate::new(
        name,
        CapabilityTag::Database,
        TemplateBehavior::Database {
            engine: engine.to_string(),
            default_port,
            markers: markers.iter().map(|m| m.to_string()).collect(),
        },
    )
}

/// Catalog holding only the built-in templates
pub fn builtin_catalog() -> Result<ComponentCatalog, CatalogError> {
    let mut catalog = ComponentCatalog::new();
    for template in builtin_templates() {
        catalog.register(template)?;
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::planner::Planner;
    use crate::domain::facts::{ingest_facts, ContainerFacts, RawAnalysis};

    #[test]
    fn test_every_builtin_capability_is_covered() {
        let catalog = builtin_catalog().unwrap();
        for tag in CapabilityTag::BUILTIN.iter() {
            assert!(!catalog.by_capability(tag).is_empty(), "no template for {}", tag);
        }
    }

    #[test]
    fn test_web_service_plan() {
        let catalog = builtin_catalog().unwrap();
        let facts = ingest_facts(RawAnalysis {
            application: "checkout".to_string(),
            container: ContainerFacts {
                exposed_ports: vec![8080],
                detected_dependencies: ["psycopg2".to_string()].into_iter().collect(),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        let plan = Planner::new(&catalog).plan(&facts, None).unwrap();
        let names: Vec<&str> = plan.components().iter().map(|c| c.name()).collect();
        assert!(names.contains(&"ingress-nginx"));
        assert!(names.contains(&"postgresql"));
        assert!(names.contains(&"prometheus-stack"));
        assert!(!names.contains(&"mysql"));
    }
}
