// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # External Collaborators
//!
//! Ports to the systems this engine drives but does not own: the manifest
//! renderer, the cluster apply/health API and the metric source. Every call
//! through these traits is wrapped in a timeout and the bounded retry policy
//! by the application layer; implementations should not retry on their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::facts::ApplicationId;
use crate::domain::plan::{PlanVersion, PlannedComponent};
use crate::domain::slo::{MetricQuery, MetricSample};

/// Opaque output of the manifest renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub component: String,
    pub name: String,
    pub content: String,
}

/// Identifies one deployed component of one plan version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentRef {
    pub application: ApplicationId,
    pub plan_version: PlanVersion,
    pub component: String,
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.application, self.component, self.plan_version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ready,
    NotReady,
}

/// Failure of an external call. Every variant is treated as transient.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("call failed: {0}")]
    Failed(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ManifestRenderer: Send + Sync {
    async fn render(&self, component: &PlannedComponent) -> Result<Vec<RenderedArtifact>, CollaboratorError>;
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn apply(&self, target: &ComponentRef, artifact: &RenderedArtifact) -> Result<(), CollaboratorError>;

    async fn health_of(&self, target: &ComponentRef) -> Result<HealthStatus, CollaboratorError>;
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Samples of `query` observed during the trailing `window`
    async fn query(&self, query: &MetricQuery, window: Duration) -> Result<Vec<MetricSample>, CollaboratorError>;
}
