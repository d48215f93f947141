// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for plans and rollout state. Interfaces are defined
//! here and implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `PlanRepository` | `Plan` history + active pointer | `InMemoryPlanRepository`, `PostgresPlanRepository` |
//! | `RolloutStateRepository` | `RolloutState` | `InMemoryRolloutStateRepository`, `PostgresRolloutStateRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! The concrete implementation is chosen at startup from the `storage` section
//! of the orchestrator configuration. In-memory storage is used for
//! development and tests; PostgreSQL keeps history across restarts.

use async_trait::async_trait;

use crate::domain::facts::ApplicationId;
use crate::domain::plan::{Plan, PlanVersion};
use crate::domain::rollout::RolloutState;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Append-only plan history per application, plus the active-plan pointer
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Append a plan. Fails with `Conflict` unless its version is exactly one
    /// past the latest stored version (or 1 for a new application).
    async fn append(&self, plan: &Plan) -> Result<(), RepositoryError>;

    async fn find_version(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<Option<Plan>, RepositoryError>;

    /// Highest stored version, active or not
    async fn latest(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError>;

    /// All versions, oldest first
    async fn history(&self, application: &ApplicationId) -> Result<Vec<Plan>, RepositoryError>;

    async fn find_active(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError>;

    /// Make a stored version the active one; the previous active plan becomes
    /// historical.
    async fn mark_active(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<(), RepositoryError>;
}

/// Current rollout state per application and the archive of finished ones
#[async_trait]
pub trait RolloutStateRepository: Send + Sync {
    /// Save (create or replace) the current state of an application
    async fn save(&self, state: &RolloutState) -> Result<(), RepositoryError>;

    async fn find_current(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<RolloutState>, RepositoryError>;

    /// Every current state whose stage is not terminal
    async fn find_in_flight(&self) -> Result<Vec<RolloutState>, RepositoryError>;

    /// Move a terminal state out of the current slot into the archive
    async fn archive(&self, state: &RolloutState) -> Result<(), RepositoryError>;

    /// Archived rollouts of one application, oldest first
    async fn archived(&self, application: &ApplicationId) -> Result<Vec<RolloutState>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
