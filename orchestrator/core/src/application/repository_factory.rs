// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on the storage backend
//! configuration, keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Backend selection for plan and rollout-state storage

use std::sync::Arc;

use crate::domain::repository::{PlanRepository, RolloutStateRepository, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryPlanRepository, InMemoryRolloutStateRepository, PostgresPlanRepository,
    PostgresRolloutStateRepository,
};

/// Both repositories the deployment service needs, built from one backend
#[derive(Clone)]
pub struct Repositories {
    pub plans: Arc<dyn PlanRepository>,
    pub rollouts: Arc<dyn RolloutStateRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            plans: Arc::new(InMemoryPlanRepository::new()),
            rollouts: Arc::new(InMemoryRolloutStateRepository::new()),
        }
    }
}

/// Creates a PlanRepository implementation based on the configured backend
pub fn create_plan_repository(backend: &StorageBackend, database: Option<&Database>) -> anyhow::Result<Arc<dyn PlanRepository>> {
    match (backend, database) {
        (StorageBackend::InMemory, _) => Ok(Arc::new(InMemoryPlanRepository::new())),
        (StorageBackend::PostgreSQL(_), Some(db)) => Ok(Arc::new(PostgresPlanRepository::new(db.get_pool().clone()))),
        (StorageBackend::PostgreSQL(_), None) => anyhow::bail!("PostgreSQL backend selected but no database connection provided"),
    }
}

/// Creates a RolloutStateRepository implementation based on the configured backend
pub fn create_rollout_state_repository(
    backend: &StorageBackend,
    database: Option<&Database>,
) -> anyhow::Result<Arc<dyn RolloutStateRepository>> {
    match (backend, database) {
        (StorageBackend::InMemory, _) => Ok(Arc::new(InMemoryRolloutStateRepository::new())),
        (StorageBackend::PostgreSQL(_), Some(db)) => {
            Ok(Arc::new(PostgresRolloutStateRepository::new(db.get_pool().clone())))
        }
        (StorageBackend::PostgreSQL(_), None) => anyhow::bail!("PostgreSQL backend selected but no database connection provided"),
    }
}

/// Connect (when needed), bootstrap the schema and build both repositories
pub async fn connect_repositories(backend: &StorageBackend) -> anyhow::Result<Repositories> {
    let database = match backend {
        StorageBackend::InMemory => None,
        StorageBackend::PostgreSQL(config) => {
            let db = Database::new(&config.connection_string).await?;
            db.ensure_schema().await?;
            Some(db)
        }
    };

    Ok(Repositories {
        plans: create_plan_repository(backend, database.as_ref())?,
        rollouts: create_rollout_state_repository(backend, database.as_ref())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::PostgresConfig;

    #[test]
    fn test_postgres_without_database_is_rejected() {
        let backend = StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: "postgres://localhost/keel".to_string(),
        });
        assert!(create_plan_repository(&backend, None).is_err());
        assert!(create_rollout_state_repository(&StorageBackend::InMemory, None).is_ok());
    }
}
