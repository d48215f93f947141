// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve plans and rollout state
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresPlanRepository** - append-only plan history and active pointer
//! - **PostgresRolloutStateRepository** - current rollout state and archive
//!
//! ## In-Memory Repositories
//!
//! Lock-protected maps for tests and development:
//! - **InMemoryPlanRepository**
//! - **InMemoryRolloutStateRepository**

pub mod postgres_plan;
pub mod postgres_rollout_state;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::facts::ApplicationId;
use crate::domain::plan::{Plan, PlanVersion};
use crate::domain::repository::{PlanRepository, RepositoryError, RolloutStateRepository};
use crate::domain::rollout::RolloutState;

pub use postgres_plan::PostgresPlanRepository;
pub use postgres_rollout_state::PostgresRolloutStateRepository;

/// Shared rule of every plan store: versions are dense and start at 1
pub(crate) fn check_next_version(
    application: &ApplicationId,
    latest: Option<PlanVersion>,
    incoming: PlanVersion,
) -> Result<(), RepositoryError> {
    let expected = latest.map(PlanVersion::next).unwrap_or(PlanVersion::INITIAL);
    if incoming != expected {
        return Err(RepositoryError::Conflict(format!(
            "plan {} of '{}' cannot be appended; next version is {}",
            incoming, application, expected
        )));
    }
    Ok(())
}

#[derive(Default)]
struct PlanHistory {
    versions: BTreeMap<PlanVersion, Plan>,
    active: Option<PlanVersion>,
}

#[derive(Clone, Default)]
pub struct InMemoryPlanRepository {
    plans: Arc<RwLock<HashMap<ApplicationId, PlanHistory>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn append(&self, plan: &Plan) -> Result<(), RepositoryError> {
        let mut plans = self.plans.write();
        let history = plans.entry(plan.application().clone()).or_default();
        let latest = history.versions.keys().next_back().copied();
        check_next_version(plan.application(), latest, plan.version())?;
        history.versions.insert(plan.version(), plan.clone());
        Ok(())
    }

    async fn find_version(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<Option<Plan>, RepositoryError> {
        let plans = self.plans.read();
        Ok(plans
            .get(application)
            .and_then(|h| h.versions.get(&version))
            .cloned())
    }

    async fn latest(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError> {
        let plans = self.plans.read();
        Ok(plans
            .get(application)
            .and_then(|h| h.versions.values().next_back())
            .cloned())
    }

    async fn history(&self, application: &ApplicationId) -> Result<Vec<Plan>, RepositoryError> {
        let plans = self.plans.read();
        Ok(plans
            .get(application)
            .map(|h| h.versions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_active(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError> {
        let plans = self.plans.read();
        Ok(plans.get(application).and_then(|h| {
            h.active.and_then(|version| h.versions.get(&version)).cloned()
        }))
    }

    async fn mark_active(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<(), RepositoryError> {
        let mut plans = self.plans.write();
        let history = plans
            .get_mut(application)
            .filter(|h| h.versions.contains_key(&version))
            .ok_or_else(|| RepositoryError::NotFound(format!("plan {} of '{}'", version, application)))?;
        history.active = Some(version);
        Ok(())
    }
}

#[derive(Default)]
struct RolloutRecords {
    current: HashMap<ApplicationId, RolloutState>,
    archive: HashMap<ApplicationId, Vec<RolloutState>>,
}

#[derive(Clone, Default)]
pub struct InMemoryRolloutStateRepository {
    records: Arc<RwLock<RolloutRecords>>,
}

impl InMemoryRolloutStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RolloutStateRepository for InMemoryRolloutStateRepository {
    async fn save(&self, state: &RolloutState) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        records.current.insert(state.application.clone(), state.clone());
        Ok(())
    }

    async fn find_current(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<RolloutState>, RepositoryError> {
        let records = self.records.read();
        Ok(records.current.get(application).cloned())
    }

    async fn find_in_flight(&self) -> Result<Vec<RolloutState>, RepositoryError> {
        let records = self.records.read();
        let mut in_flight: Vec<RolloutState> = records
            .current
            .values()
            .filter(|s| !s.is_terminal())
            .cloned()
            .collect();
        in_flight.sort_by(|a, b| a.application.as_str().cmp(b.application.as_str()));
        Ok(in_flight)
    }

    async fn archive(&self, state: &RolloutState) -> Result<(), RepositoryError> {
        if !state.is_terminal() {
            return Err(RepositoryError::Conflict(format!(
                "rollout of '{}' is still {}",
                state.application, state.stage
            )));
        }
        let mut records = self.records.write();
        records.current.remove(&state.application);
        records
            .archive
            .entry(state.application.clone())
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn archived(&self, application: &ApplicationId) -> Result<Vec<RolloutState>, RepositoryError> {
        let records = self.records.read();
        Ok(records.archive.get(application).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::planner::Planner;
    use crate::domain::catalog::{ComponentCatalog, ComponentTemplate};
    use crate::domain::capability::CapabilityTag;
    use crate::domain::facts::{ingest_facts, RawAnalysis};
    use crate::domain::rollout::RolloutStage;
    use crate::domain::template::{ConfigFragment, FactPredicate, TemplateBehavior};
    use chrono::Utc;

    fn plans(n: usize) -> Vec<Plan> {
        let mut catalog = ComponentCatalog::new();
        catalog
            .register(ComponentTemplate::new(
                "flagd",
                CapabilityTag::Custom("flags".to_string()),
                TemplateBehavior::Custom {
                    when: FactPredicate::Always,
                    config: ConfigFragment::new(),
                },
            ))
            .unwrap();
        let facts = ingest_facts(RawAnalysis {
            application: "shop".to_string(),
            ..Default::default()
        })
        .unwrap();
        let planner = Planner::new(&catalog);
        let mut out: Vec<Plan> = Vec::new();
        for _ in 0..n {
            let next = planner.plan(&facts, out.last()).unwrap();
            out.push(next);
        }
        out
    }

    #[tokio::test]
    async fn test_plan_history_is_append_only() {
        let repo = InMemoryPlanRepository::new();
        let p = plans(3);
        let app = p[0].application().clone();

        repo.append(&p[0]).await.unwrap();
        assert!(matches!(repo.append(&p[0]).await, Err(RepositoryError::Conflict(_))));
        assert!(matches!(repo.append(&p[2]).await, Err(RepositoryError::Conflict(_))));
        repo.append(&p[1]).await.unwrap();

        assert_eq!(repo.history(&app).await.unwrap().len(), 2);
        assert_eq!(repo.latest(&app).await.unwrap().unwrap().version(), PlanVersion(2));
    }

    #[tokio::test]
    async fn test_mark_active_moves_pointer() {
        let repo = InMemoryPlanRepository::new();
        let p = plans(2);
        let app = p[0].application().clone();
        for plan in &p {
            repo.append(plan).await.unwrap();
        }

        assert!(repo.find_active(&app).await.unwrap().is_none());
        repo.mark_active(&app, PlanVersion(1)).await.unwrap();
        repo.mark_active(&app, PlanVersion(2)).await.unwrap();
        assert_eq!(repo.find_active(&app).await.unwrap().unwrap().version(), PlanVersion(2));
        assert!(repo.mark_active(&app, PlanVersion(9)).await.is_err());
    }

    #[tokio::test]
    async fn test_archive_requires_terminal_state() {
        let repo = InMemoryRolloutStateRepository::new();
        let app = ApplicationId::new("shop").unwrap();
        let mut state = RolloutState::new(app.clone(), PlanVersion(1), None, ["a"], Utc::now());
        repo.save(&state).await.unwrap();

        assert_eq!(repo.find_in_flight().await.unwrap().len(), 1);
        assert!(repo.archive(&state).await.is_err());

        state.transition(RolloutStage::RollingBack, Utc::now()).unwrap();
        state.transition(RolloutStage::Failed, Utc::now()).unwrap();
        repo.archive(&state).await.unwrap();

        assert!(repo.find_current(&app).await.unwrap().is_none());
        assert!(repo.find_in_flight().await.unwrap().is_empty());
        assert_eq!(repo.archived(&app).await.unwrap().len(), 1);
    }
}
