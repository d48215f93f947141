// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Service
//!
//! Application service tying the pipeline together:
//! facts → plan → persisted version → approval record → rollout.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Orchestrate one planning cycle and hand approved
//!   versions to the rollout controller
//! - **Collaborators:**
//!   - Domain: FactStore, Plan, ApprovalRecord, RolloutState
//!   - Application: Planner, ApprovalGate, RolloutController
//!   - Infrastructure: PlanRepository, RolloutStateRepository, EventBus

use anyhow::Context;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::approval_gate::ApprovalGate;
use crate::application::planner::{Planner, PlanningError};
use crate::application::repository_factory::{connect_repositories, Repositories};
use crate::application::rollout_controller::{RolloutCollaborators, RolloutController, RolloutHandle};
use crate::domain::approval::{ApprovalError, ApprovalId, ApprovalRecord, Decision};
use crate::domain::catalog::ComponentCatalog;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::events::DeploymentEvent;
use crate::domain::facts::{ingest_facts, ApplicationId, FactError, RawAnalysis};
use crate::domain::orchestrator_config::OrchestratorConfigManifest;
use crate::domain::plan::{Plan, PlanVersion};
use crate::domain::repository::RepositoryError;
use crate::domain::rollout::{RolloutError, RolloutState};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Invalid facts: {0}")]
    Facts(#[from] FactError),

    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// A freshly planned version waiting for a decision
#[derive(Debug, Clone)]
pub struct ProposedPlan {
    pub plan: Plan,
    pub approval: ApprovalRecord,
}

pub struct DeploymentService {
    catalog: Arc<ComponentCatalog>,
    repositories: Repositories,
    approvals: Arc<ApprovalGate>,
    controller: Arc<RolloutController>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl DeploymentService {
    pub fn new(
        catalog: Arc<ComponentCatalog>,
        repositories: Repositories,
        collaborators: RolloutCollaborators,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        config: &OrchestratorConfigManifest,
    ) -> Self {
        let approvals = Arc::new(ApprovalGate::new(
            repositories.plans.clone(),
            clock.clone(),
            config.spec.approval.clone(),
            event_bus.clone(),
        ));
        let controller = Arc::new(RolloutController::new(
            &repositories,
            approvals.clone(),
            collaborators,
            clock.clone(),
            event_bus.clone(),
            &config.spec,
        ));

        Self {
            catalog,
            repositories,
            approvals,
            controller,
            clock,
            event_bus,
        }
    }

    /// Build the service from configuration: connect storage, then roll back
    /// any rollout a previous process left unfinished
    pub async fn bootstrap(
        config: &OrchestratorConfigManifest,
        catalog: ComponentCatalog,
        collaborators: RolloutCollaborators,
    ) -> anyhow::Result<Self> {
        let backend = config.spec.storage.backend()?;
        let repositories = connect_repositories(&backend)
            .await
            .context("Failed to initialize repositories")?;

        let service = Self::new(
            Arc::new(catalog),
            repositories,
            collaborators,
            Arc::new(SystemClock),
            EventBus::with_default_capacity(),
            config,
        );

        let recovered = service
            .controller
            .recover_interrupted()
            .await
            .context("Failed to recover interrupted rollouts")?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "Rolled back rollouts interrupted by a restart");
        }

        Ok(service)
    }

    /// Ingest facts, plan against the latest stored version, persist the new
    /// version and open an approval record for it
    pub async fn propose(&self, raw: RawAnalysis) -> Result<ProposedPlan, DeploymentError> {
        let facts = ingest_facts(raw)?;
        let latest = self.repositories.plans.latest(facts.application()).await?;

        let plan = match Planner::new(&self.catalog).plan(&facts, latest.as_ref()) {
            Ok(plan) => plan,
            Err(e) => {
                metrics::counter!("keel_planning_failures_total", "kind" => e.kind()).increment(1);
                warn!(application = %facts.application(), error = %e, "Planning failed");
                return Err(e.into());
            }
        };

        self.repositories.plans.append(&plan).await?;
        metrics::counter!("keel_plans_total").increment(1);
        info!(
            application = %plan.application(),
            version = %plan.version(),
            components = plan.components().len(),
            objectives = plan.objectives().len(),
            notes = plan.notes().len(),
            "Plan produced"
        );
        self.event_bus.publish(DeploymentEvent::PlanProduced {
            application: plan.application().clone(),
            version: plan.version(),
            fingerprint: plan.fingerprint(),
            components: plan.components().len(),
            produced_at: self.clock.now(),
        });

        let approval = self.approvals.submit(&plan).await?;
        Ok(ProposedPlan { plan, approval })
    }

    pub fn decide(
        &self,
        id: ApprovalId,
        decision: Decision,
        decided_by: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRecord, DeploymentError> {
        Ok(self.approvals.decide(id, decision, decided_by, reason)?)
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalRecord> {
        self.approvals.pending()
    }

    pub async fn roll_out(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<RolloutHandle, DeploymentError> {
        Ok(self.controller.start(application, version).await?)
    }

    pub fn cancel(&self, application: &ApplicationId) -> bool {
        self.controller.cancel(application)
    }

    pub async fn rollout_status(&self, application: &ApplicationId) -> Result<Option<RolloutState>, DeploymentError> {
        Ok(self.controller.status(application).await?)
    }

    pub async fn history(&self, application: &ApplicationId) -> Result<Vec<Plan>, DeploymentError> {
        Ok(self.repositories.plans.history(application).await?)
    }

    pub async fn active_plan(&self, application: &ApplicationId) -> Result<Option<Plan>, DeploymentError> {
        Ok(self.repositories.plans.find_active(application).await?)
    }

    pub fn approvals(&self) -> &Arc<ApprovalGate> {
        &self.approvals
    }

    pub fn controller(&self) -> &Arc<RolloutController> {
        &self.controller
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }
}
