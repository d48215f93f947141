// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the rollout pipeline
//!
//! Drive plans through propose → approve → roll out against fake cluster,
//! renderer and metric collaborators, with tokio time paused so observation
//! windows and retry backoff elapse instantly.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use keel_core::application::deployment_service::{DeploymentError, DeploymentService};
use keel_core::application::planner::Planner;
use keel_core::application::repository_factory::Repositories;
use keel_core::application::rollout_controller::RolloutCollaborators;
use keel_core::domain::approval::{ApprovalError, Decision};
use keel_core::domain::capability::CapabilityTag;
use keel_core::domain::catalog::{ComponentCatalog, ComponentTemplate};
use keel_core::domain::clock::SystemClock;
use keel_core::domain::collaborators::{
    ClusterClient, CollaboratorError, ComponentRef, HealthStatus, ManifestRenderer, MetricSource,
    RenderedArtifact,
};
use keel_core::domain::events::DeploymentEvent;
use keel_core::domain::facts::{ingest_facts, ApplicationId, ContainerFacts, RawAnalysis};
use keel_core::domain::orchestrator_config::{InconclusivePolicy, OrchestratorConfigManifest, RetryPolicy};
use keel_core::domain::plan::{Plan, PlanVersion, PlannedComponent};
use keel_core::domain::repository::{PlanRepository, RepositoryError, RolloutStateRepository};
use keel_core::domain::rollout::{ComponentHealth, RollbackCause, RolloutError, RolloutStage, RolloutState};
use keel_core::domain::slo::{Comparator, MetricQuery, MetricSample, ServiceLevelObjective, Threshold};
use keel_core::domain::template::{ConfigFragment, FactPredicate, TemplateBehavior};
use keel_core::infrastructure::event_bus::EventBus;
use keel_core::infrastructure::repositories::{InMemoryPlanRepository, InMemoryRolloutStateRepository};

// ============================================================================
// Fakes
// ============================================================================

struct FakeRenderer;

#[async_trait]
impl ManifestRenderer for FakeRenderer {
    async fn render(&self, component: &PlannedComponent) -> Result<Vec<RenderedArtifact>, CollaboratorError> {
        Ok(vec![RenderedArtifact {
            component: component.name().to_string(),
            name: format!("{}.yaml", component.name()),
            content: serde_json::to_string(&component.config).unwrap_or_default(),
        }])
    }
}

#[derive(Default)]
struct FakeCluster {
    applied: Mutex<Vec<ComponentRef>>,
    attempts: Mutex<Vec<String>>,
    /// Applies to these components hang past every call timeout
    hanging: Mutex<HashSet<String>>,
    /// Applies to these components take half a second but succeed
    slow: Mutex<HashSet<String>>,
    never_ready: Mutex<HashSet<String>>,
}

impl FakeCluster {
    fn applied_versions(&self) -> Vec<(String, u64)> {
        self.applied
            .lock()
            .iter()
            .map(|r| (r.component.clone(), r.plan_version.as_u64()))
            .collect()
    }

    fn attempts_for(&self, component: &str) -> usize {
        self.attempts.lock().iter().filter(|c| c.as_str() == component).count()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn apply(&self, target: &ComponentRef, _artifact: &RenderedArtifact) -> Result<(), CollaboratorError> {
        self.attempts.lock().push(target.component.clone());
        let hangs = self.hanging.lock().contains(&target.component);
        if hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let slow = self.slow.lock().contains(&target.component);
        if slow {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        self.applied.lock().push(target.clone());
        Ok(())
    }

    async fn health_of(&self, target: &ComponentRef) -> Result<HealthStatus, CollaboratorError> {
        if self.never_ready.lock().contains(&target.component) {
            Ok(HealthStatus::NotReady)
        } else {
            Ok(HealthStatus::Ready)
        }
    }
}

/// Every query returns the current value, or nothing when unset
#[derive(Default)]
struct FakeMetrics {
    value: Mutex<Option<f64>>,
}

impl FakeMetrics {
    fn set(&self, value: Option<f64>) {
        *self.value.lock() = value;
    }
}

#[async_trait]
impl MetricSource for FakeMetrics {
    async fn query(&self, _query: &MetricQuery, _window: Duration) -> Result<Vec<MetricSample>, CollaboratorError> {
        let value = *self.value.lock();
        Ok(value
            .map(|value| vec![MetricSample::new(value, Utc::now())])
            .unwrap_or_default())
    }
}

/// Plan store whose active-pointer updates can be made to fail
#[derive(Default)]
struct FlakyPlans {
    inner: InMemoryPlanRepository,
    refuse_activation: Mutex<bool>,
}

#[async_trait]
impl PlanRepository for FlakyPlans {
    async fn append(&self, plan: &Plan) -> Result<(), RepositoryError> {
        self.inner.append(plan).await
    }

    async fn find_version(&self, application: &ApplicationId, version: PlanVersion) -> Result<Option<Plan>, RepositoryError> {
        self.inner.find_version(application, version).await
    }

    async fn latest(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError> {
        self.inner.latest(application).await
    }

    async fn history(&self, application: &ApplicationId) -> Result<Vec<Plan>, RepositoryError> {
        self.inner.history(application).await
    }

    async fn find_active(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError> {
        self.inner.find_active(application).await
    }

    async fn mark_active(&self, application: &ApplicationId, version: PlanVersion) -> Result<(), RepositoryError> {
        if *self.refuse_activation.lock() {
            return Err(RepositoryError::Database("connection reset".to_string()));
        }
        self.inner.mark_active(application, version).await
    }
}

/// Rollout state store that fails one save of a given stage, and can report
/// a stale in-flight listing
#[derive(Default)]
struct FlakyStates {
    inner: InMemoryRolloutStateRepository,
    fail_once_at: Mutex<Option<RolloutStage>>,
    stale_listing: Mutex<Option<Vec<RolloutState>>>,
}

#[async_trait]
impl RolloutStateRepository for FlakyStates {
    async fn save(&self, state: &RolloutState) -> Result<(), RepositoryError> {
        let fail = {
            let mut fail_once_at = self.fail_once_at.lock();
            if *fail_once_at == Some(state.stage) {
                fail_once_at.take();
                true
            } else {
                false
            }
        };
        if fail {
            return Err(RepositoryError::Database("connection reset".to_string()));
        }
        self.inner.save(state).await
    }

    async fn find_current(&self, application: &ApplicationId) -> Result<Option<RolloutState>, RepositoryError> {
        self.inner.find_current(application).await
    }

    async fn find_in_flight(&self) -> Result<Vec<RolloutState>, RepositoryError> {
        let stale = self.stale_listing.lock().clone();
        match stale {
            Some(listing) => Ok(listing),
            None => self.inner.find_in_flight().await,
        }
    }

    async fn archive(&self, state: &RolloutState) -> Result<(), RepositoryError> {
        self.inner.archive(state).await
    }

    async fn archived(&self, application: &ApplicationId) -> Result<Vec<RolloutState>, RepositoryError> {
        self.inner.archived(application).await
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    service: DeploymentService,
    cluster: Arc<FakeCluster>,
    metrics: Arc<FakeMetrics>,
    repositories: Repositories,
}

fn custom(name: &str, when: FactPredicate) -> ComponentTemplate {
    ComponentTemplate::new(
        name,
        CapabilityTag::Custom(name.to_string()),
        TemplateBehavior::Custom {
            when,
            config: ConfigFragment::new().with("replicas", 2_i64),
        },
    )
}

/// Three templates with no dependency between them
fn independent_catalog() -> ComponentCatalog {
    let mut catalog = ComponentCatalog::new();
    for name in ["alpha", "bravo", "charlie"] {
        catalog.register(custom(name, FactPredicate::Always)).unwrap();
    }
    catalog
}

fn catalog() -> ComponentCatalog {
    let mut catalog = ComponentCatalog::new();
    catalog.register(custom("gateway", FactPredicate::Always)).unwrap();
    catalog
        .register(custom("api", FactPredicate::Always).requires_template("gateway"))
        .unwrap();
    catalog.register(custom("worker", FactPredicate::Always)).unwrap();
    catalog
        .register(custom(
            "cache",
            FactPredicate::DependencyDetected("redis".to_string()),
        ))
        .unwrap();
    catalog
}

fn config(inconclusive: InconclusivePolicy) -> OrchestratorConfigManifest {
    let mut config = OrchestratorConfigManifest::default();
    config.spec.retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        call_timeout: Duration::from_secs(1),
    };
    config.spec.rollout.inconclusive = inconclusive;
    config.spec.rollout.readiness_timeout = Duration::from_secs(10);
    config.spec.rollout.health_poll_interval = Duration::from_secs(1);
    config.spec.guard.sample_interval = Duration::from_secs(10);
    config.spec.guard.min_samples = 2;
    config
}

fn harness_with(catalog: ComponentCatalog, repositories: Repositories, inconclusive: InconclusivePolicy) -> Harness {
    harness_configured(catalog, repositories, config(inconclusive))
}

fn harness_configured(catalog: ComponentCatalog, repositories: Repositories, config: OrchestratorConfigManifest) -> Harness {
    let cluster = Arc::new(FakeCluster::default());
    let metrics = Arc::new(FakeMetrics::default());
    metrics.set(Some(0.1));

    let service = DeploymentService::new(
        Arc::new(catalog),
        repositories.clone(),
        RolloutCollaborators {
            renderer: Arc::new(FakeRenderer),
            cluster: cluster.clone(),
            metrics: metrics.clone(),
        },
        Arc::new(SystemClock),
        EventBus::new(512),
        &config,
    );

    Harness {
        service,
        cluster,
        metrics,
        repositories,
    }
}

fn harness() -> Harness {
    harness_with(catalog(), Repositories::in_memory(), InconclusivePolicy::Abort)
}

fn latency_objective() -> ServiceLevelObjective {
    ServiceLevelObjective::new(
        "p99-latency",
        MetricQuery::new("histogram_quantile(0.99, http_request_duration_seconds)"),
        Threshold::new(Comparator::LessOrEqual, 0.5),
        Duration::from_secs(30),
    )
    .with_error_budget(0.2)
}

fn analysis(dependencies: &[&str]) -> RawAnalysis {
    RawAnalysis {
        application: "shop".to_string(),
        container: ContainerFacts {
            detected_dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        },
        objectives: vec![latency_objective()],
        ..Default::default()
    }
}

fn shop() -> ApplicationId {
    ApplicationId::new("shop").unwrap()
}

async fn approve_and_roll_out(h: &Harness, raw: RawAnalysis) -> RolloutState {
    let proposed = h.service.propose(raw).await.unwrap();
    h.service
        .decide(proposed.approval.id, Decision::Approve, "alice", None)
        .unwrap();
    let handle = h
        .service
        .roll_out(proposed.plan.application(), proposed.plan.version())
        .await
        .unwrap();
    handle.wait().await.unwrap()
}

async fn approve(h: &Harness, raw: RawAnalysis) -> PlanVersion {
    let proposed = h.service.propose(raw).await.unwrap();
    h.service
        .decide(proposed.approval.id, Decision::Approve, "alice", None)
        .unwrap();
    proposed.plan.version()
}

fn stages_entered(events: &[DeploymentEvent]) -> Vec<RolloutStage> {
    events
        .iter()
        .filter_map(|e| match e {
            DeploymentEvent::StageEntered { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn drain(receiver: &mut keel_core::infrastructure::event_bus::EventReceiver) -> Vec<DeploymentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_rollout_reaches_stable() {
    let h = harness();
    let mut events = h.service.events().subscribe();

    let state = approve_and_roll_out(&h, analysis(&[])).await;

    assert_eq!(state.stage, RolloutStage::Stable);
    assert!(state.components.values().all(|c| *c == ComponentHealth::Ready));
    assert_eq!(state.latest_verdict.as_ref().map(|v| v.label()), Some("pass"));
    assert_eq!(
        stages_entered(&drain(&mut events)),
        vec![
            RolloutStage::Staging,
            RolloutStage::Observing,
            RolloutStage::Promoting,
            RolloutStage::Stable
        ]
    );

    let active = h.service.active_plan(&shop()).await.unwrap().unwrap();
    assert_eq!(active.version(), PlanVersion(1));
    assert!(h.service.rollout_status(&shop()).await.unwrap().is_none());
    assert_eq!(h.repositories.rollouts.archived(&shop()).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dependencies_applied_before_dependents() {
    let h = harness();
    approve_and_roll_out(&h, analysis(&[])).await;

    let applied = h.cluster.applied_versions();
    let position = |name: &str| applied.iter().position(|(c, _)| c == name).unwrap();
    assert!(position("gateway") < position("api"));
}

#[tokio::test(start_paused = true)]
async fn test_breach_rolls_back_to_previous_plan() {
    let h = harness();
    let first = approve_and_roll_out(&h, analysis(&[])).await;
    assert_eq!(first.stage, RolloutStage::Stable);

    h.metrics.set(Some(0.9));
    let mut events = h.service.events().subscribe();
    let second = approve_and_roll_out(&h, analysis(&["redis"])).await;

    assert_eq!(second.plan_version, PlanVersion(2));
    assert_eq!(second.previous_version, Some(PlanVersion(1)));
    assert_eq!(second.stage, RolloutStage::RolledBack);
    assert_eq!(
        second.rollback_cause,
        Some(RollbackCause::Breach {
            objectives: vec!["p99-latency".to_string()]
        })
    );
    assert_eq!(
        stages_entered(&drain(&mut events)),
        vec![
            RolloutStage::Staging,
            RolloutStage::Observing,
            RolloutStage::RollingBack,
            RolloutStage::RolledBack
        ]
    );

    // previous plan re-applied and still active
    let applied = h.cluster.applied_versions();
    assert_eq!(applied.last().map(|(_, v)| *v), Some(1));
    let active = h.service.active_plan(&shop()).await.unwrap().unwrap();
    assert_eq!(active.version(), PlanVersion(1));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_apply_fails_staging_without_observing() {
    let h = harness();
    h.cluster.hanging.lock().insert("worker".to_string());
    let mut events = h.service.events().subscribe();

    let state = approve_and_roll_out(&h, analysis(&[])).await;

    assert_eq!(state.stage, RolloutStage::Failed);
    assert!(matches!(
        &state.rollback_cause,
        Some(RollbackCause::StagingFailed { component, .. }) if component == "worker"
    ));
    assert!(matches!(state.components["worker"], ComponentHealth::Failed { .. }));
    assert_eq!(h.cluster.attempts_for("worker"), 3);

    let events = drain(&mut events);
    assert_eq!(
        stages_entered(&events),
        vec![RolloutStage::Staging, RolloutStage::RollingBack, RolloutStage::Failed]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, DeploymentEvent::ComponentApplyFailed { component, .. } if component == "worker")));
    assert!(h.service.active_plan(&shop()).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_component_never_ready_fails_staging() {
    let h = harness();
    h.cluster.never_ready.lock().insert("api".to_string());

    let state = approve_and_roll_out(&h, analysis(&[])).await;

    assert_eq!(state.stage, RolloutStage::Failed);
    assert!(matches!(
        &state.rollback_cause,
        Some(RollbackCause::StagingFailed { component, reason }) if component == "api" && reason.contains("not ready")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_missing_samples_abort_by_default() {
    let h = harness();
    h.metrics.set(None);

    let state = approve_and_roll_out(&h, analysis(&[])).await;

    assert_eq!(state.stage, RolloutStage::Failed);
    assert_eq!(
        state.rollback_cause,
        Some(RollbackCause::Inconclusive {
            objectives: vec!["p99-latency".to_string()]
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_samples_proceed_when_configured() {
    let h = harness_with(catalog(), Repositories::in_memory(), InconclusivePolicy::Proceed);
    h.metrics.set(None);

    let state = approve_and_roll_out(&h, analysis(&[])).await;
    assert_eq!(state.stage, RolloutStage::Stable);
}

#[tokio::test(start_paused = true)]
async fn test_unapproved_plan_is_refused() {
    let h = harness();
    let proposed = h.service.propose(analysis(&[])).await.unwrap();

    let result = h.service.roll_out(&shop(), proposed.plan.version()).await;
    assert!(matches!(
        result,
        Err(DeploymentError::Rollout(RolloutError::NotApproved(
            ApprovalError::NotApproved { .. }
        )))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_second_rollout_while_in_progress_is_refused() {
    let h = harness();
    let proposed = h.service.propose(analysis(&[])).await.unwrap();
    h.service
        .decide(proposed.approval.id, Decision::Approve, "alice", None)
        .unwrap();

    let handle = h.service.roll_out(&shop(), PlanVersion(1)).await.unwrap();
    let second = h.service.roll_out(&shop(), PlanVersion(1)).await;
    assert!(matches!(
        second,
        Err(DeploymentError::Rollout(RolloutError::RolloutInProgress(_)))
    ));

    let state = handle.wait().await.unwrap();
    assert_eq!(state.stage, RolloutStage::Stable);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_staging_skips_everything() {
    let h = harness();
    let proposed = h.service.propose(analysis(&[])).await.unwrap();
    h.service
        .decide(proposed.approval.id, Decision::Approve, "alice", None)
        .unwrap();

    let handle = h.service.roll_out(&shop(), PlanVersion(1)).await.unwrap();
    handle.cancel();
    let state = handle.wait().await.unwrap();

    assert_eq!(state.stage, RolloutStage::Failed);
    assert_eq!(state.rollback_cause, Some(RollbackCause::Cancelled));
    assert!(state.components.values().all(|c| *c == ComponentHealth::Skipped));
    assert!(h.cluster.applied_versions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_observation_restores_previous() {
    let h = harness();
    approve_and_roll_out(&h, analysis(&[])).await;

    let proposed = h.service.propose(analysis(&["redis"])).await.unwrap();
    h.service
        .decide(proposed.approval.id, Decision::Approve, "alice", None)
        .unwrap();
    let handle = h.service.roll_out(&shop(), PlanVersion(2)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = h.service.rollout_status(&shop()).await.unwrap().unwrap();
    assert_eq!(status.stage, RolloutStage::Observing);
    assert!(h.service.cancel(&shop()));

    let state = handle.wait().await.unwrap();
    assert_eq!(state.stage, RolloutStage::RolledBack);
    assert_eq!(state.rollback_cause, Some(RollbackCause::Cancelled));
    assert!(!h.service.cancel(&shop()));
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_rollout_is_rolled_back_on_recovery() {
    let catalog = catalog();
    let repositories = Repositories::in_memory();

    let planner = Planner::new(&catalog);
    let v1 = planner
        .plan(&ingest_facts(analysis(&[])).unwrap(), None)
        .unwrap();
    let v2 = planner
        .plan(&ingest_facts(analysis(&["redis"])).unwrap(), Some(&v1))
        .unwrap();
    repositories.plans.append(&v1).await.unwrap();
    repositories.plans.append(&v2).await.unwrap();
    repositories.plans.mark_active(&shop(), PlanVersion(1)).await.unwrap();

    let mut stuck = RolloutState::new(
        shop(),
        PlanVersion(2),
        Some(PlanVersion(1)),
        v2.components().iter().map(|c| c.name()),
        Utc::now(),
    );
    stuck.transition(RolloutStage::Staging, Utc::now()).unwrap();
    stuck.transition(RolloutStage::Observing, Utc::now()).unwrap();
    repositories.rollouts.save(&stuck).await.unwrap();

    let h = harness_with(catalog, repositories, InconclusivePolicy::Abort);
    let recovered = h.service.controller().recover_interrupted().await.unwrap();

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].stage, RolloutStage::RolledBack);
    assert_eq!(recovered[0].rollback_cause, Some(RollbackCause::Interrupted));
    assert!(h.repositories.rollouts.find_in_flight().await.unwrap().is_empty());
    assert!(h
        .cluster
        .applied_versions()
        .iter()
        .all(|(_, version)| *version == 1));
}

#[tokio::test(start_paused = true)]
async fn test_finished_version_is_not_rolled_out_again() {
    let h = harness();
    let first = approve_and_roll_out(&h, analysis(&[])).await;
    assert_eq!(first.stage, RolloutStage::Stable);

    let again = h.service.roll_out(&shop(), PlanVersion(1)).await;
    assert!(matches!(
        again,
        Err(DeploymentError::Rollout(RolloutError::VersionAlreadyRolledOut {
            outcome: RolloutStage::Stable,
            ..
        }))
    ));
    assert_eq!(h.repositories.rollouts.archived(&shop()).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rolled_back_version_needs_a_new_plan() {
    let h = harness();
    approve_and_roll_out(&h, analysis(&[])).await;
    h.metrics.set(Some(0.9));
    let second = approve_and_roll_out(&h, analysis(&["redis"])).await;
    assert_eq!(second.stage, RolloutStage::RolledBack);

    h.metrics.set(Some(0.1));
    let retry = h.service.roll_out(&shop(), PlanVersion(2)).await;
    assert!(matches!(
        retry,
        Err(DeploymentError::Rollout(RolloutError::VersionAlreadyRolledOut {
            outcome: RolloutStage::RolledBack,
            ..
        }))
    ));

    let replanned = approve_and_roll_out(&h, analysis(&["redis"])).await;
    assert_eq!(replanned.plan_version, PlanVersion(3));
    assert_eq!(replanned.stage, RolloutStage::Stable);
}

#[tokio::test(start_paused = true)]
async fn test_older_version_cannot_replace_newer_active() {
    let h = harness();
    let v1 = approve(&h, analysis(&[])).await;
    let v2 = approve(&h, analysis(&["redis"])).await;

    let state = h.service.roll_out(&shop(), v2).await.unwrap().wait().await.unwrap();
    assert_eq!(state.stage, RolloutStage::Stable);

    let older = h.service.roll_out(&shop(), v1).await;
    assert!(matches!(
        older,
        Err(DeploymentError::Rollout(RolloutError::VersionSuperseded { active, .. })) if active == PlanVersion(2)
    ));
    let active = h.service.active_plan(&shop()).await.unwrap().unwrap();
    assert_eq!(active.version(), PlanVersion(2));
    assert!(!h.service.controller().is_running(&shop()));
}

#[tokio::test(start_paused = true)]
async fn test_promotion_failure_leaves_no_rollout_in_flight() {
    let plans = Arc::new(FlakyPlans::default());
    let repositories = Repositories {
        plans: plans.clone(),
        rollouts: Arc::new(InMemoryRolloutStateRepository::new()),
    };
    let h = harness_with(catalog(), repositories, InconclusivePolicy::Abort);
    assert_eq!(approve_and_roll_out(&h, analysis(&[])).await.stage, RolloutStage::Stable);

    *plans.refuse_activation.lock() = true;
    let second = approve_and_roll_out(&h, analysis(&["redis"])).await;

    // v1 was re-applied, but the pointer could not be confirmed
    assert_eq!(second.stage, RolloutStage::Failed);
    assert!(matches!(second.rollback_cause, Some(RollbackCause::PromotionFailed { .. })));
    assert!(h.repositories.rollouts.find_in_flight().await.unwrap().is_empty());
    assert!(h.service.rollout_status(&shop()).await.unwrap().is_none());

    *plans.refuse_activation.lock() = false;
    let third = approve_and_roll_out(&h, analysis(&["redis"])).await;
    assert_eq!(third.plan_version, PlanVersion(3));
    assert_eq!(third.previous_version, Some(PlanVersion(1)));
    assert_eq!(third.stage, RolloutStage::Stable);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_mid_rollout_is_settled() {
    let states = Arc::new(FlakyStates::default());
    *states.fail_once_at.lock() = Some(RolloutStage::Observing);
    let repositories = Repositories {
        plans: Arc::new(InMemoryPlanRepository::new()),
        rollouts: states.clone(),
    };
    let h = harness_with(catalog(), repositories, InconclusivePolicy::Abort);
    let version = approve(&h, analysis(&[])).await;

    let result = h.service.roll_out(&shop(), version).await.unwrap().wait().await;
    assert!(matches!(result, Err(RolloutError::Repository(_))));

    assert!(states.find_in_flight().await.unwrap().is_empty());
    let archived = states.archived(&shop()).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].stage, RolloutStage::Failed);
    assert!(matches!(archived[0].rollback_cause, Some(RollbackCause::Aborted { .. })));

    // the application is not wedged
    let next = approve(&h, analysis(&[])).await;
    let state = h.service.roll_out(&shop(), next).await.unwrap().wait().await.unwrap();
    assert_eq!(state.stage, RolloutStage::Stable);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_staging_skips_unstarted_components() {
    let mut config = config(InconclusivePolicy::Abort);
    config.spec.rollout.apply_concurrency = 1;
    let h = harness_configured(independent_catalog(), Repositories::in_memory(), config);
    h.cluster.slow.lock().insert("alpha".to_string());
    let mut events = h.service.events().subscribe();

    let version = approve(&h, analysis(&[])).await;
    let handle = h.service.roll_out(&shop(), version).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = h.service.rollout_status(&shop()).await.unwrap().unwrap();
    assert_eq!(status.stage, RolloutStage::Staging);
    assert!(h.service.cancel(&shop()));

    let state = handle.wait().await.unwrap();
    assert_eq!(state.stage, RolloutStage::Failed);
    assert_eq!(state.rollback_cause, Some(RollbackCause::Cancelled));
    // the in-flight apply finished; the rest never started
    assert_eq!(state.components["alpha"], ComponentHealth::Applied);
    assert_eq!(state.components["bravo"], ComponentHealth::Skipped);
    assert_eq!(state.components["charlie"], ComponentHealth::Skipped);
    assert_eq!(h.cluster.applied_versions(), vec![("alpha".to_string(), 1)]);
    assert_eq!(
        stages_entered(&drain(&mut events)),
        vec![RolloutStage::Staging, RolloutStage::RollingBack, RolloutStage::Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_in_independent_wave_rolls_back_without_observing() {
    let h = harness_with(independent_catalog(), Repositories::in_memory(), InconclusivePolicy::Abort);
    h.cluster.hanging.lock().insert("charlie".to_string());
    let mut events = h.service.events().subscribe();

    let state = approve_and_roll_out(&h, analysis(&[])).await;

    assert_eq!(state.stage, RolloutStage::Failed);
    assert!(matches!(
        &state.rollback_cause,
        Some(RollbackCause::StagingFailed { component, .. }) if component == "charlie"
    ));
    assert_eq!(state.components["alpha"], ComponentHealth::Applied);
    assert_eq!(state.components["bravo"], ComponentHealth::Applied);
    assert!(matches!(state.components["charlie"], ComponentHealth::Failed { .. }));
    assert_eq!(h.cluster.attempts_for("charlie"), 3);

    let events = drain(&mut events);
    assert_eq!(
        stages_entered(&events),
        vec![RolloutStage::Staging, RolloutStage::RollingBack, RolloutStage::Failed]
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, DeploymentEvent::VerdictObserved { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_leaves_rollouts_running_in_this_process() {
    let h = harness();
    let version = approve(&h, analysis(&[])).await;
    let handle = h.service.roll_out(&shop(), version).await.unwrap();
    assert!(h.service.controller().is_running(&shop()));

    let recovered = h.service.controller().recover_interrupted().await.unwrap();
    assert!(recovered.is_empty());

    let state = handle.wait().await.unwrap();
    assert_eq!(state.stage, RolloutStage::Stable);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_ignores_rollout_finished_after_listing() {
    let states = Arc::new(FlakyStates::default());
    let mut finished = RolloutState::new(shop(), PlanVersion(1), None, ["gateway"], Utc::now());
    finished.transition(RolloutStage::Staging, Utc::now()).unwrap();
    *states.stale_listing.lock() = Some(vec![finished]);

    let repositories = Repositories {
        plans: Arc::new(InMemoryPlanRepository::new()),
        rollouts: states.clone(),
    };
    let h = harness_with(catalog(), repositories, InconclusivePolicy::Abort);

    let recovered = h.service.controller().recover_interrupted().await.unwrap();
    assert!(recovered.is_empty());
    assert!(states.archived(&shop()).await.unwrap().is_empty());
    assert!(h.cluster.applied_versions().is_empty());
}
