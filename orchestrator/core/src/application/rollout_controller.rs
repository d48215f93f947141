// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rollout Controller
//!
//! Drives one approved plan version through
//! `Pending → Staging → Observing → Promoting → Stable`, leaving through
//! `RollingBack → RolledBack | Failed` on a staging failure, a guard abort or
//! an operator cancel.
//!
//! Each rollout runs as its own task. During `Observing` a second task (the
//! [`SloGuard`]) samples the plan's objectives and publishes the latest report
//! on a `watch` channel; the controller reacts to a breach immediately and
//! otherwise decides once the observation window has elapsed.
//!
//! Components are applied in dependency waves: a component only starts once
//! every component it depends on has been applied, and the components of one
//! wave are applied concurrently up to `apply_concurrency`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Staged application, observation, promotion and rollback

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::approval_gate::ApprovalGate;
use crate::application::repository_factory::Repositories;
use crate::application::retry::with_retry;
use crate::application::slo_guard::SloGuard;
use crate::domain::clock::Clock;
use crate::domain::collaborators::{ClusterClient, ComponentRef, HealthStatus, ManifestRenderer, MetricSource};
use crate::domain::events::DeploymentEvent;
use crate::domain::facts::ApplicationId;
use crate::domain::orchestrator_config::{
    GuardPolicy, InconclusivePolicy, OrchestratorConfigSpec, RetryPolicy, RolloutPolicy,
};
use crate::domain::plan::{Plan, PlanVersion, PlannedComponent};
use crate::domain::repository::{PlanRepository, RolloutStateRepository};
use crate::domain::rollout::{ComponentHealth, RollbackCause, RolloutError, RolloutStage, RolloutState};
use crate::domain::slo::GuardVerdict;
use crate::infrastructure::event_bus::EventBus;

/// External systems the controller drives
#[derive(Clone)]
pub struct RolloutCollaborators {
    pub renderer: Arc<dyn ManifestRenderer>,
    pub cluster: Arc<dyn ClusterClient>,
    pub metrics: Arc<dyn MetricSource>,
}

/// A running rollout
pub struct RolloutHandle {
    pub application: ApplicationId,
    pub version: PlanVersion,
    cancel: CancellationToken,
    task: JoinHandle<Result<RolloutState, RolloutError>>,
}

impl RolloutHandle {
    /// Request cancellation; in-flight applies finish first
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the rollout to reach a terminal stage
    pub async fn wait(self) -> Result<RolloutState, RolloutError> {
        self.task
            .await
            .map_err(|e| RolloutError::TaskFailed(e.to_string()))?
    }
}

enum Advance {
    Continue,
    RollBack(RollbackCause),
}

enum ApplyOutcome {
    Applied { attempts: u32 },
    Failed { reason: String },
    Skipped,
}

pub struct RolloutController {
    plans: Arc<dyn PlanRepository>,
    states: Arc<dyn RolloutStateRepository>,
    approvals: Arc<ApprovalGate>,
    collaborators: RolloutCollaborators,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    rollout: RolloutPolicy,
    retry: RetryPolicy,
    guard: GuardPolicy,
    active: Mutex<HashMap<ApplicationId, CancellationToken>>,
}

impl RolloutController {
    pub fn new(
        repositories: &Repositories,
        approvals: Arc<ApprovalGate>,
        collaborators: RolloutCollaborators,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        config: &OrchestratorConfigSpec,
    ) -> Self {
        Self {
            plans: repositories.plans.clone(),
            states: repositories.rollouts.clone(),
            approvals,
            collaborators,
            clock,
            event_bus,
            rollout: config.rollout.clone(),
            retry: config.retry.clone(),
            guard: config.guard.clone(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start rolling out an approved plan version.
    ///
    /// Fails with `NotApproved` unless the approval gate holds an Approved
    /// record for the version, with `RolloutInProgress` while another
    /// rollout of the application is non-terminal, and with
    /// `VersionAlreadyRolledOut` / `VersionSuperseded` for a version that
    /// already finished or is not newer than the active plan.
    pub async fn start(
        self: &Arc<Self>,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<RolloutHandle, RolloutError> {
        self.approvals.ensure_approved(application, version)?;

        let plan = self
            .plans
            .find_version(application, version)
            .await?
            .ok_or_else(|| RolloutError::PlanNotFound {
                application: application.clone(),
                version,
            })?;

        let cancel = self.reserve(application)?;
        let (state, previous) = match self.prepare(&plan).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.release(application);
                return Err(e);
            }
        };

        info!(
            application = %application,
            version = %version,
            previous = ?state.previous_version,
            components = plan.components().len(),
            "Starting rollout"
        );

        let this = Arc::clone(self);
        let token = cancel.clone();
        let app = application.clone();
        let task = tokio::spawn(async move {
            let result = match this.drive(plan, state, previous, token).await {
                Ok(state) => Ok(state),
                Err(e) => {
                    error!(application = %app, error = %e, "Rollout aborted before reaching a terminal stage");
                    this.abandon(&app, version, &e).await;
                    Err(e)
                }
            };
            this.release(&app);
            result
        });

        Ok(RolloutHandle {
            application: application.clone(),
            version,
            cancel,
            task,
        })
    }

    /// Cancel the running rollout of an application. Returns false when none
    /// is running in this process.
    pub fn cancel(&self, application: &ApplicationId) -> bool {
        match self.active.lock().get(application) {
            Some(token) => {
                info!(application = %application, "Rollout cancel requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, application: &ApplicationId) -> bool {
        self.active.lock().contains_key(application)
    }

    /// Current (non-archived) rollout state of an application
    pub async fn status(&self, application: &ApplicationId) -> Result<Option<RolloutState>, RolloutError> {
        Ok(self.states.find_current(application).await?)
    }

    /// Roll back every persisted non-terminal rollout not owned by this
    /// process. Call once at startup.
    ///
    /// Each application is reserved while it is recovered, so a concurrent
    /// `start` fails with `RolloutInProgress` instead of racing the rollback.
    pub async fn recover_interrupted(&self) -> Result<Vec<RolloutState>, RolloutError> {
        let mut recovered = Vec::new();

        for candidate in self.states.find_in_flight().await? {
            let application = candidate.application.clone();
            if self.reserve(&application).is_err() {
                debug!(application = %application, "Rollout running in this process; not recovering");
                continue;
            }

            let result = self.recover(&candidate).await;
            self.release(&application);
            if let Some(state) = result? {
                recovered.push(state);
            }
        }

        Ok(recovered)
    }

    async fn recover(&self, candidate: &RolloutState) -> Result<Option<RolloutState>, RolloutError> {
        // the snapshot may have finished between listing and reserving
        let state = match self.states.find_current(&candidate.application).await? {
            Some(state) if !state.is_terminal() && state.plan_version == candidate.plan_version => state,
            _ => return Ok(None),
        };

        warn!(
            application = %state.application,
            version = %state.plan_version,
            stage = %state.stage,
            "Found interrupted rollout"
        );
        let previous = match state.previous_version {
            Some(version) => self.plans.find_version(&state.application, version).await?,
            None => None,
        };
        self.roll_back(state, previous.as_ref(), RollbackCause::Interrupted)
            .await
            .map(Some)
    }

    /// Settle a rollout whose drive loop failed, so that no non-terminal
    /// state outlives its task. Rolls back when storage allows it, otherwise
    /// forces `Failed`.
    async fn abandon(&self, application: &ApplicationId, version: PlanVersion, failure: &RolloutError) {
        let state = match self.states.find_current(application).await {
            Ok(Some(state)) if !state.is_terminal() && state.plan_version == version => state,
            Ok(_) => return,
            Err(e) => {
                error!(application = %application, error = %e, "Cannot load state of aborted rollout");
                return;
            }
        };

        let cause = RollbackCause::Aborted {
            reason: failure.to_string(),
        };
        let previous = match state.previous_version {
            Some(previous) => self.plans.find_version(application, previous).await.ok().flatten(),
            None => None,
        };
        let rolled_back = self
            .roll_back(state.clone(), previous.as_ref(), cause.clone())
            .await;
        let Err(e) = rolled_back else {
            return;
        };

        warn!(application = %application, error = %e, "Rollback of aborted rollout failed; marking it failed");
        let mut state = state;
        let now = self.clock.now();
        state.rollback_cause.get_or_insert(cause);
        skip_pending(&mut state, now);
        let entered = if state.stage == RolloutStage::RollingBack {
            Ok(())
        } else {
            state.transition(RolloutStage::RollingBack, now)
        };
        if let Err(e) = entered.and_then(|()| state.transition(RolloutStage::Failed, now)) {
            error!(application = %application, error = %e, "Cannot mark aborted rollout failed");
            return;
        }
        if let Err(e) = self.finish(state).await {
            error!(application = %application, error = %e, "Aborted rollout left in storage");
        }
    }

    fn reserve(&self, application: &ApplicationId) -> Result<CancellationToken, RolloutError> {
        let mut active = self.active.lock();
        if active.contains_key(application) {
            return Err(RolloutError::RolloutInProgress(application.clone()));
        }
        let token = CancellationToken::new();
        active.insert(application.clone(), token.clone());
        Ok(token)
    }

    fn release(&self, application: &ApplicationId) {
        self.active.lock().remove(application);
    }

    async fn prepare(&self, plan: &Plan) -> Result<(RolloutState, Option<Plan>), RolloutError> {
        let application = plan.application();

        if let Some(current) = self.states.find_current(application).await? {
            if !current.is_terminal() {
                return Err(RolloutError::RolloutInProgress(application.clone()));
            }
        }

        let finished = self
            .states
            .archived(application)
            .await?
            .into_iter()
            .rev()
            .find(|archived| archived.plan_version == plan.version());
        if let Some(archived) = finished {
            return Err(RolloutError::VersionAlreadyRolledOut {
                application: application.clone(),
                version: plan.version(),
                outcome: archived.stage,
            });
        }

        let previous = self.plans.find_active(application).await?;
        if let Some(active) = previous.as_ref().map(Plan::version) {
            if active >= plan.version() {
                return Err(RolloutError::VersionSuperseded {
                    application: application.clone(),
                    version: plan.version(),
                    active,
                });
            }
        }
        let state = RolloutState::new(
            application.clone(),
            plan.version(),
            previous.as_ref().map(Plan::version),
            plan.components().iter().map(PlannedComponent::name),
            self.clock.now(),
        );
        self.states.save(&state).await?;

        Ok((state, previous))
    }

    async fn drive(
        &self,
        plan: Plan,
        mut state: RolloutState,
        previous: Option<Plan>,
        cancel: CancellationToken,
    ) -> Result<RolloutState, RolloutError> {
        if cancel.is_cancelled() {
            return self.roll_back(state, previous.as_ref(), RollbackCause::Cancelled).await;
        }

        self.enter(&mut state, RolloutStage::Staging).await?;
        if let Advance::RollBack(cause) = self.stage(&plan, &mut state, &cancel).await? {
            return self.roll_back(state, previous.as_ref(), cause).await;
        }
        if let Advance::RollBack(cause) = self.await_ready(&plan, &mut state, &cancel).await? {
            return self.roll_back(state, previous.as_ref(), cause).await;
        }

        self.enter(&mut state, RolloutStage::Observing).await?;
        if let Advance::RollBack(cause) = self.observe(&plan, &mut state, &cancel).await? {
            return self.roll_back(state, previous.as_ref(), cause).await;
        }

        self.enter(&mut state, RolloutStage::Promoting).await?;
        if let Err(e) = self.plans.mark_active(plan.application(), plan.version()).await {
            error!(application = %state.application, error = %e, "Failed to mark plan active");
            let cause = RollbackCause::PromotionFailed { reason: e.to_string() };
            return self.roll_back(state, previous.as_ref(), cause).await;
        }
        self.enter(&mut state, RolloutStage::Stable).await?;

        self.finish(state).await
    }

    /// Apply every component wave by wave
    async fn stage(
        &self,
        plan: &Plan,
        state: &mut RolloutState,
        cancel: &CancellationToken,
    ) -> Result<Advance, RolloutError> {
        for wave in dependency_waves(plan) {
            if cancel.is_cancelled() {
                break;
            }

            let applies: Vec<_> = wave
                .into_iter()
                .map(|component| async move {
                    let outcome = self.apply_component(plan, component, Some(cancel)).await;
                    (component.name().to_string(), outcome)
                })
                .collect();
            let mut outcomes: Vec<(String, ApplyOutcome)> = stream::iter(applies)
                .buffer_unordered(self.rollout.apply_concurrency.max(1))
                .collect()
                .await;
            outcomes.sort_by(|a, b| a.0.cmp(&b.0));

            let mut failure = None;
            for (name, outcome) in outcomes {
                let now = self.clock.now();
                match outcome {
                    ApplyOutcome::Applied { attempts } => {
                        state.set_health(&name, ComponentHealth::Applied, now);
                        self.event_bus.publish(DeploymentEvent::ComponentApplied {
                            application: state.application.clone(),
                            version: state.plan_version,
                            component: name,
                            attempts,
                            applied_at: now,
                        });
                    }
                    ApplyOutcome::Failed { reason } => {
                        warn!(
                            application = %state.application,
                            component = %name,
                            reason = %reason,
                            "Component apply failed"
                        );
                        state.set_health(&name, ComponentHealth::Failed { reason: reason.clone() }, now);
                        self.event_bus.publish(DeploymentEvent::ComponentApplyFailed {
                            application: state.application.clone(),
                            version: state.plan_version,
                            component: name.clone(),
                            reason: reason.clone(),
                            failed_at: now,
                        });
                        failure.get_or_insert((name, reason));
                    }
                    ApplyOutcome::Skipped => state.set_health(&name, ComponentHealth::Skipped, now),
                }
            }
            self.states.save(state).await?;

            if let Some((component, reason)) = failure {
                skip_pending(state, self.clock.now());
                return Ok(Advance::RollBack(RollbackCause::StagingFailed { component, reason }));
            }
        }

        if cancel.is_cancelled() {
            skip_pending(state, self.clock.now());
            return Ok(Advance::RollBack(RollbackCause::Cancelled));
        }
        Ok(Advance::Continue)
    }

    /// Render and apply one component. `None` for `cancel` means the apply is
    /// part of a rollback and must not be skipped.
    async fn apply_component(
        &self,
        plan: &Plan,
        component: &PlannedComponent,
        cancel: Option<&CancellationToken>,
    ) -> ApplyOutcome {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return ApplyOutcome::Skipped;
        }

        let renderer = &self.collaborators.renderer;
        let artifacts = match with_retry(&self.retry, "render", || renderer.render(component)).await {
            Ok(rendered) => rendered.value,
            Err(e) => {
                return ApplyOutcome::Failed {
                    reason: format!("render failed: {}", e),
                }
            }
        };

        let target = ComponentRef {
            application: plan.application().clone(),
            plan_version: plan.version(),
            component: component.name().to_string(),
        };
        let cluster = &self.collaborators.cluster;
        let mut attempts = 0;
        for artifact in &artifacts {
            match with_retry(&self.retry, "apply", || cluster.apply(&target, artifact)).await {
                Ok(done) => attempts += done.attempts,
                Err(e) => {
                    return ApplyOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        }

        debug!(target = %target, artifacts = artifacts.len(), attempts, "Component applied");
        ApplyOutcome::Applied { attempts }
    }

    /// Poll health until every component is Ready or the readiness timeout
    /// passes
    async fn await_ready(
        &self,
        plan: &Plan,
        state: &mut RolloutState,
        cancel: &CancellationToken,
    ) -> Result<Advance, RolloutError> {
        let deadline = Instant::now() + self.rollout.readiness_timeout;
        let cluster = &self.collaborators.cluster;

        loop {
            let waiting: Vec<String> = state
                .components
                .iter()
                .filter(|(_, health)| **health != ComponentHealth::Ready)
                .map(|(name, _)| name.clone())
                .collect();
            if waiting.is_empty() {
                return Ok(Advance::Continue);
            }

            for name in &waiting {
                let target = ComponentRef {
                    application: plan.application().clone(),
                    plan_version: plan.version(),
                    component: name.clone(),
                };
                let now = self.clock.now();
                match with_retry(&self.retry, "health_check", || cluster.health_of(&target)).await {
                    Ok(checked) => {
                        let health = match checked.value {
                            HealthStatus::Ready => ComponentHealth::Ready,
                            HealthStatus::NotReady => ComponentHealth::NotReady,
                        };
                        state.set_health(name, health, now);
                    }
                    Err(e) => {
                        let reason = format!("health check failed: {}", e);
                        state.set_health(name, ComponentHealth::Failed { reason: reason.clone() }, now);
                        self.states.save(state).await?;
                        return Ok(Advance::RollBack(RollbackCause::StagingFailed {
                            component: name.clone(),
                            reason,
                        }));
                    }
                }
            }
            self.states.save(state).await?;

            let not_ready = state
                .components
                .iter()
                .find(|(_, health)| **health != ComponentHealth::Ready)
                .map(|(name, _)| name.clone());
            let Some(component) = not_ready else {
                return Ok(Advance::Continue);
            };

            if Instant::now() >= deadline {
                return Ok(Advance::RollBack(RollbackCause::StagingFailed {
                    component,
                    reason: format!("not ready after {:?}", self.rollout.readiness_timeout),
                }));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(Advance::RollBack(RollbackCause::Cancelled)),
                _ = sleep(self.rollout.health_poll_interval) => {}
            }
        }
    }

    /// Run the guard for the observation window and turn its verdicts into a
    /// decision
    async fn observe(
        &self,
        plan: &Plan,
        state: &mut RolloutState,
        cancel: &CancellationToken,
    ) -> Result<Advance, RolloutError> {
        let window = plan
            .observation_window()
            .unwrap_or(self.rollout.default_observation_window);
        let deadline = Instant::now() + window;

        let guard_cancel = cancel.child_token();
        let guard = SloGuard::new(
            plan.objectives(),
            Arc::clone(&self.collaborators.metrics),
            self.guard.clone(),
            self.retry.clone(),
        )
        .spawn(guard_cancel.clone());
        let mut verdicts = guard.verdicts;
        let mut guard_alive = true;

        info!(
            application = %state.application,
            version = %state.plan_version,
            window = ?window,
            objectives = plan.objectives().len(),
            "Observing rollout"
        );

        let advance = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Advance::RollBack(RollbackCause::Cancelled),
                changed = verdicts.changed(), if guard_alive => {
                    if changed.is_err() {
                        guard_alive = false;
                        continue;
                    }
                    let report = verdicts.borrow_and_update().clone();
                    self.record_verdict(state, &report.verdict).await;
                    if let GuardVerdict::Breach { objectives } = report.verdict {
                        break Advance::RollBack(RollbackCause::Breach { objectives });
                    }
                }
                _ = sleep_until(deadline) => {
                    let verdict = verdicts.borrow().verdict.clone();
                    break self.decide_at_deadline(state, verdict);
                }
            }
        };

        guard_cancel.cancel();
        if let Err(e) = guard.task.await {
            warn!(error = %e, "SLO guard task ended abnormally");
        }
        Ok(advance)
    }

    fn decide_at_deadline(&self, state: &RolloutState, verdict: GuardVerdict) -> Advance {
        match verdict {
            GuardVerdict::Pass => Advance::Continue,
            GuardVerdict::Breach { objectives } => Advance::RollBack(RollbackCause::Breach { objectives }),
            GuardVerdict::Inconclusive { objectives } => match self.rollout.inconclusive {
                InconclusivePolicy::Abort => Advance::RollBack(RollbackCause::Inconclusive { objectives }),
                InconclusivePolicy::Proceed => {
                    warn!(
                        application = %state.application,
                        objectives = ?objectives,
                        "Observation window ended inconclusive; proceeding by policy"
                    );
                    Advance::Continue
                }
            },
        }
    }

    async fn record_verdict(&self, state: &mut RolloutState, verdict: &GuardVerdict) {
        let now = self.clock.now();
        state.latest_verdict = Some(verdict.clone());
        state.updated_at = now;

        if let GuardVerdict::Breach { objectives } = verdict {
            warn!(application = %state.application, objectives = ?objectives, "SLO breach observed");
        } else {
            debug!(application = %state.application, verdict = %verdict, "Guard verdict");
        }
        self.event_bus.publish(DeploymentEvent::VerdictObserved {
            application: state.application.clone(),
            version: state.plan_version,
            verdict: verdict.clone(),
            observed_at: now,
        });
        if let Err(e) = self.states.save(state).await {
            warn!(application = %state.application, error = %e, "Failed to persist guard verdict");
        }
    }

    async fn roll_back(
        &self,
        mut state: RolloutState,
        previous: Option<&Plan>,
        cause: RollbackCause,
    ) -> Result<RolloutState, RolloutError> {
        let cause = state.rollback_cause.get_or_insert(cause).clone();
        warn!(
            application = %state.application,
            version = %state.plan_version,
            cause = %cause,
            "Rolling back"
        );

        skip_pending(&mut state, self.clock.now());
        if state.stage != RolloutStage::RollingBack {
            self.enter(&mut state, RolloutStage::RollingBack).await?;
        }

        let terminal = match previous {
            None => {
                warn!(application = %state.application, "No previously active plan to restore");
                RolloutStage::Failed
            }
            Some(previous) => match self.restore(previous).await {
                Ok(()) => match self
                    .plans
                    .mark_active(previous.application(), previous.version())
                    .await
                {
                    Ok(()) => {
                        info!(
                            application = %state.application,
                            restored = %previous.version(),
                            "Previous plan restored"
                        );
                        RolloutStage::RolledBack
                    }
                    Err(e) => {
                        error!(
                            application = %state.application,
                            restored = %previous.version(),
                            error = %e,
                            "Previous plan re-applied but could not be marked active"
                        );
                        RolloutStage::Failed
                    }
                },
                Err(reason) => {
                    error!(
                        application = %state.application,
                        restored = %previous.version(),
                        reason = %reason,
                        "Failed to restore previous plan"
                    );
                    RolloutStage::Failed
                }
            },
        };

        self.enter(&mut state, terminal).await?;
        self.finish(state).await
    }

    /// Re-apply a previously active plan, wave by wave
    async fn restore(&self, previous: &Plan) -> Result<(), String> {
        for wave in dependency_waves(previous) {
            let applies: Vec<_> = wave
                .into_iter()
                .map(|component| async move {
                    let outcome = self.apply_component(previous, component, None).await;
                    (component.name().to_string(), outcome)
                })
                .collect();
            let outcomes: Vec<(String, ApplyOutcome)> = stream::iter(applies)
                .buffer_unordered(self.rollout.apply_concurrency.max(1))
                .collect()
                .await;

            if let Some((name, reason)) = outcomes.into_iter().find_map(|(name, outcome)| match outcome {
                ApplyOutcome::Failed { reason } => Some((name, reason)),
                _ => None,
            }) {
                return Err(format!("{}: {}", name, reason));
            }
        }
        Ok(())
    }

    async fn enter(&self, state: &mut RolloutState, stage: RolloutStage) -> Result<(), RolloutError> {
        let now = self.clock.now();
        state.transition(stage, now)?;
        self.states.save(state).await?;

        info!(
            application = %state.application,
            version = %state.plan_version,
            stage = %stage,
            "Rollout stage entered"
        );
        self.event_bus.publish(DeploymentEvent::StageEntered {
            application: state.application.clone(),
            version: state.plan_version,
            stage,
            entered_at: now,
        });
        Ok(())
    }

    async fn finish(&self, state: RolloutState) -> Result<RolloutState, RolloutError> {
        self.states.archive(&state).await?;

        metrics::counter!("keel_rollouts_total", "outcome" => state.stage.as_str()).increment(1);
        info!(
            application = %state.application,
            version = %state.plan_version,
            outcome = %state.stage,
            "Rollout finished"
        );
        self.event_bus.publish(DeploymentEvent::RolloutFinished {
            application: state.application.clone(),
            version: state.plan_version,
            stage: state.stage,
            finished_at: state.updated_at,
        });
        Ok(state)
    }
}

/// Group a plan's components so that every component sits in a later wave
/// than all of its dependencies. Relies on the plan being topologically
/// ordered.
fn dependency_waves(plan: &Plan) -> Vec<Vec<&PlannedComponent>> {
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut waves: Vec<Vec<&PlannedComponent>> = Vec::new();

    for component in plan.components() {
        let level = component
            .depends_on
            .iter()
            .filter_map(|dep| depth.get(dep.as_str()))
            .map(|level| level + 1)
            .max()
            .unwrap_or(0);
        depth.insert(component.name(), level);

        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(component);
    }

    waves
}

fn skip_pending(state: &mut RolloutState, now: chrono::DateTime<chrono::Utc>) {
    let pending: Vec<String> = state
        .components
        .iter()
        .filter(|(_, health)| **health == ComponentHealth::Pending)
        .map(|(name, _)| name.clone())
        .collect();
    for name in pending {
        state.set_health(&name, ComponentHealth::Skipped, now);
    }
}
