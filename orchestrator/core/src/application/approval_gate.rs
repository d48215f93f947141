// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Approval Gate
//!
//! Guards the move from a proposed plan to an active one. Records live behind
//! a single mutex so every decision is linearizable per record: the first
//! `decide` wins and any later caller observes `AlreadyDecided`.
//!
//! Expiry is lazy. Nothing runs in the background; a Proposed record past its
//! deadline becomes Expired the next time it is read, decided, listed or
//! checked by the rollout controller.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Human approval state machine and approval transport surface

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::approval::{ApprovalError, ApprovalId, ApprovalRecord, ApprovalStatus, Decision};
use crate::domain::clock::Clock;
use crate::domain::events::DeploymentEvent;
use crate::domain::facts::ApplicationId;
use crate::domain::orchestrator_config::ApprovalPolicy;
use crate::domain::plan::{diff, Plan, PlanVersion};
use crate::domain::repository::PlanRepository;
use crate::infrastructure::event_bus::EventBus;

pub struct ApprovalGate {
    records: Mutex<HashMap<ApprovalId, ApprovalRecord>>,
    plans: Arc<dyn PlanRepository>,
    clock: Arc<dyn Clock>,
    policy: ApprovalPolicy,
    event_bus: EventBus,
}

impl ApprovalGate {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        clock: Arc<dyn Clock>,
        policy: ApprovalPolicy,
        event_bus: EventBus,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            plans,
            clock,
            policy,
            event_bus,
        }
    }

    /// Open a Proposed record for `plan`, diffed against the active plan.
    ///
    /// Submitting the same plan version again returns the existing record
    /// while it is Proposed or Approved. A version whose record expired or
    /// was rejected must be re-planned.
    pub async fn submit(&self, plan: &Plan) -> Result<ApprovalRecord, ApprovalError> {
        let active = self.plans.find_active(plan.application()).await?;
        let changes = active.as_ref().map(|a| diff(a, plan));

        let mut expired = Vec::new();
        let record = {
            let now = self.clock.now();
            let mut records = self.records.lock();

            let existing = records
                .values_mut()
                .find(|r| r.application == *plan.application() && r.plan_version == plan.version());

            if let Some(existing) = existing {
                if existing.expire_if_due(now) {
                    expired.push(existing.clone());
                }
                match existing.status {
                    ApprovalStatus::Proposed | ApprovalStatus::Approved => existing.clone(),
                    ApprovalStatus::Expired => {
                        let id = existing.id;
                        drop(records);
                        self.publish_expired(&expired);
                        return Err(ApprovalError::Expired(id));
                    }
                    status @ ApprovalStatus::Rejected => {
                        return Err(ApprovalError::AlreadyDecided {
                            id: existing.id,
                            status,
                        })
                    }
                }
            } else {
                let record = ApprovalRecord::propose(
                    plan.application().clone(),
                    plan.version(),
                    plan.fingerprint(),
                    changes,
                    now,
                    self.policy.timeout,
                );
                records.insert(record.id, record.clone());

                info!(
                    approval_id = %record.id,
                    application = %record.application,
                    version = record.plan_version.as_u64(),
                    changes = record.diff.as_ref().map_or(0, Vec::len),
                    expires_at = %record.expires_at,
                    "Approval requested"
                );
                self.event_bus.publish(DeploymentEvent::ApprovalRequested {
                    application: record.application.clone(),
                    version: record.plan_version,
                    approval_id: record.id,
                    changes: record.diff.as_ref().map_or(0, Vec::len),
                    expires_at: record.expires_at,
                });
                record
            }
        };

        Ok(record)
    }

    pub fn decide(
        &self,
        id: ApprovalId,
        decision: Decision,
        decided_by: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let now = self.clock.now();
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(ApprovalError::NotFound(id))?;

        let was_proposed = record.status == ApprovalStatus::Proposed;
        let outcome = record.decide(decision, decided_by, reason, now);

        match outcome {
            Ok(()) => {
                let decided = record.clone();
                drop(records);

                info!(
                    approval_id = %decided.id,
                    application = %decided.application,
                    version = decided.plan_version.as_u64(),
                    decision = %decided.status,
                    decided_by = decided_by,
                    "Approval decided"
                );
                metrics::counter!("keel_approvals_total", "decision" => decided.status.as_str()).increment(1);
                self.event_bus.publish(DeploymentEvent::ApprovalDecided {
                    application: decided.application.clone(),
                    version: decided.plan_version,
                    approval_id: decided.id,
                    status: decided.status,
                    decided_by: decided_by.to_string(),
                    decided_at: now,
                });
                Ok(decided)
            }
            Err(e) => {
                let newly_expired = was_proposed && record.status == ApprovalStatus::Expired;
                let snapshot = record.clone();
                drop(records);

                if newly_expired {
                    self.publish_expired(std::slice::from_ref(&snapshot));
                }
                warn!(approval_id = %id, error = %e, "Approval decision rejected");
                Err(e)
            }
        }
    }

    pub fn get(&self, id: ApprovalId) -> Result<ApprovalRecord, ApprovalError> {
        let now = self.clock.now();
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(ApprovalError::NotFound(id))?;
        let expired = record.expire_if_due(now);
        let snapshot = record.clone();
        drop(records);

        if expired {
            self.publish_expired(std::slice::from_ref(&snapshot));
        }
        Ok(snapshot)
    }

    /// Proposed records awaiting a decision, oldest first
    pub fn pending(&self) -> Vec<ApprovalRecord> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        let mut pending: Vec<ApprovalRecord> = {
            let mut records = self.records.lock();
            records
                .values_mut()
                .filter_map(|record| {
                    if record.expire_if_due(now) {
                        expired.push(record.clone());
                    }
                    (record.status == ApprovalStatus::Proposed).then(|| record.clone())
                })
                .collect()
        };
        self.publish_expired(&expired);

        pending.sort_by_key(|r| r.submitted_at);
        pending
    }

    /// The Approved record for a plan version, or `NotApproved`
    pub fn ensure_approved(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        let approved = {
            let mut records = self.records.lock();
            records
                .values_mut()
                .filter(|r| r.application == *application && r.plan_version == version)
                .find_map(|record| {
                    if record.expire_if_due(now) {
                        expired.push(record.clone());
                    }
                    (record.status == ApprovalStatus::Approved).then(|| record.clone())
                })
        };
        self.publish_expired(&expired);

        approved.ok_or_else(|| ApprovalError::NotApproved {
            application: application.clone(),
            version,
        })
    }

    fn publish_expired(&self, expired: &[ApprovalRecord]) {
        for record in expired {
            warn!(
                approval_id = %record.id,
                application = %record.application,
                version = record.plan_version.as_u64(),
                "Approval expired without a decision"
            );
            metrics::counter!("keel_approvals_total", "decision" => "expired").increment(1);
            self.event_bus.publish(DeploymentEvent::ApprovalExpired {
                application: record.application.clone(),
                version: record.plan_version,
                approval_id: record.id,
                expired_at: record.expires_at,
            });
        }
    }
}
