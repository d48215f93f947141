// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deployment lifecycle events published on the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::facts::ApplicationId;
use crate::domain::plan::PlanVersion;
use crate::domain::rollout::RolloutStage;
use crate::domain::slo::GuardVerdict;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentEvent {
    PlanProduced {
        application: ApplicationId,
        version: PlanVersion,
        fingerprint: String,
        components: usize,
        produced_at: DateTime<Utc>,
    },
    ApprovalRequested {
        application: ApplicationId,
        version: PlanVersion,
        approval_id: ApprovalId,
        changes: usize,
        expires_at: DateTime<Utc>,
    },
    ApprovalDecided {
        application: ApplicationId,
        version: PlanVersion,
        approval_id: ApprovalId,
        status: ApprovalStatus,
        decided_by: String,
        decided_at: DateTime<Utc>,
    },
    ApprovalExpired {
        application: ApplicationId,
        version: PlanVersion,
        approval_id: ApprovalId,
        expired_at: DateTime<Utc>,
    },
    StageEntered {
        application: ApplicationId,
        version: PlanVersion,
        stage: RolloutStage,
        entered_at: DateTime<Utc>,
    },
    ComponentApplied {
        application: ApplicationId,
        version: PlanVersion,
        component: String,
        attempts: u32,
        applied_at: DateTime<Utc>,
    },
    ComponentApplyFailed {
        application: ApplicationId,
        version: PlanVersion,
        component: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    VerdictObserved {
        application: ApplicationId,
        version: PlanVersion,
        verdict: GuardVerdict,
        observed_at: DateTime<Utc>,
    },
    RolloutFinished {
        application: ApplicationId,
        version: PlanVersion,
        stage: RolloutStage,
        finished_at: DateTime<Utc>,
    },
}

impl DeploymentEvent {
    pub fn application(&self) -> &ApplicationId {
        match self {
            DeploymentEvent::PlanProduced { application, .. }
            | DeploymentEvent::ApprovalRequested { application, .. }
            | DeploymentEvent::ApprovalDecided { application, .. }
            | DeploymentEvent::ApprovalExpired { application, .. }
            | DeploymentEvent::StageEntered { application, .. }
            | DeploymentEvent::ComponentApplied { application, .. }
            | DeploymentEvent::ComponentApplyFailed { application, .. }
            | DeploymentEvent::VerdictObserved { application, .. }
            | DeploymentEvent::RolloutFinished { application, .. } => application,
        }
    }
}
