// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rollout State Machine
//!
//! ```text
//! Pending → Staging → Observing → Promoting → Stable
//!    │         │          │           │
//!    └─────────┴────┬─────┴───────────┘
//!                   ▼
//!              RollingBack → RolledBack | Failed
//! ```
//!
//! `Stable`, `RolledBack` and `Failed` are terminal. Only the Rollout
//! Controller mutates a [`RolloutState`]; the Guard contributes verdicts
//! through the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::domain::approval::ApprovalError;
use crate::domain::facts::ApplicationId;
use crate::domain::plan::PlanVersion;
use crate::domain::repository::RepositoryError;
use crate::domain::slo::GuardVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStage {
    Pending,
    Staging,
    Observing,
    Promoting,
    Stable,
    RollingBack,
    RolledBack,
    Failed,
}

impl RolloutStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RolloutStage::Stable | RolloutStage::RolledBack | RolloutStage::Failed
        )
    }

    pub fn can_transition_to(&self, next: RolloutStage) -> bool {
        use RolloutStage::*;
        matches!(
            (self, next),
            (Pending, Staging)
                | (Staging, Observing)
                | (Observing, Promoting)
                | (Promoting, Stable)
                | (Pending | Staging | Observing | Promoting, RollingBack)
                | (RollingBack, RolledBack | Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutStage::Pending => "pending",
            RolloutStage::Staging => "staging",
            RolloutStage::Observing => "observing",
            RolloutStage::Promoting => "promoting",
            RolloutStage::Stable => "stable",
            RolloutStage::RollingBack => "rolling_back",
            RolloutStage::RolledBack => "rolled_back",
            RolloutStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RolloutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-component health snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentHealth {
    Pending,
    Applied,
    Ready,
    NotReady,
    Failed { reason: String },
    /// Not started because the rollout was cancelled or aborted
    Skipped,
}

/// Why a rollout left the happy path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum RollbackCause {
    StagingFailed { component: String, reason: String },
    Breach { objectives: Vec<String> },
    Inconclusive { objectives: Vec<String> },
    Cancelled,
    /// Found non-terminal after a restart
    Interrupted,
    /// The active-plan pointer could not be moved to the new version
    PromotionFailed { reason: String },
    /// The controller itself failed mid-rollout (e.g. storage unavailable)
    Aborted { reason: String },
}

impl fmt::Display for RollbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackCause::StagingFailed { component, reason } => {
                write!(f, "staging of '{}' failed: {}", component, reason)
            }
            RollbackCause::Breach { objectives } => {
                write!(f, "SLO breach: {}", objectives.join(", "))
            }
            RollbackCause::Inconclusive { objectives } => {
                write!(f, "insufficient samples: {}", objectives.join(", "))
            }
            RollbackCause::Cancelled => f.write_str("cancelled by operator"),
            RollbackCause::Interrupted => f.write_str("interrupted by restart"),
            RollbackCause::PromotionFailed { reason } => write!(f, "promotion failed: {}", reason),
            RollbackCause::Aborted { reason } => write!(f, "rollout aborted: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    pub application: ApplicationId,
    pub plan_version: PlanVersion,
    /// Active plan at the time the rollout started; the rollback target
    pub previous_version: Option<PlanVersion>,
    pub stage: RolloutStage,
    pub components: BTreeMap<String, ComponentHealth>,
    pub latest_verdict: Option<GuardVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_cause: Option<RollbackCause>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RolloutState {
    pub fn new<'a>(
        application: ApplicationId,
        plan_version: PlanVersion,
        previous_version: Option<PlanVersion>,
        component_names: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            application,
            plan_version,
            previous_version,
            stage: RolloutStage::Pending,
            components: component_names
                .into_iter()
                .map(|name| (name.to_string(), ComponentHealth::Pending))
                .collect(),
            latest_verdict: None,
            rollback_cause: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: RolloutStage, now: DateTime<Utc>) -> Result<(), RolloutError> {
        if !self.stage.can_transition_to(next) {
            return Err(RolloutError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_health(&mut self, component: &str, health: ComponentHealth, now: DateTime<Utc>) {
        self.components.insert(component.to_string(), health);
        self.updated_at = now;
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("Staging of '{component}' failed: {reason}")]
    StagingFailed { component: String, reason: String },

    #[error("A rollout of '{0}' is already in progress")]
    RolloutInProgress(ApplicationId),

    /// Every version is rolled out at most once; trying again needs a new plan
    #[error("Plan {version} of '{application}' was already rolled out (ended {outcome})")]
    VersionAlreadyRolledOut {
        application: ApplicationId,
        version: PlanVersion,
        outcome: RolloutStage,
    },

    #[error("Plan {version} of '{application}' is not newer than the active plan {active}")]
    VersionSuperseded {
        application: ApplicationId,
        version: PlanVersion,
        active: PlanVersion,
    },

    #[error(transparent)]
    NotApproved(#[from] ApprovalError),

    #[error("Invalid rollout transition {from} -> {to}")]
    InvalidTransition { from: RolloutStage, to: RolloutStage },

    #[error("Plan {version} of '{application}' not found")]
    PlanNotFound {
        application: ApplicationId,
        version: PlanVersion,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Rollout task ended abnormally: {0}")]
    TaskFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RolloutState {
        RolloutState::new(
            ApplicationId::new("shop").unwrap(),
            PlanVersion(2),
            Some(PlanVersion(1)),
            ["nginx", "istio"],
            Utc::now(),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = state();
        for next in [
            RolloutStage::Staging,
            RolloutStage::Observing,
            RolloutStage::Promoting,
            RolloutStage::Stable,
        ] {
            s.transition(next, Utc::now()).unwrap();
        }
        assert!(s.is_terminal());
    }

    #[test]
    fn test_escape_edge_from_every_active_stage() {
        for stage in [
            RolloutStage::Pending,
            RolloutStage::Staging,
            RolloutStage::Observing,
            RolloutStage::Promoting,
        ] {
            assert!(stage.can_transition_to(RolloutStage::RollingBack));
        }
        assert!(!RolloutStage::Stable.can_transition_to(RolloutStage::RollingBack));
        assert!(RolloutStage::RollingBack.can_transition_to(RolloutStage::Failed));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut s = state();
        let err = s.transition(RolloutStage::Promoting, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            RolloutError::InvalidTransition {
                from: RolloutStage::Pending,
                to: RolloutStage::Promoting
            }
        ));
        assert_eq!(s.stage, RolloutStage::Pending);
    }

    #[test]
    fn test_components_start_pending() {
        let s = state();
        assert_eq!(s.components.len(), 2);
        assert!(s.components.values().all(|h| *h == ComponentHealth::Pending));
    }
}
