// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Approval Records
//!
//! `Proposed → (Approved | Rejected | Expired)`. A record is terminal once it
//! leaves `Proposed`; expiry is observed lazily, the next time anyone touches
//! the record after its deadline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::facts::ApplicationId;
use crate::domain::plan::{PlanChange, PlanVersion};
use crate::domain::repository::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalId(pub Uuid);

impl ApprovalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ApprovalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Proposed,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Proposed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Proposed => "proposed",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict relayed by the approval transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub application: ApplicationId,
    pub plan_version: PlanVersion,
    pub plan_fingerprint: String,
    pub status: ApprovalStatus,
    /// Changes against the active plan; `None` when nothing is active yet
    pub diff: Option<Vec<PlanChange>>,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalRecord {
    pub fn propose(
        application: ApplicationId,
        plan_version: PlanVersion,
        plan_fingerprint: String,
        diff: Option<Vec<PlanChange>>,
        submitted_at: DateTime<Utc>,
        timeout: std::time::Duration,
    ) -> Self {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let expires_at = submitted_at
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: ApprovalId::new(),
            application,
            plan_version,
            plan_fingerprint,
            status: ApprovalStatus::Proposed,
            diff,
            submitted_at,
            expires_at,
            decided_at: None,
            decided_by: None,
            reason: None,
        }
    }

    /// Moves a Proposed record past its deadline to Expired. Returns true when
    /// this call performed the transition.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ApprovalStatus::Proposed && now >= self.expires_at {
            self.status = ApprovalStatus::Expired;
            self.decided_at = Some(self.expires_at);
            return true;
        }
        false
    }

    pub fn decide(
        &mut self,
        decision: Decision,
        decided_by: impl Into<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        self.expire_if_due(now);
        match self.status {
            ApprovalStatus::Proposed => {}
            ApprovalStatus::Expired => return Err(ApprovalError::Expired(self.id)),
            status => {
                return Err(ApprovalError::AlreadyDecided {
                    id: self.id,
                    status,
                })
            }
        }

        self.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        };
        self.decided_at = Some(now);
        self.decided_by = Some(decided_by.into());
        self.reason = reason;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Approval record {0} not found")]
    NotFound(ApprovalId),

    #[error("Plan {version} of '{application}' has no approved record")]
    NotApproved {
        application: ApplicationId,
        version: PlanVersion,
    },

    #[error("Approval record {id} was already decided ({status})")]
    AlreadyDecided { id: ApprovalId, status: ApprovalStatus },

    #[error("Approval record {0} expired; re-plan and submit again")]
    Expired(ApprovalId),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}
