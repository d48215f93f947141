// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod planner;
pub mod retry;
pub mod approval_gate;
pub mod slo_guard;
pub mod rollout_controller;
pub mod deployment_service;
pub mod repository_factory;

// Re-export services for convenience
pub use approval_gate::ApprovalGate;
pub use deployment_service::{DeploymentError, DeploymentService, ProposedPlan};
pub use planner::{Planner, PlanningError};
pub use rollout_controller::{RolloutCollaborators, RolloutController, RolloutHandle};
pub use slo_guard::{GuardHandle, SloGuard};
