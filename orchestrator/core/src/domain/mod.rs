// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model
//!
//! Pure types and rules of deployment planning and progressive rollout: the
//! capability taxonomy, fact snapshots, component templates and the catalog,
//! plans and their diffs, approval records, rollout state, and the ports to
//! external collaborators and storage.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates, value objects and repository/collaborator interfaces

pub mod capability;
pub mod facts;
pub mod template;
pub mod catalog;
pub mod slo;
pub mod plan;
pub mod approval;
pub mod rollout;
pub mod collaborators;
pub mod repository;
pub mod events;
pub mod clock;
pub mod orchestrator_config;
