// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Keel Core
//!
//! Planning, approval and progressive rollout engine. Facts about an
//! application go in; a dependency-ordered plan of infrastructure components
//! comes out, waits for a human decision and is then rolled out under SLO
//! observation with automatic rollback.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and infrastructure adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
