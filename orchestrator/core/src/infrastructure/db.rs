// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is
//! injected into the PostgreSQL repository implementations. Only needed when
//! `spec.storage.backend` is `postgres`.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS plans (
        application TEXT NOT NULL,
        version BIGINT NOT NULL,
        fingerprint TEXT NOT NULL,
        plan_json JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (application, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS active_plans (
        application TEXT PRIMARY KEY,
        version BIGINT NOT NULL,
        activated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        FOREIGN KEY (application, version) REFERENCES plans (application, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rollout_states (
        application TEXT PRIMARY KEY,
        plan_version BIGINT NOT NULL,
        stage TEXT NOT NULL,
        terminal BOOLEAN NOT NULL,
        state_json JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rollout_archive (
        id BIGSERIAL PRIMARY KEY,
        application TEXT NOT NULL,
        plan_version BIGINT NOT NULL,
        stage TEXT NOT NULL,
        state_json JSONB NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS rollout_archive_application_idx
        ON rollout_archive (application)
    "#,
];

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    /// Create the tables used by the PostgreSQL repositories if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema statement")?;
        }
        tracing::info!("Database schema ready");
        Ok(())
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
