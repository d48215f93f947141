// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::facts::ApplicationId;
use crate::domain::repository::{RepositoryError, RolloutStateRepository};
use crate::domain::rollout::RolloutState;

pub struct PostgresRolloutStateRepository {
    pool: PgPool,
}

impl PostgresRolloutStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::postgres::PgRow) -> Result<RolloutState, RepositoryError> {
        let state_json: serde_json::Value = row
            .try_get("state_json")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(serde_json::from_value(state_json)?)
    }
}

#[async_trait]
impl RolloutStateRepository for PostgresRolloutStateRepository {
    async fn save(&self, state: &RolloutState) -> Result<(), RepositoryError> {
        let state_json = serde_json::to_value(state)?;

        sqlx::query(
            r#"
            INSERT INTO rollout_states (application, plan_version, stage, terminal, state_json, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (application) DO UPDATE SET
                plan_version = EXCLUDED.plan_version,
                stage = EXCLUDED.stage,
                terminal = EXCLUDED.terminal,
                state_json = EXCLUDED.state_json,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.application.as_str())
        .bind(state.plan_version.as_u64() as i64)
        .bind(state.stage.as_str())
        .bind(state.is_terminal())
        .bind(&state_json)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save rollout state: {}", e)))?;

        Ok(())
    }

    async fn find_current(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<RolloutState>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT state_json
            FROM rollout_states
            WHERE application = $1
            "#,
        )
        .bind(application.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn find_in_flight(&self) -> Result<Vec<RolloutState>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT state_json
            FROM rollout_states
            WHERE terminal = FALSE
            ORDER BY application ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode).collect()
    }

    async fn archive(&self, state: &RolloutState) -> Result<(), RepositoryError> {
        if !state.is_terminal() {
            return Err(RepositoryError::Conflict(format!(
                "rollout of '{}' is still {}",
                state.application, state.stage
            )));
        }
        let state_json = serde_json::to_value(state)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO rollout_archive (application, plan_version, stage, state_json, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(state.application.as_str())
        .bind(state.plan_version.as_u64() as i64)
        .bind(state.stage.as_str())
        .bind(&state_json)
        .bind(state.started_at)
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM rollout_states
            WHERE application = $1
            "#,
        )
        .bind(state.application.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn archived(&self, application: &ApplicationId) -> Result<Vec<RolloutState>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT state_json
            FROM rollout_archive
            WHERE application = $1
            ORDER BY id ASC
            "#,
        )
        .bind(application.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode).collect()
    }
}
