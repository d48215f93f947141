// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::facts::ApplicationId;
use crate::domain::plan::{Plan, PlanVersion};
use crate::domain::repository::{PlanRepository, RepositoryError};
use crate::infrastructure::repositories::check_next_version;

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::postgres::PgRow) -> Result<Plan, RepositoryError> {
        let plan_json: serde_json::Value = row
            .try_get("plan_json")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(serde_json::from_value(plan_json)?)
    }
}

fn to_db_version(version: PlanVersion) -> Result<i64, RepositoryError> {
    i64::try_from(version.as_u64())
        .map_err(|_| RepositoryError::Serialization(format!("plan version {} out of range", version)))
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn append(&self, plan: &Plan) -> Result<(), RepositoryError> {
        let plan_json = serde_json::to_value(plan)?;
        let mut tx = self.pool.begin().await?;

        let latest: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version)
            FROM plans
            WHERE application = $1
            "#,
        )
        .bind(plan.application().as_str())
        .fetch_one(&mut *tx)
        .await?;

        check_next_version(
            plan.application(),
            latest.map(|v| PlanVersion(v as u64)),
            plan.version(),
        )?;

        // The primary key rejects a concurrent append of the same version
        sqlx::query(
            r#"
            INSERT INTO plans (application, version, fingerprint, plan_json, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(plan.application().as_str())
        .bind(to_db_version(plan.version())?)
        .bind(plan.fingerprint())
        .bind(&plan_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(format!(
                "plan {} of '{}' already exists",
                plan.version(),
                plan.application()
            )),
            other => RepositoryError::Database(format!("Failed to append plan: {}", other)),
        })?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_version(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT plan_json
            FROM plans
            WHERE application = $1 AND version = $2
            "#,
        )
        .bind(application.as_str())
        .bind(to_db_version(version)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn latest(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT plan_json
            FROM plans
            WHERE application = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(application.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn history(&self, application: &ApplicationId) -> Result<Vec<Plan>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT plan_json
            FROM plans
            WHERE application = $1
            ORDER BY version ASC
            "#,
        )
        .bind(application.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode).collect()
    }

    async fn find_active(&self, application: &ApplicationId) -> Result<Option<Plan>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT p.plan_json
            FROM active_plans a
            JOIN plans p ON p.application = a.application AND p.version = a.version
            WHERE a.application = $1
            "#,
        )
        .bind(application.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn mark_active(
        &self,
        application: &ApplicationId,
        version: PlanVersion,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO active_plans (application, version, activated_at)
            SELECT application, version, NOW()
            FROM plans
            WHERE application = $1 AND version = $2
            ON CONFLICT (application) DO UPDATE SET
                version = EXCLUDED.version,
                activated_at = EXCLUDED.activated_at
            "#,
        )
        .bind(application.as_str())
        .bind(to_db_version(version)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("plan {} of '{}'", version, application)));
        }
        Ok(())
    }
}
