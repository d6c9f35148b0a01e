//! Call repository: every query that can mutate a `Call` carries the
//! optimistic-concurrency guard from spec.md §3/§4.5
//! (`UPDATE ... WHERE id = @id AND version = @snapshot_version`).

use chrono::{DateTime, Utc};
use models::{Call, CallStatus};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct CallsRepository {
    pool: PgPool,
}

/// Parameters for inserting a brand-new PENDING call (origination pipeline
/// step 2, spec.md §4.6).
pub struct NewCall {
    pub call_id: Uuid,
    pub phone_number: String,
    pub caller_id: String,
    pub context: String,
    pub extension: String,
    pub priority: i32,
    pub timeout_ms: i32,
    pub max_attempts: i32,
    pub call_metadata: Option<serde_json::Value>,
}

/// Fields the reconciler may set when applying an event-driven transition.
/// `None` fields are left untouched; timestamp fields use `COALESCE` so a
/// timestamp already set is never clobbered (spec.md §4.5 "if unset").
#[derive(Default)]
pub struct StatusMutation {
    pub status: CallStatus,
    pub channel: Option<String>,
    pub dialed_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_s: Option<i32>,
    pub failure_reason: Option<String>,
}

impl CallsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_pending(&self, new_call: NewCall) -> anyhow::Result<Call> {
        let call = sqlx::query_as::<_, Call>(
            r#"
            INSERT INTO calls (
                call_id, phone_number, caller_id, status, context, extension,
                priority, timeout_ms, attempt_number, max_attempts, call_metadata, version
            )
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, 1, $8, $9, 0)
            RETURNING *
            "#,
        )
        .bind(new_call.call_id)
        .bind(&new_call.phone_number)
        .bind(&new_call.caller_id)
        .bind(&new_call.context)
        .bind(&new_call.extension)
        .bind(new_call.priority)
        .bind(new_call.timeout_ms)
        .bind(new_call.max_attempts)
        .bind(new_call.call_metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(call)
    }

    pub async fn find_by_call_id(&self, call_id: Uuid) -> anyhow::Result<Option<Call>> {
        let call = sqlx::query_as::<_, Call>("SELECT * FROM calls WHERE call_id = $1")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(call)
    }

    pub async fn find_by_channel(&self, channel: &str) -> anyhow::Result<Option<Call>> {
        let call = sqlx::query_as::<_, Call>("SELECT * FROM calls WHERE channel = $1")
            .bind(channel)
            .fetch_optional(&self.pool)
            .await?;
        Ok(call)
    }

    /// Origination-pipeline success path: PENDING -> DIALING. Returns
    /// `false` (no rows affected) if the row's `version` no longer matches
    /// `expected_version` — the caller lost the optimistic-concurrency race.
    pub async fn mark_dialing(
        &self,
        call_id: Uuid,
        channel: &str,
        expected_version: i64,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET status = 'dialing', channel = $2, dialed_at = COALESCE(dialed_at, now()),
                version = version + 1
            WHERE call_id = $1 AND version = $3
            "#,
        )
        .bind(call_id)
        .bind(channel)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Origination-pipeline failure path: PENDING -> FAILED with a
    /// diagnostic reason (spec.md §4.6 step 5, §7 "every branch that has
    /// already inserted the PENDING row must update it to FAILED").
    pub async fn mark_failed(
        &self,
        call_id: Uuid,
        reason: &str,
        expected_version: i64,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET status = 'failed', failure_reason = $2, ended_at = COALESCE(ended_at, now()),
                version = version + 1
            WHERE call_id = $1 AND version = $3
            "#,
        )
        .bind(call_id)
        .bind(reason)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Reconciler write path (spec.md §4.5): apply a status mutation guarded
    /// by the snapshot version, bumping version exactly once on success.
    pub async fn apply_status_mutation(
        &self,
        id: i64,
        expected_version: i64,
        mutation: &StatusMutation,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET status = $2,
                channel = COALESCE(channel, $3),
                dialed_at = COALESCE(dialed_at, $4),
                answered_at = COALESCE(answered_at, $5),
                ended_at = COALESCE(ended_at, $6),
                duration_s = COALESCE($7, duration_s),
                failure_reason = COALESCE($8, failure_reason),
                version = version + 1
            WHERE id = $1 AND version = $9
            "#,
        )
        .bind(id)
        .bind(mutation.status)
        .bind(&mutation.channel)
        .bind(mutation.dialed_at)
        .bind(mutation.answered_at)
        .bind(mutation.ended_at)
        .bind(mutation.duration_s)
        .bind(&mutation.failure_reason)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
