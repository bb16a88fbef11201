//! Postgres implementation of the [`Gateway`] trait.
//!
//! Row mapping uses the runtime `query`/`bind`/`try_get` API so the crate
//! builds without a live database. Structured fields (legs, metrics,
//! sizing, quality, payloads) are stored as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use otx_schemas::{
    AnalyticsEvent, AssetType, Credential, HistoricalResult, HistoricalRun, Holding, JobRun,
    JobStatus, MarketDataQuality, Suggestion, SuggestionStatus, ValidationJournalEntry,
    ValidationState, Window,
};

use crate::gateway::{classify_sqlx, DbError, Gateway, JobFailure};

/// sqlx-backed gateway over a shared pool.
#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn decode_json<T: serde::de::DeserializeOwned>(v: Value, what: &str) -> Result<T, DbError> {
    serde_json::from_value(v)
        .map_err(|e| DbError::ConstraintViolation(format!("corrupt {what} json: {e}")))
}

fn suggestion_from_row(row: &sqlx::postgres::PgRow) -> Result<Suggestion, DbError> {
    let window_str: String = row.try_get("window").map_err(classify_sqlx)?;
    let window = Window::parse(&window_str)
        .ok_or_else(|| DbError::ConstraintViolation(format!("bad window '{window_str}'")))?;
    let status_str: String = row.try_get("status").map_err(classify_sqlx)?;
    let status = SuggestionStatus::parse(&status_str)
        .ok_or_else(|| DbError::ConstraintViolation(format!("bad status '{status_str}'")))?;

    let quality: Option<Value> = row.try_get("marketdata_quality").map_err(classify_sqlx)?;
    let marketdata_quality: Option<MarketDataQuality> = match quality {
        Some(v) => Some(decode_json(v, "marketdata_quality")?),
        None => None,
    };

    Ok(Suggestion {
        id: row.try_get("id").map_err(classify_sqlx)?,
        user_id: row.try_get("user_id").map_err(classify_sqlx)?,
        window,
        strategy: row.try_get("strategy").map_err(classify_sqlx)?,
        symbol: row.try_get("symbol").map_err(classify_sqlx)?,
        display_symbol: row.try_get("display_symbol").map_err(classify_sqlx)?,
        legs: decode_json(row.try_get("legs").map_err(classify_sqlx)?, "legs")?,
        limit_price: row.try_get("limit_price").map_err(classify_sqlx)?,
        metrics: decode_json(row.try_get("metrics").map_err(classify_sqlx)?, "metrics")?,
        iv_rank: row.try_get("iv_rank").map_err(classify_sqlx)?,
        iv_regime: row.try_get("iv_regime").map_err(classify_sqlx)?,
        score: row.try_get("score").map_err(classify_sqlx)?,
        status,
        blocked_reason: row.try_get("blocked_reason").map_err(classify_sqlx)?,
        blocked_detail: row.try_get("blocked_detail").map_err(classify_sqlx)?,
        marketdata_quality,
        sizing: decode_json(row.try_get("sizing").map_err(classify_sqlx)?, "sizing")?,
        trace_id: row.try_get("trace_id").map_err(classify_sqlx)?,
        created_at: row.try_get("created_at").map_err(classify_sqlx)?,
        refreshed_at: row.try_get("refreshed_at").map_err(classify_sqlx)?,
    })
}

const SUGGESTION_COLS: &str = "id, user_id, \"window\", strategy, symbol, display_symbol, legs, \
     limit_price, metrics, iv_rank, iv_regime, score, status, blocked_reason, blocked_detail, \
     marketdata_quality, sizing, trace_id, created_at, refreshed_at";

fn job_run_from_row(row: &sqlx::postgres::PgRow) -> Result<JobRun, DbError> {
    let status_str: String = row.try_get("status").map_err(classify_sqlx)?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DbError::ConstraintViolation(format!("bad job status '{status_str}'")))?;
    Ok(JobRun {
        id: row.try_get("id").map_err(classify_sqlx)?,
        job_name: row.try_get("job_name").map_err(classify_sqlx)?,
        idempotency_key: row.try_get("idempotency_key").map_err(classify_sqlx)?,
        status,
        attempt_count: row.try_get("attempt_count").map_err(classify_sqlx)?,
        max_attempts: row.try_get("max_attempts").map_err(classify_sqlx)?,
        scheduled_for: row.try_get("scheduled_for").map_err(classify_sqlx)?,
        run_after: row.try_get("run_after").map_err(classify_sqlx)?,
        started_at: row.try_get("started_at").map_err(classify_sqlx)?,
        finished_at: row.try_get("finished_at").map_err(classify_sqlx)?,
        duration_ms: row.try_get("duration_ms").map_err(classify_sqlx)?,
        payload: row.try_get("payload").map_err(classify_sqlx)?,
        result: row.try_get("result").map_err(classify_sqlx)?,
        error: row.try_get("error").map_err(classify_sqlx)?,
        created_at: row.try_get("created_at").map_err(classify_sqlx)?,
    })
}

const JOB_COLS: &str = "id, job_name, idempotency_key, status, attempt_count, max_attempts, \
     scheduled_for, run_after, started_at, finished_at, duration_ms, payload, result, error, \
     created_at";

fn validation_from_row(row: &sqlx::postgres::PgRow) -> Result<ValidationState, DbError> {
    let passed: Option<bool> = row.try_get("historical_last_passed").map_err(classify_sqlx)?;
    let return_pct: Option<f64> = row
        .try_get("historical_last_return_pct")
        .map_err(classify_sqlx)?;
    let historical_last_result = match (passed, return_pct) {
        (Some(passed), Some(return_pct)) => Some(HistoricalResult { passed, return_pct }),
        _ => None,
    };
    Ok(ValidationState {
        user_id: row.try_get("user_id").map_err(classify_sqlx)?,
        paper_window_start: row.try_get("paper_window_start").map_err(classify_sqlx)?,
        paper_window_end: row.try_get("paper_window_end").map_err(classify_sqlx)?,
        paper_consecutive_passes: row
            .try_get("paper_consecutive_passes")
            .map_err(classify_sqlx)?,
        paper_checkpoint_target: row
            .try_get("paper_checkpoint_target")
            .map_err(classify_sqlx)?,
        paper_fail_fast_triggered: row
            .try_get("paper_fail_fast_triggered")
            .map_err(classify_sqlx)?,
        paper_fail_fast_reason: row.try_get("paper_fail_fast_reason").map_err(classify_sqlx)?,
        historical_last_run_at: row.try_get("historical_last_run_at").map_err(classify_sqlx)?,
        historical_last_result,
        overall_ready: row.try_get("overall_ready").map_err(classify_sqlx)?,
    })
}

// ---------------------------------------------------------------------------
// Gateway impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Gateway for PgGateway {
    // --- users ---

    async fn user_ids(&self) -> Result<Vec<Uuid>, DbError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            select user_id from holdings
            union
            select user_id from validation_states
            order by user_id asc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // --- holdings ---

    async fn holdings_for_user(&self, user_id: Uuid) -> Result<Vec<Holding>, DbError> {
        let rows = sqlx::query(
            r#"
            select user_id, symbol, asset_type, quantity, cost_basis, current_price,
                   greeks, sector, updated_at
            from holdings
            where user_id = $1
            order by symbol asc
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let asset_str: String = row.try_get("asset_type").map_err(classify_sqlx)?;
            let asset_type = AssetType::parse(&asset_str).ok_or_else(|| {
                DbError::ConstraintViolation(format!("bad asset_type '{asset_str}'"))
            })?;
            let greeks: Option<Value> = row.try_get("greeks").map_err(classify_sqlx)?;
            out.push(Holding {
                user_id: row.try_get("user_id").map_err(classify_sqlx)?,
                symbol: row.try_get("symbol").map_err(classify_sqlx)?,
                asset_type,
                quantity: row.try_get("quantity").map_err(classify_sqlx)?,
                cost_basis: row.try_get("cost_basis").map_err(classify_sqlx)?,
                current_price: row.try_get("current_price").map_err(classify_sqlx)?,
                greeks: match greeks {
                    Some(v) => Some(decode_json(v, "greeks")?),
                    None => None,
                },
                sector: row.try_get("sector").map_err(classify_sqlx)?,
                updated_at: row.try_get("updated_at").map_err(classify_sqlx)?,
            });
        }
        Ok(out)
    }

    async fn upsert_holding(&self, h: &Holding) -> Result<(), DbError> {
        let greeks = match &h.greeks {
            Some(g) => Some(serde_json::to_value(g).map_err(|e| {
                DbError::ConstraintViolation(format!("greeks serialization: {e}"))
            })?),
            None => None,
        };
        sqlx::query(
            r#"
            insert into holdings (user_id, symbol, asset_type, quantity, cost_basis,
                                  current_price, greeks, sector, updated_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            on conflict (user_id, symbol) do update
                set asset_type    = excluded.asset_type,
                    quantity      = excluded.quantity,
                    cost_basis    = excluded.cost_basis,
                    current_price = excluded.current_price,
                    greeks        = excluded.greeks,
                    sector        = excluded.sector,
                    updated_at    = excluded.updated_at
            "#,
        )
        .bind(h.user_id)
        .bind(&h.symbol)
        .bind(h.asset_type.as_str())
        .bind(h.quantity)
        .bind(h.cost_basis)
        .bind(h.current_price)
        .bind(greeks)
        .bind(&h.sector)
        .bind(h.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    // --- credentials ---

    async fn insert_credential(&self, cred: &Credential) -> Result<(), DbError> {
        sqlx::query(
            r#"
            insert into credentials (id, user_id, provider, ciphertext, created_at)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(cred.id)
        .bind(cred.user_id)
        .bind(&cred.provider)
        .bind(&cred.ciphertext)
        .bind(cred.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn credentials_for_user(&self, user_id: Uuid) -> Result<Vec<Credential>, DbError> {
        let rows = sqlx::query(
            r#"
            select id, user_id, provider, ciphertext, created_at
            from credentials
            where user_id = $1
            order by created_at asc
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Credential {
                id: row.try_get("id").map_err(classify_sqlx)?,
                user_id: row.try_get("user_id").map_err(classify_sqlx)?,
                provider: row.try_get("provider").map_err(classify_sqlx)?,
                ciphertext: row.try_get("ciphertext").map_err(classify_sqlx)?,
                created_at: row.try_get("created_at").map_err(classify_sqlx)?,
            });
        }
        Ok(out)
    }

    async fn delete_credentials(&self, user_id: Uuid, provider: &str) -> Result<u64, DbError> {
        let res = sqlx::query(
            r#"
            delete from credentials
            where user_id = $1 and provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(res.rows_affected())
    }

    // --- suggestions ---

    async fn insert_suggestion(&self, s: &Suggestion) -> Result<(), DbError> {
        // Serialize structured fields up front so a failure never leaves a
        // partial row behind.
        let legs = serde_json::to_value(&s.legs)
            .map_err(|e| DbError::ConstraintViolation(format!("legs serialization: {e}")))?;
        let metrics = serde_json::to_value(s.metrics)
            .map_err(|e| DbError::ConstraintViolation(format!("metrics serialization: {e}")))?;
        let sizing = serde_json::to_value(&s.sizing)
            .map_err(|e| DbError::ConstraintViolation(format!("sizing serialization: {e}")))?;
        let quality = match &s.marketdata_quality {
            Some(q) => Some(serde_json::to_value(q).map_err(|e| {
                DbError::ConstraintViolation(format!("quality serialization: {e}"))
            })?),
            None => None,
        };
        sqlx::query(
            r#"
            insert into suggestions (
              id, user_id, "window", strategy, symbol, display_symbol, legs, limit_price,
              metrics, iv_rank, iv_regime, score, status, blocked_reason, blocked_detail,
              marketdata_quality, sizing, trace_id, created_at, refreshed_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
              $18, $19, $20
            )
            "#,
        )
        .bind(s.id)
        .bind(s.user_id)
        .bind(s.window.as_str())
        .bind(&s.strategy)
        .bind(&s.symbol)
        .bind(&s.display_symbol)
        .bind(legs)
        .bind(s.limit_price)
        .bind(metrics)
        .bind(s.iv_rank)
        .bind(&s.iv_regime)
        .bind(s.score)
        .bind(s.status.as_str())
        .bind(&s.blocked_reason)
        .bind(&s.blocked_detail)
        .bind(quality)
        .bind(sizing)
        .bind(s.trace_id)
        .bind(s.created_at)
        .bind(s.refreshed_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn fetch_suggestion(&self, user_id: Uuid, id: Uuid) -> Result<Suggestion, DbError> {
        let row = sqlx::query(&format!(
            "select {SUGGESTION_COLS} from suggestions where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let Some(row) = row else {
            return Err(DbError::NotFound);
        };
        let s = suggestion_from_row(&row)?;
        if s.user_id != user_id {
            return Err(DbError::Unauthorized);
        }
        Ok(s)
    }

    async fn active_suggestions(&self, user_id: Uuid) -> Result<Vec<Suggestion>, DbError> {
        let rows = sqlx::query(&format!(
            r#"
            select {SUGGESTION_COLS}
            from suggestions
            where user_id = $1
              and status in ('EXECUTABLE', 'NOT_EXECUTABLE', 'STAGED')
            order by score desc, created_at asc
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        rows.iter().map(suggestion_from_row).collect()
    }

    async fn terminal_suggestions_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Suggestion>, DbError> {
        let rows = sqlx::query(&format!(
            r#"
            select {SUGGESTION_COLS}
            from suggestions
            where user_id = $1
              and status in ('COMPLETED', 'DISMISSED')
              and created_at >= $2 and created_at < $3
            order by created_at asc
            "#
        ))
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        rows.iter().map(suggestion_from_row).collect()
    }

    async fn transition_suggestion(
        &self,
        user_id: Uuid,
        id: Uuid,
        from: SuggestionStatus,
        to: SuggestionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if !SuggestionStatus::can_transition(from, to) {
            return Err(DbError::Conflict(format!(
                "illegal transition {} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }

        // Ownership check first so cross-user callers get Unauthorized, not
        // Conflict.
        let owner: Option<(Uuid,)> =
            sqlx::query_as("select user_id from suggestions where id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify_sqlx)?;
        match owner {
            None => return Err(DbError::NotFound),
            Some((owner_id,)) if owner_id != user_id => return Err(DbError::Unauthorized),
            Some(_) => {}
        }

        let res = sqlx::query(
            r#"
            update suggestions
               set status = $1,
                   refreshed_at = $2
             where id = $3 and user_id = $4 and status = $5
            "#,
        )
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .bind(user_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        if res.rows_affected() == 0 {
            return Err(DbError::Conflict(format!(
                "suggestion {} not in status {}",
                id,
                from.as_str()
            )));
        }
        Ok(())
    }

    async fn update_suggestion_quality(
        &self,
        user_id: Uuid,
        id: Uuid,
        quality: &MarketDataQuality,
        status: SuggestionStatus,
        blocked_reason: Option<String>,
        blocked_detail: Option<String>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let quality_json = serde_json::to_value(quality)
            .map_err(|e| DbError::ConstraintViolation(format!("quality serialization: {e}")))?;

        let res = sqlx::query(
            r#"
            update suggestions
               set marketdata_quality = $1,
                   status = $2,
                   blocked_reason = $3,
                   blocked_detail = $4,
                   refreshed_at = $5
             where id = $6 and user_id = $7
               and status in ('EXECUTABLE', 'NOT_EXECUTABLE')
            "#,
        )
        .bind(quality_json)
        .bind(status.as_str())
        .bind(blocked_reason)
        .bind(blocked_detail)
        .bind(refreshed_at)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        if res.rows_affected() == 0 {
            return Err(DbError::Conflict(format!(
                "suggestion {id} not refreshable"
            )));
        }
        Ok(())
    }

    // --- job runs ---

    async fn find_active_job(
        &self,
        job_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<JobRun>, DbError> {
        let row = sqlx::query(&format!(
            r#"
            select {JOB_COLS}
            from job_runs
            where job_name = $1
              and idempotency_key = $2
              and status in ('pending', 'processing', 'failed_retryable')
            limit 1
            "#
        ))
        .bind(job_name)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        match row {
            Some(row) => Ok(Some(job_run_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_job_any_status(
        &self,
        job_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<JobRun>, DbError> {
        let row = sqlx::query(&format!(
            r#"
            select {JOB_COLS}
            from job_runs
            where job_name = $1
              and idempotency_key = $2
            order by created_at desc
            limit 1
            "#
        ))
        .bind(job_name)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        match row {
            Some(row) => Ok(Some(job_run_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_job_run(&self, run: &JobRun) -> Result<(), DbError> {
        sqlx::query(
            r#"
            insert into job_runs (
              id, job_name, idempotency_key, status, attempt_count, max_attempts,
              scheduled_for, run_after, started_at, finished_at, duration_ms,
              payload, result, error, created_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15
            )
            "#,
        )
        .bind(run.id)
        .bind(&run.job_name)
        .bind(&run.idempotency_key)
        .bind(run.status.as_str())
        .bind(run.attempt_count)
        .bind(run.max_attempts)
        .bind(run.scheduled_for)
        .bind(run.run_after)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(&run.payload)
        .bind(&run.result)
        .bind(&run.error)
        .bind(run.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn job_run(&self, id: Uuid) -> Result<JobRun, DbError> {
        let row = sqlx::query(&format!("select {JOB_COLS} from job_runs where id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx)?;
        match row {
            Some(row) => job_run_from_row(&row),
            None => Err(DbError::NotFound),
        }
    }

    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<JobRun>, DbError> {
        // FOR UPDATE SKIP LOCKED: concurrent workers never claim the same row.
        let rows = sqlx::query(&format!(
            r#"
            with to_claim as (
                select id
                from job_runs
                where status in ('pending', 'failed_retryable')
                  and run_after <= $1
                order by run_after asc
                limit $2
                for update skip locked
            )
            update job_runs
               set status = 'processing',
                   started_at = $1
             where id in (select id from to_claim)
            returning {JOB_COLS}
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        rows.iter().map(job_run_from_row).collect()
    }

    async fn complete_job(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        result: Value,
    ) -> Result<(), DbError> {
        let res = sqlx::query(
            r#"
            update job_runs
               set status = 'completed',
                   finished_at = $1,
                   duration_ms = (extract(epoch from ($1 - started_at)) * 1000)::bigint,
                   result = $2
             where id = $3 and status = 'processing'
            "#,
        )
        .bind(now)
        .bind(result)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        if res.rows_affected() == 0 {
            return Err(DbError::Conflict(format!("job {id} not processing")));
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        id: Uuid,
        expect_attempts: i32,
        failure: JobFailure,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let terminal = failure.new_status.is_terminal();
        let res = sqlx::query(
            r#"
            update job_runs
               set status = $1,
                   attempt_count = attempt_count + 1,
                   error = $2,
                   run_after = coalesce($3, run_after),
                   started_at = case when $4 then started_at else null end,
                   finished_at = case when $4 then $5 else null end,
                   duration_ms = case when $4
                       then (extract(epoch from ($5 - started_at)) * 1000)::bigint
                       else null end
             where id = $6 and status = 'processing' and attempt_count = $7
            "#,
        )
        .bind(failure.new_status.as_str())
        .bind(&failure.error)
        .bind(failure.retry_at)
        .bind(terminal)
        .bind(now)
        .bind(id)
        .bind(expect_attempts)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        if res.rows_affected() == 0 {
            return Err(DbError::Conflict(format!(
                "job {id} not processing at attempt {expect_attempts}"
            )));
        }
        Ok(())
    }

    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
        lease_timeout_secs: i64,
    ) -> Result<u64, DbError> {
        let cutoff = now - chrono::Duration::seconds(lease_timeout_secs);
        let res = sqlx::query(
            r#"
            update job_runs
               set status = 'pending',
                   started_at = null,
                   run_after = $1
             where status = 'processing'
               and started_at is not null
               and started_at < $2
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(res.rows_affected())
    }

    async fn latest_job_finished_at(
        &self,
        job_name: &str,
        status: JobStatus,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            r#"
            select max(finished_at)
            from job_runs
            where job_name = $1 and status = $2
            "#,
        )
        .bind(job_name)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(row.and_then(|(ts,)| ts))
    }

    // --- validation ---

    async fn validation_state(&self, user_id: Uuid) -> Result<Option<ValidationState>, DbError> {
        let row = sqlx::query(
            r#"
            select user_id, paper_window_start, paper_window_end, paper_consecutive_passes,
                   paper_checkpoint_target, paper_fail_fast_triggered, paper_fail_fast_reason,
                   historical_last_run_at, historical_last_passed, historical_last_return_pct,
                   overall_ready
            from validation_states
            where user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        match row {
            Some(row) => Ok(Some(validation_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_validation_state(&self, st: &ValidationState) -> Result<(), DbError> {
        let (passed, return_pct) = match st.historical_last_result {
            Some(r) => (Some(r.passed), Some(r.return_pct)),
            None => (None, None),
        };
        sqlx::query(
            r#"
            insert into validation_states (
              user_id, paper_window_start, paper_window_end, paper_consecutive_passes,
              paper_checkpoint_target, paper_fail_fast_triggered, paper_fail_fast_reason,
              historical_last_run_at, historical_last_passed, historical_last_return_pct,
              overall_ready
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            on conflict (user_id) do update
                set paper_window_start         = excluded.paper_window_start,
                    paper_window_end           = excluded.paper_window_end,
                    paper_consecutive_passes   = excluded.paper_consecutive_passes,
                    paper_checkpoint_target    = excluded.paper_checkpoint_target,
                    paper_fail_fast_triggered  = excluded.paper_fail_fast_triggered,
                    paper_fail_fast_reason     = excluded.paper_fail_fast_reason,
                    historical_last_run_at     = excluded.historical_last_run_at,
                    historical_last_passed     = excluded.historical_last_passed,
                    historical_last_return_pct = excluded.historical_last_return_pct,
                    overall_ready              = excluded.overall_ready
            "#,
        )
        .bind(st.user_id)
        .bind(st.paper_window_start)
        .bind(st.paper_window_end)
        .bind(st.paper_consecutive_passes)
        .bind(st.paper_checkpoint_target)
        .bind(st.paper_fail_fast_triggered)
        .bind(&st.paper_fail_fast_reason)
        .bind(st.historical_last_run_at)
        .bind(passed)
        .bind(return_pct)
        .bind(st.overall_ready)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn append_journal(&self, entry: &ValidationJournalEntry) -> Result<(), DbError> {
        sqlx::query(
            r#"
            insert into validation_journal (id, user_id, created_at, title, summary, details)
            values ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.created_at)
        .bind(&entry.title)
        .bind(&entry.summary)
        .bind(&entry.details)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn journal_entries(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ValidationJournalEntry>, DbError> {
        let rows = sqlx::query(
            r#"
            select id, user_id, created_at, title, summary, details
            from validation_journal
            where user_id = $1
            order by created_at desc, id desc
            limit $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ValidationJournalEntry {
                id: row.try_get("id").map_err(classify_sqlx)?,
                user_id: row.try_get("user_id").map_err(classify_sqlx)?,
                created_at: row.try_get("created_at").map_err(classify_sqlx)?,
                title: row.try_get("title").map_err(classify_sqlx)?,
                summary: row.try_get("summary").map_err(classify_sqlx)?,
                details: row.try_get("details").map_err(classify_sqlx)?,
            });
        }
        Ok(out)
    }

    async fn insert_historical_run(&self, run: &HistoricalRun) -> Result<(), DbError> {
        sqlx::query(
            r#"
            insert into historical_runs (
              id, user_id, symbol, window_days, instrument_type, parameters,
              return_pct, max_drawdown, win_rate, trades_count, passed, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run.id)
        .bind(run.user_id)
        .bind(&run.symbol)
        .bind(run.window_days)
        .bind(run.instrument_type.as_str())
        .bind(&run.parameters)
        .bind(run.return_pct)
        .bind(run.max_drawdown)
        .bind(run.win_rate)
        .bind(run.trades_count)
        .bind(run.passed)
        .bind(run.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    // --- strategy config ---

    async fn active_strategy_config(&self, user_id: Uuid) -> Result<Option<Value>, DbError> {
        let row: Option<(Value,)> = sqlx::query_as(
            r#"
            select snapshot from strategy_configs where user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(row.map(|(v,)| v))
    }

    async fn set_active_strategy_config(
        &self,
        user_id: Uuid,
        snapshot: &Value,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            insert into strategy_configs (user_id, snapshot, updated_at)
            values ($1, $2, now())
            on conflict (user_id) do update
                set snapshot = excluded.snapshot,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(snapshot)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    // --- analytics ---

    async fn record_event(&self, event: &AnalyticsEvent) -> Result<(), DbError> {
        sqlx::query(
            r#"
            insert into analytics_events (event_name, category, properties, created_at)
            values ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.event_name)
        .bind(&event.category)
        .bind(&event.properties)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn events_between(
        &self,
        category: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsEvent>, DbError> {
        let rows = sqlx::query(
            r#"
            select event_name, category, properties, created_at
            from analytics_events
            where category = $1 and created_at >= $2 and created_at < $3
            order by created_at asc
            "#,
        )
        .bind(category)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(AnalyticsEvent {
                event_name: row.try_get("event_name").map_err(classify_sqlx)?,
                category: row.try_get("category").map_err(classify_sqlx)?,
                properties: row.try_get("properties").map_err(classify_sqlx)?,
                created_at: row.try_get("created_at").map_err(classify_sqlx)?,
            });
        }
        Ok(out)
    }
}

