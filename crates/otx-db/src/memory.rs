//! Deterministic in-memory [`Gateway`] used by scenario tests.
//!
//! Semantics mirror `PgGateway` exactly: conditional updates miss with
//! `Conflict`, cross-user mutations fail with `Unauthorized`, the
//! idempotency uniqueness rule covers non-terminal rows only. Critical
//! sections are short synchronous mutex holds; no await happens under lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use otx_schemas::{
    AnalyticsEvent, Credential, HistoricalRun, Holding, JobRun, JobStatus, MarketDataQuality,
    Suggestion, SuggestionStatus, ValidationJournalEntry, ValidationState,
};

use crate::gateway::{DbError, Gateway, JobFailure};

#[derive(Default)]
struct Inner {
    holdings: Vec<Holding>,
    credentials: Vec<Credential>,
    suggestions: Vec<Suggestion>,
    jobs: Vec<JobRun>,
    validation: HashMap<Uuid, ValidationState>,
    journal: Vec<ValidationJournalEntry>,
    historical: Vec<HistoricalRun>,
    strategy_configs: HashMap<Uuid, Value>,
    events: Vec<AnalyticsEvent>,
}

/// Shared-state in-memory store. Clones observe the same data.
#[derive(Clone, Default)]
pub struct MemGateway {
    inner: Arc<Mutex<Inner>>,
}

impl MemGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Test hook: number of JobRun rows (all statuses).
    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Test hook: all journal titles in append order.
    pub fn journal_titles(&self) -> Vec<String> {
        self.lock().journal.iter().map(|e| e.title.clone()).collect()
    }

    /// Test hook: seed holdings without going through upsert.
    pub fn seed_holdings(&self, holdings: Vec<Holding>) {
        self.lock().holdings.extend(holdings);
    }
}

#[async_trait]
impl Gateway for MemGateway {
    // --- users ---

    async fn user_ids(&self) -> Result<Vec<Uuid>, DbError> {
        let inner = self.lock();
        let mut ids: Vec<Uuid> = inner
            .holdings
            .iter()
            .map(|h| h.user_id)
            .chain(inner.validation.keys().copied())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    // --- holdings ---

    async fn holdings_for_user(&self, user_id: Uuid) -> Result<Vec<Holding>, DbError> {
        let inner = self.lock();
        let mut out: Vec<Holding> = inner
            .holdings
            .iter()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn upsert_holding(&self, holding: &Holding) -> Result<(), DbError> {
        let mut inner = self.lock();
        match inner
            .holdings
            .iter_mut()
            .find(|h| h.user_id == holding.user_id && h.symbol == holding.symbol)
        {
            Some(existing) => *existing = holding.clone(),
            None => inner.holdings.push(holding.clone()),
        }
        Ok(())
    }

    // --- credentials ---

    async fn insert_credential(&self, cred: &Credential) -> Result<(), DbError> {
        let mut inner = self.lock();
        if inner.credentials.iter().any(|c| c.id == cred.id) {
            return Err(DbError::ConstraintViolation("duplicate credential id".into()));
        }
        inner.credentials.push(cred.clone());
        Ok(())
    }

    async fn credentials_for_user(&self, user_id: Uuid) -> Result<Vec<Credential>, DbError> {
        let inner = self.lock();
        Ok(inner
            .credentials
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_credentials(&self, user_id: Uuid, provider: &str) -> Result<u64, DbError> {
        let mut inner = self.lock();
        let before = inner.credentials.len();
        inner
            .credentials
            .retain(|c| !(c.user_id == user_id && c.provider == provider));
        Ok((before - inner.credentials.len()) as u64)
    }

    // --- suggestions ---

    async fn insert_suggestion(&self, s: &Suggestion) -> Result<(), DbError> {
        let mut inner = self.lock();
        if inner.suggestions.iter().any(|x| x.id == s.id) {
            return Err(DbError::ConstraintViolation("duplicate suggestion id".into()));
        }
        inner.suggestions.push(s.clone());
        Ok(())
    }

    async fn fetch_suggestion(&self, user_id: Uuid, id: Uuid) -> Result<Suggestion, DbError> {
        let inner = self.lock();
        let s = inner
            .suggestions
            .iter()
            .find(|s| s.id == id)
            .ok_or(DbError::NotFound)?;
        if s.user_id != user_id {
            return Err(DbError::Unauthorized);
        }
        Ok(s.clone())
    }

    async fn active_suggestions(&self, user_id: Uuid) -> Result<Vec<Suggestion>, DbError> {
        let inner = self.lock();
        let mut out: Vec<Suggestion> = inner
            .suggestions
            .iter()
            .filter(|s| s.user_id == user_id && s.status.is_active())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(out)
    }

    async fn terminal_suggestions_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Suggestion>, DbError> {
        let inner = self.lock();
        let mut out: Vec<Suggestion> = inner
            .suggestions
            .iter()
            .filter(|s| {
                s.user_id == user_id
                    && s.status.is_terminal()
                    && s.created_at >= from
                    && s.created_at < to
            })
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
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
        let mut inner = self.lock();
        let s = inner
            .suggestions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(DbError::NotFound)?;
        if s.user_id != user_id {
            return Err(DbError::Unauthorized);
        }
        if s.status != from {
            return Err(DbError::Conflict(format!(
                "suggestion {} not in status {}",
                id,
                from.as_str()
            )));
        }
        s.status = to;
        s.refreshed_at = Some(now);
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
        let mut inner = self.lock();
        let s = inner
            .suggestions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(DbError::NotFound)?;
        if s.user_id != user_id {
            return Err(DbError::Unauthorized);
        }
        if !matches!(
            s.status,
            SuggestionStatus::Executable | SuggestionStatus::NotExecutable
        ) {
            return Err(DbError::Conflict(format!("suggestion {id} not refreshable")));
        }
        s.marketdata_quality = Some(quality.clone());
        s.status = status;
        s.blocked_reason = blocked_reason;
        s.blocked_detail = blocked_detail;
        s.refreshed_at = Some(refreshed_at);
        Ok(())
    }

    // --- job runs ---

    async fn find_active_job(
        &self,
        job_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<JobRun>, DbError> {
        let inner = self.lock();
        Ok(inner
            .jobs
            .iter()
            .find(|j| {
                j.job_name == job_name
                    && j.idempotency_key.as_deref() == Some(idempotency_key)
                    && !j.status.is_terminal()
            })
            .cloned())
    }

    async fn find_job_any_status(
        &self,
        job_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<JobRun>, DbError> {
        let inner = self.lock();
        Ok(inner
            .jobs
            .iter()
            .filter(|j| {
                j.job_name == job_name && j.idempotency_key.as_deref() == Some(idempotency_key)
            })
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn insert_job_run(&self, run: &JobRun) -> Result<(), DbError> {
        let mut inner = self.lock();
        if let Some(key) = &run.idempotency_key {
            let clash = inner.jobs.iter().any(|j| {
                j.job_name == run.job_name
                    && j.idempotency_key.as_deref() == Some(key.as_str())
                    && !j.status.is_terminal()
            });
            if clash {
                return Err(DbError::ConstraintViolation(format!(
                    "active job ({}, {key}) already exists",
                    run.job_name
                )));
            }
        }
        if !run.check_invariants() {
            return Err(DbError::ConstraintViolation("job run invariants".into()));
        }
        inner.jobs.push(run.clone());
        Ok(())
    }

    async fn job_run(&self, id: Uuid) -> Result<JobRun, DbError> {
        let inner = self.lock();
        inner
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<JobRun>, DbError> {
        let mut inner = self.lock();
        let mut due: Vec<usize> = inner
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                matches!(j.status, JobStatus::Pending | JobStatus::FailedRetryable)
                    && j.run_after <= now
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| inner.jobs[i].run_after);
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let j = &mut inner.jobs[i];
            j.status = JobStatus::Processing;
            j.started_at = Some(now);
            claimed.push(j.clone());
        }
        Ok(claimed)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        result: Value,
    ) -> Result<(), DbError> {
        let mut inner = self.lock();
        let j = inner
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(DbError::NotFound)?;
        if j.status != JobStatus::Processing {
            return Err(DbError::Conflict(format!("job {id} not processing")));
        }
        j.status = JobStatus::Completed;
        j.finished_at = Some(now);
        j.duration_ms = j.started_at.map(|s| (now - s).num_milliseconds());
        j.result = Some(result);
        Ok(())
    }

    async fn fail_job(
        &self,
        id: Uuid,
        expect_attempts: i32,
        failure: JobFailure,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut inner = self.lock();
        let j = inner
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(DbError::NotFound)?;
        if j.status != JobStatus::Processing || j.attempt_count != expect_attempts {
            return Err(DbError::Conflict(format!(
                "job {id} not processing at attempt {expect_attempts}"
            )));
        }
        j.status = failure.new_status;
        j.attempt_count += 1;
        j.error = Some(failure.error);
        if let Some(retry_at) = failure.retry_at {
            j.run_after = retry_at;
        }
        if failure.new_status.is_terminal() {
            j.finished_at = Some(now);
            j.duration_ms = j.started_at.map(|s| (now - s).num_milliseconds());
        } else {
            j.started_at = None;
            j.finished_at = None;
            j.duration_ms = None;
        }
        Ok(())
    }

    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
        lease_timeout_secs: i64,
    ) -> Result<u64, DbError> {
        let cutoff = now - chrono::Duration::seconds(lease_timeout_secs);
        let mut inner = self.lock();
        let mut reclaimed = 0u64;
        for j in inner.jobs.iter_mut() {
            if j.status == JobStatus::Processing
                && j.started_at.map(|s| s < cutoff).unwrap_or(false)
            {
                j.status = JobStatus::Pending;
                j.started_at = None;
                j.run_after = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn latest_job_finished_at(
        &self,
        job_name: &str,
        status: JobStatus,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let inner = self.lock();
        Ok(inner
            .jobs
            .iter()
            .filter(|j| j.job_name == job_name && j.status == status)
            .filter_map(|j| j.finished_at)
            .max())
    }

    // --- validation ---

    async fn validation_state(&self, user_id: Uuid) -> Result<Option<ValidationState>, DbError> {
        Ok(self.lock().validation.get(&user_id).cloned())
    }

    async fn upsert_validation_state(&self, state: &ValidationState) -> Result<(), DbError> {
        self.lock().validation.insert(state.user_id, state.clone());
        Ok(())
    }

    async fn append_journal(&self, entry: &ValidationJournalEntry) -> Result<(), DbError> {
        self.lock().journal.push(entry.clone());
        Ok(())
    }

    async fn journal_entries(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ValidationJournalEntry>, DbError> {
        let inner = self.lock();
        let mut out: Vec<ValidationJournalEntry> = inner
            .journal
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        // Newest first, matching the Pg ordering.
        out.reverse();
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn insert_historical_run(&self, run: &HistoricalRun) -> Result<(), DbError> {
        self.lock().historical.push(run.clone());
        Ok(())
    }

    // --- strategy config ---

    async fn active_strategy_config(&self, user_id: Uuid) -> Result<Option<Value>, DbError> {
        Ok(self.lock().strategy_configs.get(&user_id).cloned())
    }

    async fn set_active_strategy_config(
        &self,
        user_id: Uuid,
        snapshot: &Value,
    ) -> Result<(), DbError> {
        self.lock().strategy_configs.insert(user_id, snapshot.clone());
        Ok(())
    }

    // --- analytics ---

    async fn record_event(&self, event: &AnalyticsEvent) -> Result<(), DbError> {
        self.lock().events.push(event.clone());
        Ok(())
    }

    async fn events_between(
        &self,
        category: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsEvent>, DbError> {
        let inner = self.lock();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.category == category && e.created_at >= from && e.created_at < to)
            .cloned()
            .collect())
    }
}
