//! Worker pool: claims due runs, executes handlers under a deadline, and
//! settles the outcome with conditional updates.
//!
//! The settle step is a free function ([`execute_claimed`]) so retry and
//! dead-letter transitions are testable without spawning the pool.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use otx_config::Clock;
use otx_db::{Gateway, JobFailure};
use otx_schemas::{JobRun, JobStatus};

use crate::backoff::{backoff_delay, RetryPolicy};
use crate::error::JobError;
use crate::registry::HandlerRegistry;

// ---------------------------------------------------------------------------
// Single-job settlement
// ---------------------------------------------------------------------------

/// What happened to one claimed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// Retryable failure within budget; row is failed_retryable until
    /// `run_after`.
    Retried { delay: Duration },
    /// Terminal failure with budget remaining.
    Failed,
    /// Attempt budget exhausted.
    DeadLettered,
    /// Conditional settle missed (double delivery / reclaimed lease).
    LostRace,
}

/// Execute a claimed run to completion and settle its status.
pub async fn execute_claimed(
    gateway: &Arc<dyn Gateway>,
    registry: &HandlerRegistry,
    clock: &Arc<dyn Clock>,
    policy: RetryPolicy,
    rng: &mut (impl Rng + Send),
    job: &JobRun,
) -> ExecutionOutcome {
    let attempt_result = match registry.get(&job.job_name) {
        Some(handler) => {
            let deadline = Duration::from_secs(handler.deadline_secs());
            match tokio::time::timeout(deadline, handler.run(job)).await {
                Ok(res) => res,
                Err(_) => Err(JobError::DeadlineExceeded(handler.deadline_secs())),
            }
        }
        None => Err(JobError::Terminal(format!(
            "no handler registered for '{}'",
            job.job_name
        ))),
    };

    let now = clock.now();
    match attempt_result {
        Ok(result) => match gateway.complete_job(job.id, now, result).await {
            Ok(()) => {
                info!(job_name = %job.job_name, job_id = %job.id, "job completed");
                ExecutionOutcome::Completed
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "completion settle missed");
                ExecutionOutcome::LostRace
            }
        },
        Err(job_err) => settle_failure(gateway, clock, policy, rng, job, job_err).await,
    }
}

async fn settle_failure(
    gateway: &Arc<dyn Gateway>,
    clock: &Arc<dyn Clock>,
    policy: RetryPolicy,
    rng: &mut (impl Rng + Send),
    job: &JobRun,
    job_err: JobError,
) -> ExecutionOutcome {
    let now = clock.now();
    let next_attempts = job.attempt_count + 1;
    let budget_spent = next_attempts >= job.max_attempts;

    let (new_status, retry_at, outcome) = if budget_spent {
        (JobStatus::DeadLettered, None, ExecutionOutcome::DeadLettered)
    } else if job_err.is_retryable() {
        let delay = backoff_delay(next_attempts, policy, rng);
        (
            JobStatus::FailedRetryable,
            Some(now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())),
            ExecutionOutcome::Retried { delay },
        )
    } else {
        (JobStatus::Failed, None, ExecutionOutcome::Failed)
    };

    let failure = JobFailure {
        new_status,
        error: format!("{}: {}", job_err.kind(), job_err),
        retry_at,
    };

    match gateway
        .fail_job(job.id, job.attempt_count, failure, now)
        .await
    {
        Ok(()) => {
            warn!(
                job_name = %job.job_name,
                job_id = %job.id,
                status = new_status.as_str(),
                attempt = next_attempts,
                "job attempt failed"
            );
            outcome
        }
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "failure settle missed");
            ExecutionOutcome::LostRace
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub claim_batch_size: i64,
    pub poll_interval: Duration,
    pub lease_timeout_secs: i64,
    pub retry: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            claim_batch_size: 8,
            poll_interval: Duration::from_secs(1),
            lease_timeout_secs: 900,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cooperative worker pool draining the queue alongside the request path.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` drain loops plus one lease-reclaim loop.
    pub fn start(
        gateway: Arc<dyn Gateway>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.worker_count + 1);

        for worker_idx in 0..config.worker_count {
            handles.push(tokio::spawn(drain_loop(
                gateway.clone(),
                registry.clone(),
                clock.clone(),
                config.clone(),
                shutdown_rx.clone(),
                worker_idx,
            )));
        }
        handles.push(tokio::spawn(reclaim_loop(
            gateway,
            clock,
            config,
            shutdown_rx,
        )));

        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal shutdown and wait for all loops to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn drain_loop(
    gateway: Arc<dyn Gateway>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    config: WorkerPoolConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    worker_idx: usize,
) {
    let mut rng = SmallRng::from_entropy();
    let mut ticker = tokio::time::interval(config.poll_interval);
    info!(worker_idx, "queue worker started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let claimed = match gateway
            .claim_due_jobs(clock.now(), config.claim_batch_size)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(worker_idx, error = %e, "claim failed");
                continue;
            }
        };

        for job in &claimed {
            let _ = execute_claimed(&gateway, &registry, &clock, config.retry, &mut rng, job).await;
        }
    }
    info!(worker_idx, "queue worker stopped");
}

async fn reclaim_loop(
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    config: WorkerPoolConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        match gateway
            .reclaim_expired_leases(clock.now(), config.lease_timeout_secs)
            .await
        {
            Ok(0) => {}
            Ok(n) => warn!(reclaimed = n, "reclaimed expired job leases"),
            Err(e) => error!(error = %e, "lease reclaim failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use otx_config::ManualClock;
    use otx_db::MemGateway;
    use rand_chacha::ChaCha8Rng;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::queue::{EnqueueRequest, JobQueue};
    use crate::registry::JobHandler;

    struct FlakyOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for FlakyOnce {
        fn name(&self) -> &'static str {
            "generate.suggestions"
        }

        async fn run(&self, _job: &JobRun) -> Result<Value, JobError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(JobError::ProviderTransient("503 from quote provider".into()))
            } else {
                Ok(serde_json::json!({"generated": 3}))
            }
        }
    }

    struct AlwaysTransient;

    #[async_trait]
    impl JobHandler for AlwaysTransient {
        fn name(&self) -> &'static str {
            "always.transient"
        }

        async fn run(&self, _job: &JobRun) -> Result<Value, JobError> {
            Err(JobError::ProviderTransient("down".into()))
        }
    }

    struct AlwaysTerminal;

    #[async_trait]
    impl JobHandler for AlwaysTerminal {
        fn name(&self) -> &'static str {
            "always.terminal"
        }

        async fn run(&self, _job: &JobRun) -> Result<Value, JobError> {
            Err(JobError::Terminal("malformed payload".into()))
        }
    }

    struct Harness {
        gateway: Arc<dyn Gateway>,
        gw: MemGateway,
        registry: HandlerRegistry,
        clock_handle: ManualClock,
        clock: Arc<dyn Clock>,
        queue: JobQueue,
        rng: ChaCha8Rng,
    }

    fn harness(registry: HandlerRegistry) -> Harness {
        let gw = MemGateway::new();
        let gateway: Arc<dyn Gateway> = Arc::new(gw.clone());
        let clock_handle = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap());
        let clock: Arc<dyn Clock> = Arc::new(clock_handle.clone());
        let queue = JobQueue::new(gateway.clone(), clock.clone(), 5);
        Harness {
            gateway,
            gw,
            registry,
            clock_handle,
            clock,
            queue,
            rng: ChaCha8Rng::seed_from_u64(42),
        }
    }

    impl Harness {
        async fn claim_one(&self) -> JobRun {
            let mut claimed = self
                .gw
                .claim_due_jobs(self.clock.now(), 1)
                .await
                .unwrap();
            assert_eq!(claimed.len(), 1, "expected one claimable job");
            claimed.remove(0)
        }

        async fn execute(&mut self, job: &JobRun) -> ExecutionOutcome {
            execute_claimed(
                &self.gateway,
                &self.registry,
                &self.clock,
                RetryPolicy::default(),
                &mut self.rng,
                job,
            )
            .await
        }
    }

    #[tokio::test]
    async fn retryable_failure_then_success() {
        let registry = HandlerRegistry::new().register(Arc::new(FlakyOnce {
            calls: AtomicU32::new(0),
        }));
        let mut h = harness(registry);

        let out = h
            .queue
            .enqueue(EnqueueRequest::new(
                "generate.suggestions",
                serde_json::json!({"window": "midday_entry"}),
            ))
            .await
            .unwrap();

        // Attempt 1: transient failure → failed_retryable with ~2 s backoff.
        let job = h.claim_one().await;
        let outcome = h.execute(&job).await;
        let delay = match outcome {
            ExecutionOutcome::Retried { delay } => delay,
            other => panic!("expected retry, got {other:?}"),
        };
        assert!(delay >= Duration::from_millis(1600), "{delay:?}");
        assert!(delay <= Duration::from_millis(2400), "{delay:?}");

        let stored = h.gw.job_run(out.job_id()).await.unwrap();
        assert_eq!(stored.status, JobStatus::FailedRetryable);
        assert_eq!(stored.attempt_count, 1);
        let wait = stored.run_after - h.clock.now();
        assert!(wait >= chrono::Duration::milliseconds(1600));
        assert!(wait <= chrono::Duration::milliseconds(2400));

        // Not claimable until the backoff elapses.
        assert!(h.gw.claim_due_jobs(h.clock.now(), 1).await.unwrap().is_empty());

        // Attempt 2: succeeds.
        h.clock_handle.advance(chrono::Duration::seconds(3));
        let job = h.claim_one().await;
        let outcome = h.execute(&job).await;
        assert_eq!(outcome, ExecutionOutcome::Completed);

        let stored = h.gw.job_run(out.job_id()).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.result, Some(serde_json::json!({"generated": 3})));
    }

    #[tokio::test]
    async fn dead_letter_when_budget_spent() {
        let registry = HandlerRegistry::new().register(Arc::new(AlwaysTransient));
        let mut h = harness(registry);

        let out = h
            .queue
            .enqueue(
                EnqueueRequest::new("always.transient", serde_json::json!({})),
            )
            .await
            .unwrap();

        for attempt in 1..=5 {
            h.clock_handle.advance(chrono::Duration::minutes(10));
            let job = h.claim_one().await;
            let outcome = h.execute(&job).await;
            if attempt < 5 {
                assert!(matches!(outcome, ExecutionOutcome::Retried { .. }));
            } else {
                assert_eq!(outcome, ExecutionOutcome::DeadLettered);
            }
        }

        let stored = h.gw.job_run(out.job_id()).await.unwrap();
        assert_eq!(stored.status, JobStatus::DeadLettered);
        // Dead-lettered exactly at the budget.
        assert_eq!(stored.attempt_count, stored.max_attempts);

        // Nothing left to claim.
        h.clock_handle.advance(chrono::Duration::hours(1));
        assert!(h.gw.claim_due_jobs(h.clock.now(), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_parks_without_retry() {
        let registry = HandlerRegistry::new().register(Arc::new(AlwaysTerminal));
        let mut h = harness(registry);

        let out = h
            .queue
            .enqueue(EnqueueRequest::new("always.terminal", serde_json::json!({})))
            .await
            .unwrap();

        let job = h.claim_one().await;
        let outcome = h.execute(&job).await;
        assert_eq!(outcome, ExecutionOutcome::Failed);

        let stored = h.gw.job_run(out.job_id()).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.error.as_deref().unwrap_or("").contains("terminal"));

        h.clock_handle.advance(chrono::Duration::hours(1));
        assert!(h.gw.claim_due_jobs(h.clock.now(), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_job_name_is_terminal() {
        let registry = HandlerRegistry::new();
        let mut h = harness(registry);

        let out = h
            .queue
            .enqueue(EnqueueRequest::new("ghost.job", serde_json::json!({})))
            .await
            .unwrap();
        let job = h.claim_one().await;
        let outcome = h.execute(&job).await;
        assert_eq!(outcome, ExecutionOutcome::Failed);

        let stored = h.gw.job_run(out.job_id()).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored
            .error
            .as_deref()
            .unwrap_or("")
            .contains("no handler registered"));
    }

    #[tokio::test]
    async fn attempt_budget_invariant_holds_throughout() {
        let registry = HandlerRegistry::new().register(Arc::new(AlwaysTransient));
        let mut h = harness(registry);

        let out = h
            .queue
            .enqueue(EnqueueRequest::new("always.transient", serde_json::json!({})))
            .await
            .unwrap();

        loop {
            h.clock_handle.advance(chrono::Duration::minutes(10));
            let claimed = h.gw.claim_due_jobs(h.clock.now(), 1).await.unwrap();
            let Some(job) = claimed.into_iter().next() else {
                break;
            };
            let _ = h.execute(&job).await;
            let stored = h.gw.job_run(out.job_id()).await.unwrap();
            assert!(stored.attempt_count <= stored.max_attempts);
        }

        let stored = h.gw.job_run(out.job_id()).await.unwrap();
        assert_eq!(stored.status, JobStatus::DeadLettered);
    }
}
