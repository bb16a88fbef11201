//! Shared daemon state and its constructors.
//!
//! Handlers receive `State<Arc<AppState>>`. The state owns only Arc'd
//! seams, so the scenario tests can assemble the same shape over the
//! in-memory gateway and a manual clock.

use std::sync::Arc;

use otx_audit::ProcessCounters;
use otx_config::{AppConfig, AppEnv, Clock, ManualClock, SystemClock};
use otx_db::{Gateway, MemGateway};
use otx_golive::{FailFastThresholds, GoLiveService};
use otx_quality::{
    BreakerConfig, CircuitBreaker, QualityPolicy, QuoteProvider, QuoteService,
    StaticQuoteProvider,
};
use otx_queue::JobQueue;

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub gateway: Arc<dyn Gateway>,
    pub clock: Arc<dyn Clock>,
    pub queue: JobQueue,
    pub quotes: Arc<QuoteService>,
    pub breaker: Arc<CircuitBreaker>,
    pub counters: Arc<ProcessCounters>,
    pub golive: Arc<GoLiveService>,

    pub app_env: AppEnv,
    pub cron_secret: String,
    pub jwt_secret: String,
    pub stale_after_seconds: i64,
    pub quality_policy: QualityPolicy,
    pub default_max_attempts: i32,
}

impl AppState {
    /// Production wiring from resolved config.
    pub fn new(
        config: &AppConfig,
        gateway: Arc<dyn Gateway>,
        provider: Arc<dyn QuoteProvider>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::assemble(config, gateway, provider, clock)
    }

    fn assemble(
        config: &AppConfig,
        gateway: Arc<dyn Gateway>,
        provider: Arc<dyn QuoteProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            window_secs: config.breaker_window_secs,
            open_secs: config.breaker_open_secs,
        }));
        let quotes = Arc::new(QuoteService::new(provider, breaker.clone(), clock.clone()));
        let queue = JobQueue::new(gateway.clone(), clock.clone(), config.default_max_attempts);
        let golive = Arc::new(GoLiveService::new(
            gateway.clone(),
            clock.clone(),
            FailFastThresholds {
                max_drawdown_pct: config.failfast_max_drawdown_pct,
                max_loss_pct: config.failfast_max_loss_pct,
            },
            config.paper_window_days,
            config.paper_checkpoint_target,
        ));

        Self {
            gateway,
            clock,
            queue,
            quotes,
            breaker,
            counters: Arc::new(ProcessCounters::new()),
            golive,
            app_env: config.app_env,
            cron_secret: config.cron_secret.clone(),
            jwt_secret: config.jwt_secret.clone(),
            stale_after_seconds: config.stale_after_seconds,
            quality_policy: QualityPolicy {
                stale_quote_secs: config.stale_quote_secs,
                wide_spread_pct: config.wide_spread_pct,
                defer_on_fail: false,
            },
            default_max_attempts: config.default_max_attempts,
        }
    }

    /// Deterministic state for in-process scenario tests: in-memory
    /// gateway, manual clock pinned to 2024-03-15T11:00Z, static quotes,
    /// fixed secrets.
    pub fn for_tests() -> (AppState, MemGateway, ManualClock) {
        use chrono::TimeZone;

        let gw = MemGateway::new();
        let clock_handle = ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap(),
        );
        let clock: Arc<dyn Clock> = Arc::new(clock_handle.clone());
        let gateway: Arc<dyn Gateway> = Arc::new(gw.clone());

        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let quotes = Arc::new(QuoteService::new(
            Arc::new(StaticQuoteProvider::default()),
            breaker.clone(),
            clock.clone(),
        ));
        let queue = JobQueue::new(gateway.clone(), clock.clone(), 5);
        let golive = Arc::new(GoLiveService::new(
            gateway.clone(),
            clock.clone(),
            FailFastThresholds {
                max_drawdown_pct: 10.0,
                max_loss_pct: 5.0,
            },
            14,
            3,
        ));

        let state = AppState {
            gateway,
            clock,
            queue,
            quotes,
            breaker,
            counters: Arc::new(ProcessCounters::new()),
            golive,
            app_env: AppEnv::Development,
            cron_secret: "test-cron-secret".to_string(),
            jwt_secret: "test-jwt-secret".to_string(),
            stale_after_seconds: 300,
            quality_policy: QualityPolicy::default(),
            default_max_attempts: 5,
        };
        (state, gw, clock_handle)
    }
}
