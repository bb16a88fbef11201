//! Quote provider seam: the HTTP client used in production and a static
//! double for tests, composed with the circuit breaker by [`QuoteService`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use otx_config::Clock;

use crate::breaker::CircuitBreaker;

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// Latest observed market for one symbol.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub asof: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Provider trait + errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider transport failure: {0}")]
    Transport(String),
    #[error("provider rate limited")]
    RateLimited,
    #[error("provider returned status {0}")]
    Status(u16),
    #[error("provider payload malformed: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Transport failures, 5xx and rate limits count against the breaker
    /// and are retryable at the job layer.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::RateLimited => true,
            ProviderError::Status(code) => *code >= 500,
            ProviderError::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Thin reqwest client for the quote provider's JSON endpoint.
pub struct HttpQuoteProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpQuoteProvider {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError> {
        let url = format!("{}/v1/quotes", self.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .get(&url)
            .query(&[("symbols", symbols.join(","))]);
        if let Some(key) = &self.api_key {
            req = req.query(&[("apikey", key.as_str())]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {}
            429 => return Err(ProviderError::RateLimited),
            code => return Err(ProviderError::Status(code)),
        }

        resp.json::<Vec<Quote>>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Static test double
// ---------------------------------------------------------------------------

/// Fixed quote map for deterministic tests. Symbols absent from the map are
/// simply missing from the response (→ FAIL_NO_QUOTE downstream).
#[derive(Clone, Default)]
pub struct StaticQuoteProvider {
    quotes: HashMap<String, Quote>,
    fail_with: Option<Arc<dyn Fn() -> ProviderError + Send + Sync>>,
}

impl StaticQuoteProvider {
    pub fn new(quotes: Vec<Quote>) -> Self {
        Self {
            quotes: quotes.into_iter().map(|q| (q.symbol.clone(), q)).collect(),
            fail_with: None,
        }
    }

    /// Make every call fail (for breaker tests).
    pub fn failing(factory: impl Fn() -> ProviderError + Send + Sync + 'static) -> Self {
        Self {
            quotes: HashMap::new(),
            fail_with: Some(Arc::new(factory)),
        }
    }

    pub fn set_quote(&mut self, quote: Quote) {
        self.quotes.insert(quote.symbol.clone(), quote);
    }
}

#[async_trait]
impl QuoteProvider for StaticQuoteProvider {
    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError> {
        if let Some(factory) = &self.fail_with {
            return Err(factory());
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.quotes.get(s).cloned())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// QuoteService: provider + breaker
// ---------------------------------------------------------------------------

/// Snapshot of the quotes a generator cycle works from.
#[derive(Clone, Debug, Default)]
pub struct QuoteSnapshot {
    pub quotes: HashMap<String, Quote>,
    /// True when the breaker fast-failed the fetch: every symbol scores
    /// FAIL_PROVIDER_OPEN.
    pub provider_open: bool,
}

/// Couples the provider with the process-wide breaker.
pub struct QuoteService {
    provider: Arc<dyn QuoteProvider>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl QuoteService {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            breaker,
            clock,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Fetch a snapshot, honoring the breaker.
    ///
    /// OPEN → fast-fail (snapshot flagged `provider_open`, no provider
    /// traffic). Transient provider errors feed the breaker and surface as
    /// an error for the job layer to classify retryable.
    pub async fn snapshot(&self, symbols: &[String]) -> Result<QuoteSnapshot, ProviderError> {
        let now = self.clock.now();
        if self.breaker.is_open(now) {
            warn!("quote fetch fast-failed: provider circuit open");
            return Ok(QuoteSnapshot {
                quotes: HashMap::new(),
                provider_open: true,
            });
        }

        match self.provider.quotes(symbols).await {
            Ok(quotes) => {
                self.breaker.record_success(self.clock.now());
                Ok(QuoteSnapshot {
                    quotes: quotes.into_iter().map(|q| (q.symbol.clone(), q)).collect(),
                    provider_open: false,
                })
            }
            Err(e) => {
                if e.is_transient() {
                    self.breaker.record_failure(self.clock.now());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, BreakerState};
    use chrono::TimeZone;
    use otx_config::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap()
    }

    fn quote(symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: Some(99.9),
            ask: Some(100.1),
            last: Some(100.0),
            asof: t0(),
        }
    }

    #[tokio::test]
    async fn snapshot_returns_requested_quotes() {
        let provider = Arc::new(StaticQuoteProvider::new(vec![quote("SPY"), quote("QQQ")]));
        let service = QuoteService::new(
            provider,
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            Arc::new(ManualClock::new(t0())),
        );
        let snap = service
            .snapshot(&["SPY".to_string(), "MISSING".to_string()])
            .await
            .unwrap();
        assert!(!snap.provider_open);
        assert!(snap.quotes.contains_key("SPY"));
        assert!(!snap.quotes.contains_key("MISSING"));
    }

    #[tokio::test]
    async fn repeated_transient_failures_open_breaker_and_fast_fail() {
        let provider = Arc::new(StaticQuoteProvider::failing(|| {
            ProviderError::Transport("connection refused".into())
        }));
        let clock = ManualClock::new(t0());
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            window_secs: 60,
            open_secs: 30,
        }));
        let service = QuoteService::new(provider, breaker.clone(), Arc::new(clock.clone()));

        for _ in 0..3 {
            assert!(service.snapshot(&["SPY".to_string()]).await.is_err());
            clock.advance(chrono::Duration::seconds(1));
        }
        assert_eq!(breaker.state(clock.now()), BreakerState::Open);

        // Fast-fail path: no error, snapshot flagged open.
        let snap = service.snapshot(&["SPY".to_string()]).await.unwrap();
        assert!(snap.provider_open);
        assert!(snap.quotes.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_does_not_trip_breaker() {
        let provider = Arc::new(StaticQuoteProvider::failing(|| {
            ProviderError::Malformed("not json".into())
        }));
        let clock = ManualClock::new(t0());
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            window_secs: 60,
            open_secs: 30,
        }));
        let service = QuoteService::new(provider, breaker.clone(), Arc::new(clock.clone()));

        assert!(service.snapshot(&["SPY".to_string()]).await.is_err());
        assert_eq!(breaker.state(clock.now()), BreakerState::Closed);
    }
}
