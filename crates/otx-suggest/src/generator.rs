//! The generator cycle: candidates → gate → sizing → rank → persist.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use otx_config::{trading_day, Clock};
use otx_db::{DbError, Gateway};
use otx_quality::{aggregate_quality, evaluate_symbol, ProviderError, QualityPolicy, QuoteService};
use otx_schemas::{AnalyticsEvent, Suggestion, SuggestionStatus, Window};

use crate::candidate::CandidateSource;
use crate::rank::rank_suggestions;
use crate::sizing::{size_candidate, SizingCaps};

/// Reason tag persisted when the gate blocks a suggestion.
pub const BLOCKED_REASON_QUALITY_GATE: &str = "marketdata_quality_gate";

/// WARN-level downrank halves the pre-gate score.
const DOWNRANK_SCORE_MULT: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("candidate source failed: {0}")]
    Candidates(String),
}

/// Outcome counts for one generator cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub created: usize,
    pub executable: usize,
    pub blocked: usize,
}

pub struct SuggestionGenerator {
    gateway: Arc<dyn Gateway>,
    quotes: Arc<QuoteService>,
    source: Arc<dyn CandidateSource>,
    clock: Arc<dyn Clock>,
    quality_policy: QualityPolicy,
    caps: SizingCaps,
}

impl SuggestionGenerator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        quotes: Arc<QuoteService>,
        source: Arc<dyn CandidateSource>,
        clock: Arc<dyn Clock>,
        quality_policy: QualityPolicy,
        caps: SizingCaps,
    ) -> Self {
        Self {
            gateway,
            quotes,
            source,
            clock,
            quality_policy,
            caps,
        }
    }

    /// Run one generator cycle for (user, window).
    ///
    /// Idempotency comes from the JobRun layer — one cycle per (user,
    /// window, trading day) — so this method itself only ever appends.
    /// `trace_id` links every persisted suggestion back to its JobRun.
    pub async fn generate(
        &self,
        user_id: Uuid,
        window: Window,
        trace_id: Uuid,
    ) -> Result<GenerationSummary, SuggestError> {
        let now = self.clock.now();
        let today = trading_day(now);

        let holdings = self.gateway.holdings_for_user(user_id).await?;
        let strategy_config = self
            .gateway
            .active_strategy_config(user_id)
            .await?
            .unwrap_or_else(|| serde_json::json!({}));

        let candidates = self
            .source
            .candidates(user_id, window, today, &holdings, &strategy_config)
            .await
            .map_err(SuggestError::Candidates)?;

        if candidates.is_empty() {
            info!(%user_id, window = window.as_str(), "generator cycle: no candidates");
            return Ok(GenerationSummary::default());
        }

        // One snapshot per cycle: every candidate is judged against the
        // same market view.
        let mut symbols: Vec<String> = candidates.iter().map(|c| c.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        let snapshot = self.quotes.snapshot(&symbols).await?;

        let portfolio_value: f64 = holdings.iter().map(|h| h.market_value()).sum();
        let mut committed_risk = 0.0_f64;
        let mut suggestions: Vec<Suggestion> = Vec::with_capacity(candidates.len());

        for candidate in &candidates {
            let symbol_quality =
                vec![evaluate_symbol(&candidate.symbol, &snapshot, now, &self.quality_policy)];
            let quality = aggregate_quality(symbol_quality, &self.quality_policy);

            let (status, score, blocked_reason, blocked_detail) = if quality.action.blocks_execution()
            {
                (
                    SuggestionStatus::NotExecutable,
                    candidate.base_score,
                    Some(BLOCKED_REASON_QUALITY_GATE.to_string()),
                    Some(quality.detail.clone()),
                )
            } else if quality.action == otx_schemas::QualityAction::Downrank {
                (
                    SuggestionStatus::Executable,
                    candidate.base_score * DOWNRANK_SCORE_MULT,
                    None,
                    None,
                )
            } else {
                (SuggestionStatus::Executable, candidate.base_score, None, None)
            };

            let sizing = if status == SuggestionStatus::Executable {
                let s = size_candidate(candidate, portfolio_value, committed_risk, self.caps);
                committed_risk += s.max_loss_total;
                s
            } else {
                // Blocked candidates consume no risk budget.
                size_candidate(candidate, portfolio_value, committed_risk, self.caps)
            };

            let suggestion = Suggestion {
                id: Uuid::new_v4(),
                user_id,
                window,
                strategy: candidate.strategy.clone(),
                symbol: candidate.symbol.clone(),
                display_symbol: candidate.display_symbol.clone(),
                legs: candidate.legs.clone(),
                limit_price: candidate.limit_price,
                metrics: candidate.metrics,
                iv_rank: candidate.iv_rank,
                iv_regime: candidate.iv_regime.clone(),
                score,
                status,
                blocked_reason,
                blocked_detail,
                marketdata_quality: Some(quality),
                sizing,
                trace_id,
                created_at: now,
                refreshed_at: None,
            };

            // Structurally invalid candidates are dropped, not persisted.
            if suggestion.validate(today).is_err() {
                continue;
            }
            suggestions.push(suggestion);
        }

        rank_suggestions(&mut suggestions);

        let mut summary = GenerationSummary::default();
        for s in &suggestions {
            self.gateway.insert_suggestion(s).await?;
            summary.created += 1;
            match s.status {
                SuggestionStatus::Executable => summary.executable += 1,
                SuggestionStatus::NotExecutable => summary.blocked += 1,
                _ => {}
            }
        }

        self.gateway
            .record_event(&AnalyticsEvent {
                event_name: "suggestions.generated".to_string(),
                category: "generator".to_string(),
                properties: serde_json::json!({
                    "user_id": user_id,
                    "window": window.as_str(),
                    "created": summary.created,
                    "executable": summary.executable,
                    "blocked": summary.blocked,
                    "trace_id": trace_id,
                }),
                created_at: now,
            })
            .await?;

        info!(
            %user_id,
            window = window.as_str(),
            created = summary.created,
            blocked = summary.blocked,
            "generator cycle complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use otx_config::ManualClock;
    use otx_db::MemGateway;
    use otx_quality::{BreakerConfig, CircuitBreaker, Quote, StaticQuoteProvider};
    use otx_schemas::{
        AssetType, Holding, Leg, LegAction, LegType, QualityAction, SuggestionMetrics,
    };

    use crate::candidate::{Candidate, StaticCandidateSource};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap()
    }

    fn quote(symbol: &str, bid: f64, ask: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: Some(bid),
            ask: Some(ask),
            last: Some((bid + ask) / 2.0),
            asof: t0(),
        }
    }

    fn candidate(symbol: &str, score: f64, max_loss: f64) -> Candidate {
        Candidate {
            strategy: "cash_secured_put".into(),
            symbol: symbol.to_string(),
            display_symbol: symbol.to_string(),
            legs: vec![Leg {
                action: LegAction::Sell,
                leg_type: LegType::Put,
                quantity: 1,
                strike: Some(480.0),
                expiry: Some(chrono::NaiveDate::from_ymd_opt(2024, 4, 19).unwrap()),
                option_symbol: None,
            }],
            limit_price: Some(1.50),
            metrics: SuggestionMetrics {
                ev: 40.0,
                win_rate: 0.7,
                kelly: 0.05,
                max_loss,
                max_profit: 150.0,
            },
            iv_rank: Some(35.0),
            iv_regime: None,
            base_score: score,
            capital_required: max_loss,
        }
    }

    fn holdings(user: Uuid) -> Vec<Holding> {
        vec![Holding {
            user_id: user,
            symbol: "CASH".into(),
            asset_type: AssetType::Cash,
            quantity: 100_000.0,
            cost_basis: 100_000.0,
            current_price: 1.0,
            greeks: None,
            sector: None,
            updated_at: t0(),
        }]
    }

    fn generator(
        gw: &MemGateway,
        quotes: Vec<Quote>,
        candidates: Vec<Candidate>,
    ) -> SuggestionGenerator {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = Arc::new(QuoteService::new(
            Arc::new(StaticQuoteProvider::new(quotes)),
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            clock.clone(),
        ));
        SuggestionGenerator::new(
            Arc::new(gw.clone()),
            service,
            Arc::new(StaticCandidateSource::new(candidates)),
            clock,
            QualityPolicy::default(),
            SizingCaps::default(),
        )
    }

    #[tokio::test]
    async fn clean_market_produces_executable_suggestions() {
        let gw = MemGateway::new();
        let user = Uuid::new_v4();
        gw.seed_holdings(holdings(user));

        let g = generator(
            &gw,
            vec![quote("SPY", 499.9, 500.1)],
            vec![candidate("SPY", 60.0, 500.0)],
        );
        let summary = g.generate(user, Window::MiddayEntry, Uuid::new_v4()).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.executable, 1);
        assert_eq!(summary.blocked, 0);

        let stored = gw.active_suggestions(user).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, SuggestionStatus::Executable);
        assert_eq!(
            stored[0].marketdata_quality.as_ref().unwrap().action,
            QualityAction::Accept
        );
    }

    #[tokio::test]
    async fn crossed_quote_blocks_with_gate_reason() {
        let gw = MemGateway::new();
        let user = Uuid::new_v4();
        gw.seed_holdings(holdings(user));

        // SPY bid above ask: FAIL_CROSSED.
        let g = generator(
            &gw,
            vec![quote("SPY", 500.2, 500.0)],
            vec![candidate("SPY", 60.0, 500.0)],
        );
        let summary = g.generate(user, Window::MiddayEntry, Uuid::new_v4()).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.blocked, 1);

        let stored = gw.active_suggestions(user).await.unwrap();
        let s = &stored[0];
        assert_eq!(s.status, SuggestionStatus::NotExecutable);
        assert_eq!(s.blocked_reason.as_deref(), Some(BLOCKED_REASON_QUALITY_GATE));
        assert!(s.blocked_detail.as_deref().unwrap().contains("SPY:FAIL_CROSSED"));
    }

    #[tokio::test]
    async fn stale_quote_downranks_score() {
        let gw = MemGateway::new();
        let user = Uuid::new_v4();
        gw.seed_holdings(holdings(user));

        let mut stale = quote("SPY", 499.9, 500.1);
        stale.asof = t0() - chrono::Duration::seconds(600);
        let g = generator(&gw, vec![stale], vec![candidate("SPY", 60.0, 500.0)]);
        g.generate(user, Window::MiddayEntry, Uuid::new_v4()).await.unwrap();

        let stored = gw.active_suggestions(user).await.unwrap();
        assert_eq!(stored[0].status, SuggestionStatus::Executable);
        assert_eq!(stored[0].score, 30.0); // 60 halved
    }

    #[tokio::test]
    async fn trace_id_links_suggestions_to_run() {
        let gw = MemGateway::new();
        let user = Uuid::new_v4();
        gw.seed_holdings(holdings(user));

        let trace = Uuid::new_v4();
        let g = generator(
            &gw,
            vec![quote("SPY", 499.9, 500.1), quote("QQQ", 429.9, 430.1)],
            vec![candidate("SPY", 60.0, 500.0), candidate("QQQ", 55.0, 400.0)],
        );
        g.generate(user, Window::MorningLimit, trace).await.unwrap();

        let stored = gw.active_suggestions(user).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|s| s.trace_id == trace));
    }

    #[tokio::test]
    async fn portfolio_risk_budget_accumulates_across_candidates() {
        let gw = MemGateway::new();
        let user = Uuid::new_v4();
        gw.seed_holdings(holdings(user));

        // Portfolio 100k → per-trade cap 2000, portfolio cap 10000.
        // Six candidates of risk 2000 each: the last one must hit the
        // portfolio cap (5 * 2000 = 10000 committed).
        let candidates: Vec<Candidate> = (0..6)
            .map(|i| candidate(&format!("SY{i}"), 60.0 - i as f64, 2000.0))
            .collect();
        let quotes: Vec<Quote> = (0..6)
            .map(|i| quote(&format!("SY{i}"), 99.9, 100.1))
            .collect();

        let g = generator(&gw, quotes, candidates);
        g.generate(user, Window::Rebalance, Uuid::new_v4()).await.unwrap();

        let stored = gw.active_suggestions(user).await.unwrap();
        let clamped: Vec<_> = stored
            .iter()
            .filter(|s| s.sizing.clamp_reason.as_deref() == Some("portfolio_risk_cap"))
            .collect();
        assert_eq!(clamped.len(), 1);
        assert_eq!(clamped[0].sizing.risk_multiplier, 0.0);
    }
}
