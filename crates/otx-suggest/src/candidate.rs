//! Candidate intake seam.
//!
//! A candidate is a raw trade idea before the quality gate and sizing pass.
//! Production wires [`HoldingsScanSource`]; richer optimizer-backed sources
//! plug in behind the same trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

use otx_schemas::{Holding, Leg, LegAction, LegType, SuggestionMetrics, Window};

/// One raw trade idea.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub strategy: String,
    pub symbol: String,
    pub display_symbol: String,
    pub legs: Vec<Leg>,
    pub limit_price: Option<f64>,
    pub metrics: SuggestionMetrics,
    pub iv_rank: Option<f64>,
    pub iv_regime: Option<String>,
    /// Pre-gate ranking score; the gate may downrank it.
    pub base_score: f64,
    /// Capital consumed at 1x sizing.
    pub capital_required: f64,
}

/// Where candidates come from. Implementations must be deterministic for a
/// given input so generator retries stay idempotent.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(
        &self,
        user_id: Uuid,
        window: Window,
        today: NaiveDate,
        holdings: &[Holding],
        strategy_config: &Value,
    ) -> Result<Vec<Candidate>, String>;
}

// ---------------------------------------------------------------------------
// Holdings scan source
// ---------------------------------------------------------------------------

/// Covered-call scan over equity holdings: any position of 100+ shares
/// yields one sell-call candidate at a 5% out-of-the-money strike, 30 days
/// out. Deliberately simple; the heavy optimizer is external.
#[derive(Clone, Copy, Debug, Default)]
pub struct HoldingsScanSource;

const CONTRACT_SIZE: f64 = 100.0;
const OTM_PCT: f64 = 0.05;
const TARGET_DTE: i64 = 30;

#[async_trait]
impl CandidateSource for HoldingsScanSource {
    async fn candidates(
        &self,
        _user_id: Uuid,
        window: Window,
        today: NaiveDate,
        holdings: &[Holding],
        _strategy_config: &Value,
    ) -> Result<Vec<Candidate>, String> {
        // Scout windows explore; the scan source only works covered calls
        // in entry/rebalance windows.
        if window == Window::Scout {
            return Ok(Vec::new());
        }

        let expiry = today + chrono::Duration::days(TARGET_DTE);
        let mut out = Vec::new();

        for h in holdings {
            if h.asset_type != otx_schemas::AssetType::Equity {
                continue;
            }
            let contracts = (h.quantity / CONTRACT_SIZE).floor() as i64;
            if contracts < 1 || h.current_price <= 0.0 {
                continue;
            }

            let strike = round_strike(h.current_price * (1.0 + OTM_PCT));
            // Flat premium heuristic: 1% of spot per contract-share.
            let premium = h.current_price * 0.01;
            let max_profit = premium * CONTRACT_SIZE * contracts as f64;
            // Covered call risk is opportunity cost; use premium give-back
            // as the bounded loss figure for sizing.
            let max_loss = premium * CONTRACT_SIZE * contracts as f64;

            out.push(Candidate {
                strategy: "covered_call".to_string(),
                symbol: h.symbol.clone(),
                display_symbol: h.symbol.clone(),
                legs: vec![Leg {
                    action: LegAction::Sell,
                    leg_type: LegType::Call,
                    quantity: contracts,
                    strike: Some(strike),
                    expiry: Some(expiry),
                    option_symbol: None,
                }],
                limit_price: Some(premium),
                metrics: SuggestionMetrics {
                    ev: max_profit * 0.55,
                    win_rate: 0.65,
                    kelly: 0.04,
                    max_loss,
                    max_profit,
                },
                iv_rank: None,
                iv_regime: None,
                base_score: 50.0 + (contracts as f64).min(10.0),
                capital_required: 0.0,
            });
        }

        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }
}

fn round_strike(raw: f64) -> f64 {
    if raw >= 100.0 {
        (raw / 5.0).round() * 5.0
    } else {
        raw.round()
    }
}

// ---------------------------------------------------------------------------
// Static test double
// ---------------------------------------------------------------------------

/// Fixed candidate list for tests.
#[derive(Clone, Default)]
pub struct StaticCandidateSource {
    pub candidates: Vec<Candidate>,
}

impl StaticCandidateSource {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn candidates(
        &self,
        _user_id: Uuid,
        _window: Window,
        _today: NaiveDate,
        _holdings: &[Holding],
        _strategy_config: &Value,
    ) -> Result<Vec<Candidate>, String> {
        Ok(self.candidates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use otx_schemas::AssetType;

    fn holding(symbol: &str, qty: f64, price: f64) -> Holding {
        Holding {
            user_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            asset_type: AssetType::Equity,
            quantity: qty,
            cost_basis: price * 0.9,
            current_price: price,
            greeks: None,
            sector: None,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn scan_emits_covered_call_per_round_lot() {
        let source = HoldingsScanSource;
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let holdings = vec![
            holding("SPY", 250.0, 500.0),
            holding("ODD", 50.0, 40.0), // below one lot, skipped
        ];
        let out = source
            .candidates(
                Uuid::new_v4(),
                Window::MiddayEntry,
                today,
                &holdings,
                &serde_json::json!({}),
            )
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.symbol, "SPY");
        assert_eq!(c.legs.len(), 1);
        assert_eq!(c.legs[0].quantity, 2);
        assert_eq!(c.legs[0].strike, Some(525.0));
        assert_eq!(
            c.legs[0].expiry,
            Some(NaiveDate::from_ymd_opt(2024, 4, 14).unwrap())
        );
    }

    #[tokio::test]
    async fn scout_window_is_empty_for_scan_source() {
        let source = HoldingsScanSource;
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let out = source
            .candidates(
                Uuid::new_v4(),
                Window::Scout,
                today,
                &[holding("SPY", 100.0, 500.0)],
                &serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn strike_rounding() {
        assert_eq!(round_strike(525.3), 525.0);
        assert_eq!(round_strike(527.6), 530.0);
        assert_eq!(round_strike(42.4), 42.0);
    }
}
