//! Sizing pass: scale a candidate down until it fits the configured risk
//! caps, recording why it was clamped.

use otx_schemas::SizingMetadata;

use crate::candidate::Candidate;

/// Risk caps, as percentages of portfolio value.
#[derive(Clone, Copy, Debug)]
pub struct SizingCaps {
    pub max_risk_pct_per_trade: f64,
    pub max_risk_pct_portfolio: f64,
}

impl Default for SizingCaps {
    fn default() -> Self {
        Self {
            max_risk_pct_per_trade: 2.0,
            max_risk_pct_portfolio: 10.0,
        }
    }
}

/// Compute the sizing for one candidate.
///
/// `risk_already_committed` is the max-loss total of suggestions already
/// sized this cycle; the portfolio cap applies to the running sum.
/// The multiplier starts at 1.0 and only shrinks; a candidate that cannot
/// fit at all sizes to zero with a clamp reason.
pub fn size_candidate(
    candidate: &Candidate,
    portfolio_value: f64,
    risk_already_committed: f64,
    caps: SizingCaps,
) -> SizingMetadata {
    let base_risk = candidate.metrics.max_loss.max(0.0);

    if base_risk == 0.0 {
        return SizingMetadata {
            capital_required: candidate.capital_required,
            max_loss_total: 0.0,
            risk_multiplier: 1.0,
            clamp_reason: None,
        };
    }
    if portfolio_value <= 0.0 {
        return SizingMetadata {
            capital_required: 0.0,
            max_loss_total: 0.0,
            risk_multiplier: 0.0,
            clamp_reason: Some("no_portfolio_value".to_string()),
        };
    }

    let per_trade_cap = portfolio_value * caps.max_risk_pct_per_trade / 100.0;
    let portfolio_cap = portfolio_value * caps.max_risk_pct_portfolio / 100.0;
    let portfolio_headroom = (portfolio_cap - risk_already_committed).max(0.0);

    let mut multiplier = 1.0_f64;
    let mut clamp_reason = None;

    if base_risk * multiplier > per_trade_cap {
        multiplier = per_trade_cap / base_risk;
        clamp_reason = Some("per_trade_risk_cap".to_string());
    }
    if base_risk * multiplier > portfolio_headroom {
        multiplier = portfolio_headroom / base_risk;
        clamp_reason = Some("portfolio_risk_cap".to_string());
    }
    let multiplier = multiplier.clamp(0.0, 1.0);

    SizingMetadata {
        capital_required: candidate.capital_required * multiplier,
        max_loss_total: base_risk * multiplier,
        risk_multiplier: multiplier,
        clamp_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otx_schemas::SuggestionMetrics;

    fn candidate(max_loss: f64, capital: f64) -> Candidate {
        Candidate {
            strategy: "test".into(),
            symbol: "SPY".into(),
            display_symbol: "SPY".into(),
            legs: Vec::new(),
            limit_price: None,
            metrics: SuggestionMetrics {
                max_loss,
                ..Default::default()
            },
            iv_rank: None,
            iv_regime: None,
            base_score: 50.0,
            capital_required: capital,
        }
    }

    const CAPS: SizingCaps = SizingCaps {
        max_risk_pct_per_trade: 2.0,
        max_risk_pct_portfolio: 10.0,
    };

    #[test]
    fn within_caps_is_unclamped() {
        // 2% of 100k = 2000; risk 1500 fits.
        let s = size_candidate(&candidate(1500.0, 5000.0), 100_000.0, 0.0, CAPS);
        assert_eq!(s.risk_multiplier, 1.0);
        assert_eq!(s.max_loss_total, 1500.0);
        assert_eq!(s.capital_required, 5000.0);
        assert!(s.clamp_reason.is_none());
    }

    #[test]
    fn per_trade_cap_clamps() {
        // Risk 4000 vs cap 2000 → multiplier 0.5.
        let s = size_candidate(&candidate(4000.0, 8000.0), 100_000.0, 0.0, CAPS);
        assert!((s.risk_multiplier - 0.5).abs() < 1e-9);
        assert!((s.max_loss_total - 2000.0).abs() < 1e-9);
        assert!((s.capital_required - 4000.0).abs() < 1e-9);
        assert_eq!(s.clamp_reason.as_deref(), Some("per_trade_risk_cap"));
    }

    #[test]
    fn portfolio_cap_considers_committed_risk() {
        // Portfolio cap 10000, 9500 already committed → headroom 500.
        let s = size_candidate(&candidate(1000.0, 2000.0), 100_000.0, 9500.0, CAPS);
        assert!((s.risk_multiplier - 0.5).abs() < 1e-9);
        assert_eq!(s.clamp_reason.as_deref(), Some("portfolio_risk_cap"));
    }

    #[test]
    fn exhausted_portfolio_budget_sizes_to_zero() {
        let s = size_candidate(&candidate(1000.0, 2000.0), 100_000.0, 10_000.0, CAPS);
        assert_eq!(s.risk_multiplier, 0.0);
        assert_eq!(s.max_loss_total, 0.0);
        assert_eq!(s.clamp_reason.as_deref(), Some("portfolio_risk_cap"));
    }

    #[test]
    fn zero_portfolio_blocks() {
        let s = size_candidate(&candidate(1000.0, 2000.0), 0.0, 0.0, CAPS);
        assert_eq!(s.risk_multiplier, 0.0);
        assert_eq!(s.clamp_reason.as_deref(), Some("no_portfolio_value"));
    }

    #[test]
    fn riskless_candidate_passes_through() {
        let s = size_candidate(&candidate(0.0, 2000.0), 100_000.0, 0.0, CAPS);
        assert_eq!(s.risk_multiplier, 1.0);
        assert!(s.clamp_reason.is_none());
    }
}
