//! Per-symbol scoring and the per-suggestion aggregation policy.

use chrono::{DateTime, Utc};

use otx_schemas::{MarketDataQuality, QualityAction, QualityCode, SymbolQuality};

use crate::provider::QuoteSnapshot;

/// Gate policy knobs.
#[derive(Clone, Copy, Debug)]
pub struct QualityPolicy {
    /// Quote age beyond which a symbol scores WARN_STALE.
    pub stale_quote_secs: i64,
    /// Relative spread (pct of mid) beyond which a symbol scores
    /// WARN_WIDE_SPREAD.
    pub wide_spread_pct: f64,
    /// Policy override: FAIL aggregates to `defer` instead of `skip_fatal`.
    pub defer_on_fail: bool,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            stale_quote_secs: 120,
            wide_spread_pct: 5.0,
            defer_on_fail: false,
        }
    }
}

const SCORE_OK: f64 = 100.0;
const SCORE_WARN: f64 = 75.0;
const SCORE_FAIL: f64 = 0.0;

fn score_for(code: QualityCode) -> f64 {
    if code.is_fail() {
        SCORE_FAIL
    } else if code.is_warn() {
        SCORE_WARN
    } else {
        SCORE_OK
    }
}

/// Score one symbol against the snapshot.
pub fn evaluate_symbol(
    symbol: &str,
    snapshot: &QuoteSnapshot,
    now: DateTime<Utc>,
    policy: &QualityPolicy,
) -> SymbolQuality {
    let code = symbol_code(symbol, snapshot, now, policy);
    SymbolQuality {
        symbol: symbol.to_string(),
        code,
        score: score_for(code),
    }
}

fn symbol_code(
    symbol: &str,
    snapshot: &QuoteSnapshot,
    now: DateTime<Utc>,
    policy: &QualityPolicy,
) -> QualityCode {
    if snapshot.provider_open {
        return QualityCode::FailProviderOpen;
    }
    let Some(quote) = snapshot.quotes.get(symbol) else {
        return QualityCode::FailNoQuote;
    };

    match (quote.bid, quote.ask) {
        (Some(bid), Some(ask)) => {
            if bid > ask {
                return QualityCode::FailCrossed;
            }
            if (now - quote.asof).num_seconds() > policy.stale_quote_secs {
                return QualityCode::WarnStale;
            }
            let mid = (bid + ask) / 2.0;
            if mid > 0.0 {
                let spread_pct = (ask - bid) / mid * 100.0;
                if spread_pct > policy.wide_spread_pct {
                    return QualityCode::WarnWideSpread;
                }
            }
            QualityCode::Ok
        }
        // A one-sided or empty book cannot price a trade.
        _ => {
            if quote.last.is_some() {
                if (now - quote.asof).num_seconds() > policy.stale_quote_secs {
                    QualityCode::WarnStale
                } else {
                    QualityCode::WarnWideSpread
                }
            } else {
                QualityCode::FailNoQuote
            }
        }
    }
}

/// Aggregate per-symbol verdicts into the suggestion-level action.
///
/// - Any FAIL → `skip_fatal`, or `defer` under the policy override.
/// - Two or more WARNs (repeat or combined) → `defer`.
/// - One WARN → `downrank`.
/// - All OK → `accept`.
pub fn aggregate_quality(symbols: Vec<SymbolQuality>, policy: &QualityPolicy) -> MarketDataQuality {
    let any_fail = symbols.iter().any(|s| s.code.is_fail());
    let warn_count = symbols.iter().filter(|s| s.code.is_warn()).count();

    let action = if any_fail {
        if policy.defer_on_fail {
            QualityAction::Defer
        } else {
            QualityAction::SkipFatal
        }
    } else if warn_count >= 2 {
        QualityAction::Defer
    } else if warn_count == 1 {
        QualityAction::Downrank
    } else {
        QualityAction::Accept
    };

    let score = symbols
        .iter()
        .map(|s| s.score)
        .fold(f64::INFINITY, f64::min);
    let score = if score.is_finite() { score } else { SCORE_OK };

    let mut flagged: Vec<String> = symbols
        .iter()
        .filter(|s| s.code != QualityCode::Ok)
        .map(|s| format!("{}:{}", s.symbol, s.code.as_str()))
        .collect();
    flagged.sort();
    let detail = if flagged.is_empty() {
        "OK".to_string()
    } else {
        flagged.join(",")
    };

    MarketDataQuality {
        action,
        score,
        symbols,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Quote;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap()
    }

    fn snapshot(quotes: Vec<Quote>) -> QuoteSnapshot {
        QuoteSnapshot {
            quotes: quotes.into_iter().map(|q| (q.symbol.clone(), q)).collect(),
            provider_open: false,
        }
    }

    fn quote(symbol: &str, bid: f64, ask: f64, asof: DateTime<Utc>) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: Some(bid),
            ask: Some(ask),
            last: Some((bid + ask) / 2.0),
            asof,
        }
    }

    fn policy() -> QualityPolicy {
        QualityPolicy::default()
    }

    #[test]
    fn healthy_quote_is_ok() {
        let snap = snapshot(vec![quote("SPY", 499.9, 500.1, t0())]);
        let q = evaluate_symbol("SPY", &snap, t0(), &policy());
        assert_eq!(q.code, QualityCode::Ok);
        assert_eq!(q.score, 100.0);
    }

    #[test]
    fn crossed_market_fails() {
        let snap = snapshot(vec![quote("SPY", 500.2, 500.0, t0())]);
        let q = evaluate_symbol("SPY", &snap, t0(), &policy());
        assert_eq!(q.code, QualityCode::FailCrossed);
        assert_eq!(q.score, 0.0);
    }

    #[test]
    fn missing_symbol_fails_no_quote() {
        let snap = snapshot(vec![]);
        let q = evaluate_symbol("SPY", &snap, t0(), &policy());
        assert_eq!(q.code, QualityCode::FailNoQuote);
    }

    #[test]
    fn provider_open_fails_every_symbol() {
        let snap = QuoteSnapshot {
            quotes: HashMap::new(),
            provider_open: true,
        };
        let q = evaluate_symbol("SPY", &snap, t0(), &policy());
        assert_eq!(q.code, QualityCode::FailProviderOpen);
    }

    #[test]
    fn stale_quote_warns_past_threshold() {
        let asof = t0() - chrono::Duration::seconds(121);
        let snap = snapshot(vec![quote("SPY", 499.9, 500.1, asof)]);
        let q = evaluate_symbol("SPY", &snap, t0(), &policy());
        assert_eq!(q.code, QualityCode::WarnStale);

        // Exactly at the threshold is still fresh.
        let asof = t0() - chrono::Duration::seconds(120);
        let snap = snapshot(vec![quote("SPY", 499.9, 500.1, asof)]);
        let q = evaluate_symbol("SPY", &snap, t0(), &policy());
        assert_eq!(q.code, QualityCode::Ok);
    }

    #[test]
    fn wide_spread_warns() {
        // 6% spread on mid 100.
        let snap = snapshot(vec![quote("XYZ", 97.0, 103.0, t0())]);
        let q = evaluate_symbol("XYZ", &snap, t0(), &policy());
        assert_eq!(q.code, QualityCode::WarnWideSpread);
    }

    #[test]
    fn aggregate_all_ok_accepts() {
        let symbols = vec![
            SymbolQuality {
                symbol: "SPY".into(),
                code: QualityCode::Ok,
                score: 100.0,
            },
            SymbolQuality {
                symbol: "QQQ".into(),
                code: QualityCode::Ok,
                score: 100.0,
            },
        ];
        let agg = aggregate_quality(symbols, &policy());
        assert_eq!(agg.action, QualityAction::Accept);
        assert_eq!(agg.score, 100.0);
        assert_eq!(agg.detail, "OK");
    }

    #[test]
    fn aggregate_single_warn_downranks() {
        let symbols = vec![SymbolQuality {
            symbol: "SPY".into(),
            code: QualityCode::WarnStale,
            score: 75.0,
        }];
        let agg = aggregate_quality(symbols, &policy());
        assert_eq!(agg.action, QualityAction::Downrank);
        assert_eq!(agg.detail, "SPY:WARN_STALE");
    }

    #[test]
    fn aggregate_combined_warns_defer() {
        let symbols = vec![
            SymbolQuality {
                symbol: "SPY".into(),
                code: QualityCode::WarnStale,
                score: 75.0,
            },
            SymbolQuality {
                symbol: "QQQ".into(),
                code: QualityCode::WarnWideSpread,
                score: 75.0,
            },
        ];
        let agg = aggregate_quality(symbols, &policy());
        assert_eq!(agg.action, QualityAction::Defer);
    }

    #[test]
    fn aggregate_fail_is_fatal_unless_override() {
        let symbols = vec![SymbolQuality {
            symbol: "SPY".into(),
            code: QualityCode::FailCrossed,
            score: 0.0,
        }];
        let agg = aggregate_quality(symbols.clone(), &policy());
        assert_eq!(agg.action, QualityAction::SkipFatal);
        assert_eq!(agg.detail, "SPY:FAIL_CROSSED");
        assert_eq!(agg.score, 0.0);

        let defer_policy = QualityPolicy {
            defer_on_fail: true,
            ..policy()
        };
        let agg = aggregate_quality(symbols, &defer_policy);
        assert_eq!(agg.action, QualityAction::Defer);
    }

    #[test]
    fn aggregate_empty_symbol_set_accepts() {
        let agg = aggregate_quality(vec![], &policy());
        assert_eq!(agg.action, QualityAction::Accept);
        assert_eq!(agg.score, 100.0);
    }
}
