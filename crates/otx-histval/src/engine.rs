//! The replay engine: equity momentum runs and rolling-option runs.
//!
//! # Determinism
//!
//! All randomness is drawn from the single `ChaCha8Rng` passed into
//! [`HistoricalEngine::run`]. Concurrent runs derive child seeds from that
//! RNG in run-index order, so a fixed (request, seed) pair produces
//! byte-identical outcomes regardless of scheduling.

use std::sync::Arc;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use otx_schemas::InstrumentType;

use crate::data::{ContractQuote, HistoryProvider};
use crate::types::{
    AggregateOutcome, HistoricalRequest, HistvalError, OptionRight, SingleRunOutcome,
};

/// Fraction of equity allocated to each option segment.
const SEGMENT_ALLOCATION: f64 = 0.10;

pub struct HistoricalEngine {
    provider: Arc<dyn HistoryProvider>,
}

impl HistoricalEngine {
    pub fn new(provider: Arc<dyn HistoryProvider>) -> Self {
        Self { provider }
    }

    /// Execute `concurrent_runs` instances and aggregate.
    ///
    /// `rng` is the single injected randomness source; the engine never
    /// consults any other entropy.
    pub fn run(
        &self,
        req: &HistoricalRequest,
        rng: &mut ChaCha8Rng,
    ) -> Result<AggregateOutcome, HistvalError> {
        req.validate()?;
        let closes = self.provider.daily_closes(&req.symbol, req.window_days)?;

        let mut runs = Vec::with_capacity(req.concurrent_runs as usize);
        for run_idx in 0..req.concurrent_runs {
            let child_seed = rng.next_u64();
            let mut child = ChaCha8Rng::seed_from_u64(child_seed);
            let outcome = match (req.instrument_type, req.use_rolling_contracts) {
                (InstrumentType::Option, true) => {
                    self.run_rolling_options(req, &closes, &mut child)?
                }
                _ => run_equity(&closes, &mut child),
            };
            debug!(
                run_idx,
                return_pct = outcome.return_pct,
                disqualified = outcome.disqualified,
                "historical run instance finished"
            );
            runs.push(outcome);
        }

        Ok(aggregate(runs, req.goal_return_pct))
    }

    fn run_rolling_options(
        &self,
        req: &HistoricalRequest,
        closes: &[f64],
        rng: &mut ChaCha8Rng,
    ) -> Result<SingleRunOutcome, HistvalError> {
        let right = req.option_right.unwrap_or(OptionRight::Call);
        let target_dte = req.option_dte.unwrap_or(30);
        // Per-run perturbation: moneyness target drifts within ±2%.
        let target_moneyness =
            req.option_moneyness.unwrap_or(1.0) * (1.0 + rng.gen_range(-0.02..0.02));

        let mut equity = 1.0_f64;
        let mut curve = Vec::with_capacity(closes.len());
        curve.push(equity);
        let mut trades = 0_i64;
        let mut wins = 0_i64;
        let mut gap_segments = 0_i64;
        let mut disqualified = false;

        let mut day = 0_usize;
        while day < closes.len() {
            let spot = closes[day];
            let chain = self.provider.option_chain(&req.symbol, day, spot)?;
            let selected = select_contract(
                &chain,
                right,
                target_dte,
                target_moneyness,
                spot,
                req.segment_tolerance_pct,
            );

            let segment_len = target_dte.max(1) as usize;
            match selected {
                None => {
                    gap_segments += 1;
                    if req.strict_option_mode {
                        // Disqualifying: the run cannot be trusted.
                        disqualified = true;
                        break;
                    }
                    // Dropped: the segment contributes nothing.
                    day += segment_len;
                    curve.push(equity);
                    continue;
                }
                Some(contract) => {
                    let exit_day = (day + contract.dte.max(1) as usize).min(closes.len() - 1);
                    if exit_day <= day {
                        break;
                    }
                    let exit_spot = closes[exit_day];
                    let intrinsic_at_expiry = match right {
                        OptionRight::Call => (exit_spot - contract.strike).max(0.0),
                        OptionRight::Put => (contract.strike - exit_spot).max(0.0),
                    };
                    let entry = contract.price.max(0.01);
                    let contract_return = ((intrinsic_at_expiry - entry) / entry).clamp(-1.0, 4.0);
                    equity *= 1.0 + contract_return * SEGMENT_ALLOCATION;
                    curve.push(equity);
                    trades += 1;
                    if contract_return > 0.0 {
                        wins += 1;
                    }
                    day = exit_day;
                    if exit_day == closes.len() - 1 {
                        break;
                    }
                }
            }
        }

        Ok(SingleRunOutcome {
            return_pct: (equity - 1.0) * 100.0,
            max_drawdown: max_drawdown(&curve),
            win_rate: ratio(wins, trades),
            trades_count: trades,
            disqualified,
            gap_segments,
        })
    }
}

// ---------------------------------------------------------------------------
// Equity momentum run
// ---------------------------------------------------------------------------

fn run_equity(closes: &[f64], rng: &mut ChaCha8Rng) -> SingleRunOutcome {
    // Per-run perturbation of the momentum lookback.
    let lookback = 10 + rng.gen_range(0..=5) as usize;

    let mut equity = 1.0_f64;
    let mut curve = Vec::with_capacity(closes.len());
    curve.push(equity);

    let mut holding = false;
    let mut entry_equity = equity;
    let mut trades = 0_i64;
    let mut wins = 0_i64;

    for day in 1..closes.len() {
        let momentum_up = day >= lookback && closes[day] > closes[day - lookback];

        if holding {
            let daily = closes[day] / closes[day - 1];
            equity *= daily;
        }
        curve.push(equity);

        if momentum_up && !holding {
            holding = true;
            entry_equity = equity;
        } else if !momentum_up && holding {
            holding = false;
            trades += 1;
            if equity > entry_equity {
                wins += 1;
            }
        }
    }
    if holding {
        trades += 1;
        if equity > entry_equity {
            wins += 1;
        }
    }

    SingleRunOutcome {
        return_pct: (equity - 1.0) * 100.0,
        max_drawdown: max_drawdown(&curve),
        win_rate: ratio(wins, trades),
        trades_count: trades,
        disqualified: false,
        gap_segments: 0,
    }
}

// ---------------------------------------------------------------------------
// Contract selection
// ---------------------------------------------------------------------------

/// Pick the chain contract matching the DTE and moneyness targets, both
/// within `tolerance_pct`. Returns `None` when nothing qualifies (a gap
/// segment).
pub fn select_contract(
    chain: &[ContractQuote],
    right: OptionRight,
    target_dte: i64,
    target_moneyness: f64,
    spot: f64,
    tolerance_pct: f64,
) -> Option<ContractQuote> {
    if spot <= 0.0 || target_dte <= 0 || target_moneyness <= 0.0 {
        return None;
    }

    let mut best: Option<(f64, ContractQuote)> = None;
    for c in chain {
        if c.right != right {
            continue;
        }
        let dte_dev = ((c.dte - target_dte).abs() as f64) / (target_dte as f64) * 100.0;
        if dte_dev > tolerance_pct {
            continue;
        }
        let moneyness = c.strike / spot;
        let mny_dev = ((moneyness - target_moneyness).abs()) / target_moneyness * 100.0;
        if mny_dev > tolerance_pct {
            continue;
        }
        let distance = dte_dev + mny_dev;
        let better = match &best {
            Some((best_distance, _)) => distance < *best_distance,
            None => true,
        };
        if better {
            best = Some((distance, *c));
        }
    }
    best.map(|(_, c)| c)
}

// ---------------------------------------------------------------------------
// Aggregation & curve math
// ---------------------------------------------------------------------------

fn aggregate(mut runs: Vec<SingleRunOutcome>, goal_return_pct: f64) -> AggregateOutcome {
    runs.sort_by(|a, b| {
        a.return_pct
            .partial_cmp(&b.return_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let worst = runs.first().map(|r| r.return_pct).unwrap_or(0.0);
    let best = runs.last().map(|r| r.return_pct).unwrap_or(0.0);
    let median = runs[runs.len() / 2];

    let any_disqualified = runs.iter().any(|r| r.disqualified);
    let passed = !any_disqualified && median.return_pct >= goal_return_pct;

    AggregateOutcome {
        best_return_pct: best,
        median_return_pct: median.return_pct,
        worst_return_pct: worst,
        median,
        runs,
        passed,
        goal_return_pct,
    }
}

fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &e in curve {
        if e > peak {
            peak = e;
        }
        if peak > 0.0 {
            let dd = (peak - e) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

fn ratio(num: i64, den: i64) -> f64 {
    if den <= 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticHistory;
    use crate::types::HistoricalRequest;
    use otx_schemas::InstrumentType;

    fn equity_request() -> HistoricalRequest {
        HistoricalRequest {
            symbol: "SPY".into(),
            window_days: 90,
            instrument_type: InstrumentType::Equity,
            option_right: None,
            option_dte: None,
            option_moneyness: None,
            use_rolling_contracts: false,
            strict_option_mode: false,
            segment_tolerance_pct: 10.0,
            concurrent_runs: 3,
            goal_return_pct: 10.0,
            seed: Some(99),
        }
    }

    fn option_request(strict: bool) -> HistoricalRequest {
        HistoricalRequest {
            symbol: "SPY".into(),
            window_days: 90,
            instrument_type: InstrumentType::Option,
            option_right: Some(OptionRight::Call),
            option_dte: Some(30),
            option_moneyness: Some(1.0),
            use_rolling_contracts: true,
            strict_option_mode: strict,
            segment_tolerance_pct: 10.0,
            concurrent_runs: 3,
            goal_return_pct: 5.0,
            seed: Some(7),
        }
    }

    fn engine() -> HistoricalEngine {
        HistoricalEngine::new(Arc::new(SyntheticHistory))
    }

    #[test]
    fn identical_seed_is_byte_identical() {
        let e = engine();
        let req = equity_request();
        let mut rng_a = ChaCha8Rng::seed_from_u64(1234);
        let mut rng_b = ChaCha8Rng::seed_from_u64(1234);
        let a = e.run(&req, &mut rng_a).unwrap();
        let b = e.run(&req, &mut rng_b).unwrap();

        assert_eq!(a.runs.len(), b.runs.len());
        for (ra, rb) in a.runs.iter().zip(b.runs.iter()) {
            assert_eq!(ra.return_pct.to_bits(), rb.return_pct.to_bits());
            assert_eq!(ra.max_drawdown.to_bits(), rb.max_drawdown.to_bits());
            assert_eq!(ra.trades_count, rb.trades_count);
        }
        assert_eq!(a.median_return_pct.to_bits(), b.median_return_pct.to_bits());
    }

    #[test]
    fn different_seeds_diverge() {
        let e = engine();
        let req = equity_request();
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(2);
        let a = e.run(&req, &mut rng_a).unwrap();
        let b = e.run(&req, &mut rng_b).unwrap();
        // Perturbed lookbacks virtually always yield different curves.
        assert_ne!(
            a.median_return_pct.to_bits(),
            b.median_return_pct.to_bits()
        );
    }

    #[test]
    fn aggregate_orders_best_median_worst() {
        let e = engine();
        let mut req = equity_request();
        req.concurrent_runs = 5;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let out = e.run(&req, &mut rng).unwrap();
        assert_eq!(out.runs.len(), 5);
        assert!(out.worst_return_pct <= out.median_return_pct);
        assert!(out.median_return_pct <= out.best_return_pct);
    }

    #[test]
    fn rolling_options_trade_and_report() {
        let e = engine();
        let req = option_request(false);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let out = e.run(&req, &mut rng).unwrap();
        assert!(out.runs.iter().all(|r| !r.disqualified));
        assert!(out.runs.iter().all(|r| r.trades_count > 0));
    }

    // Empty-chain provider to force selection gaps.
    struct GappyProvider;

    impl HistoryProvider for GappyProvider {
        fn daily_closes(&self, symbol: &str, window_days: i64) -> Result<Vec<f64>, HistvalError> {
            SyntheticHistory.daily_closes(symbol, window_days)
        }

        fn option_chain(
            &self,
            _symbol: &str,
            _day_index: usize,
            _spot: f64,
        ) -> Result<Vec<ContractQuote>, HistvalError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn gap_in_strict_mode_disqualifies() {
        let e = HistoricalEngine::new(Arc::new(GappyProvider));
        let req = option_request(true);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let out = e.run(&req, &mut rng).unwrap();
        assert!(out.runs.iter().all(|r| r.disqualified));
        assert!(!out.passed);
    }

    #[test]
    fn gap_in_lenient_mode_drops_segments() {
        let e = HistoricalEngine::new(Arc::new(GappyProvider));
        let req = option_request(false);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let out = e.run(&req, &mut rng).unwrap();
        for r in &out.runs {
            assert!(!r.disqualified);
            assert!(r.gap_segments > 0);
            assert_eq!(r.trades_count, 0);
            // Dropped segments contribute nothing.
            assert_eq!(r.return_pct, 0.0);
        }
    }

    #[test]
    fn selection_respects_tolerance_boundary() {
        let chain = vec![
            ContractQuote {
                right: OptionRight::Call,
                strike: 100.0,
                dte: 33,
                price: 2.0,
            },
            ContractQuote {
                right: OptionRight::Call,
                strike: 100.0,
                dte: 34,
                price: 2.0,
            },
        ];
        // Target DTE 30, tolerance 10% → 33 qualifies (10% dev), 34 does not.
        let picked = select_contract(&chain[1..], OptionRight::Call, 30, 1.0, 100.0, 10.0);
        assert!(picked.is_none());
        let picked = select_contract(&chain[..1], OptionRight::Call, 30, 1.0, 100.0, 10.0);
        assert_eq!(picked.unwrap().dte, 33);
    }

    #[test]
    fn selection_filters_wrong_right() {
        let chain = vec![ContractQuote {
            right: OptionRight::Put,
            strike: 100.0,
            dte: 30,
            price: 2.0,
        }];
        assert!(select_contract(&chain, OptionRight::Call, 30, 1.0, 100.0, 10.0).is_none());
    }

    #[test]
    fn selection_prefers_closest_match() {
        let chain = vec![
            ContractQuote {
                right: OptionRight::Call,
                strike: 95.0,
                dte: 30,
                price: 2.0,
            },
            ContractQuote {
                right: OptionRight::Call,
                strike: 100.0,
                dte: 30,
                price: 2.0,
            },
        ];
        let picked = select_contract(&chain, OptionRight::Call, 30, 1.0, 100.0, 10.0).unwrap();
        assert_eq!(picked.strike, 100.0);
    }

    #[test]
    fn max_drawdown_of_monotone_curve_is_zero() {
        assert_eq!(max_drawdown(&[1.0, 1.1, 1.2]), 0.0);
        let dd = max_drawdown(&[1.0, 1.2, 0.9, 1.3]);
        assert!((dd - 0.25).abs() < 1e-9);
    }
}
