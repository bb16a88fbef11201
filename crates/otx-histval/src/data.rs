//! History data seam.
//!
//! Real market-data ingest lives outside this subsystem; the engine only
//! needs a daily close series and, for rolling option runs, the contract
//! chain visible on a given day. [`SyntheticHistory`] provides a
//! deterministic dataset derived from the symbol so validation runs are
//! reproducible anywhere.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::types::{HistvalError, OptionRight};

/// One listed contract visible on a simulated day.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContractQuote {
    pub right: OptionRight,
    pub strike: f64,
    pub dte: i64,
    /// Per-share premium.
    pub price: f64,
}

/// Source of simulated market history. Implementations must be pure
/// functions of their inputs.
pub trait HistoryProvider: Send + Sync {
    /// Daily closes, oldest first, exactly `window_days` entries.
    fn daily_closes(&self, symbol: &str, window_days: i64) -> Result<Vec<f64>, HistvalError>;

    /// The option chain visible at `day_index` with the underlying at
    /// `spot`.
    fn option_chain(
        &self,
        symbol: &str,
        day_index: usize,
        spot: f64,
    ) -> Result<Vec<ContractQuote>, HistvalError>;
}

// ---------------------------------------------------------------------------
// Synthetic provider
// ---------------------------------------------------------------------------

/// Deterministic synthetic dataset: a random-walk close series seeded from
/// the symbol, and a dense strike/expiry grid for the chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticHistory;

const BASE_PRICE: f64 = 100.0;
const DAILY_VOL: f64 = 0.012;
const DRIFT: f64 = 0.0006;

fn symbol_seed(symbol: &str) -> u64 {
    // FNV-1a keeps the series stable across processes without pulling in a
    // hashing crate.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in symbol.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl HistoryProvider for SyntheticHistory {
    fn daily_closes(&self, symbol: &str, window_days: i64) -> Result<Vec<f64>, HistvalError> {
        if window_days < 2 {
            return Err(HistvalError::Data(format!(
                "window too small: {window_days}"
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(symbol_seed(symbol));
        let mut closes = Vec::with_capacity(window_days as usize);
        let mut price = BASE_PRICE;
        for _ in 0..window_days {
            let shock: f64 = rng.gen_range(-1.0..1.0);
            price *= 1.0 + DRIFT + DAILY_VOL * shock;
            price = price.max(1.0);
            closes.push(price);
        }
        Ok(closes)
    }

    fn option_chain(
        &self,
        _symbol: &str,
        _day_index: usize,
        spot: f64,
    ) -> Result<Vec<ContractQuote>, HistvalError> {
        if spot <= 0.0 {
            return Err(HistvalError::Data(format!("non-positive spot {spot}")));
        }
        let mut chain = Vec::new();
        for dte in [7_i64, 14, 21, 30, 45, 60] {
            // Strikes from 80% to 120% of spot in 2.5% steps.
            for step in 0..=16 {
                let strike = spot * (0.80 + 0.025 * step as f64);
                let time_value = spot * 0.004 * (dte as f64).sqrt();
                for right in [OptionRight::Call, OptionRight::Put] {
                    let intrinsic = match right {
                        OptionRight::Call => (spot - strike).max(0.0),
                        OptionRight::Put => (strike - spot).max(0.0),
                    };
                    chain.push(ContractQuote {
                        right,
                        strike,
                        dte,
                        price: intrinsic + time_value,
                    });
                }
            }
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_are_deterministic_per_symbol() {
        let p = SyntheticHistory;
        let a = p.daily_closes("SPY", 90).unwrap();
        let b = p.daily_closes("SPY", 90).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 90);

        let other = p.daily_closes("QQQ", 90).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn closes_stay_positive() {
        let p = SyntheticHistory;
        for symbol in ["SPY", "TSLA", "XYZ"] {
            assert!(p
                .daily_closes(symbol, 365)
                .unwrap()
                .iter()
                .all(|c| *c > 0.0));
        }
    }

    #[test]
    fn chain_covers_both_rights_and_target_dtes() {
        let p = SyntheticHistory;
        let chain = p.option_chain("SPY", 0, 100.0).unwrap();
        assert!(chain.iter().any(|c| c.right == OptionRight::Call));
        assert!(chain.iter().any(|c| c.right == OptionRight::Put));
        assert!(chain.iter().any(|c| c.dte == 30));
        assert!(chain.iter().all(|c| c.price >= 0.0));
    }

    #[test]
    fn chain_strikes_bracket_spot() {
        let p = SyntheticHistory;
        let chain = p.option_chain("SPY", 0, 200.0).unwrap();
        assert!(chain.iter().any(|c| c.strike < 200.0));
        assert!(chain.iter().any(|c| c.strike > 200.0));
    }
}
