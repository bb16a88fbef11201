//! Persistence around the engine: HistoricalRun rows, ValidationState
//! updates, and the journal trail.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use uuid::Uuid;

use otx_config::{snapshot_hash, Clock};
use otx_db::Gateway;
use otx_schemas::{
    HistoricalResult, HistoricalRun, ValidationJournalEntry, ValidationState,
};

use crate::engine::HistoricalEngine;
use crate::types::{AggregateOutcome, HistoricalRequest, HistvalError};

pub const JOURNAL_HISTORICAL_PASSED: &str = "Historical Passed";
pub const JOURNAL_HISTORICAL_FAILED: &str = "Historical Failed";

pub struct ValidationService {
    gateway: Arc<dyn Gateway>,
    engine: HistoricalEngine,
    clock: Arc<dyn Clock>,
    /// Defaults applied when a user has no ValidationState row yet.
    paper_window_days: i64,
    paper_checkpoint_target: i32,
}

impl ValidationService {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        engine: HistoricalEngine,
        clock: Arc<dyn Clock>,
        paper_window_days: i64,
        paper_checkpoint_target: i32,
    ) -> Self {
        Self {
            gateway,
            engine,
            clock,
            paper_window_days,
            paper_checkpoint_target,
        }
    }

    /// Run a historical validation for a user and persist every artifact:
    /// the HistoricalRun row, the updated ValidationState, and a journal
    /// entry titled "Historical Passed" / "Historical Failed".
    pub async fn run_historical(
        &self,
        user_id: Uuid,
        req: &HistoricalRequest,
    ) -> Result<AggregateOutcome, HistvalError> {
        // Seed resolution: explicit seed wins; otherwise a stable hash of
        // the request keeps unkeyed runs reproducible.
        let seed = req.seed.unwrap_or_else(|| derive_seed(req));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let outcome = self.engine.run(req, &mut rng)?;
        let now = self.clock.now();

        let parameters = serde_json::to_value(req)
            .map_err(|e| HistvalError::InvalidRequest(format!("unserializable request: {e}")))?;

        self.gateway
            .insert_historical_run(&HistoricalRun {
                id: Uuid::new_v4(),
                user_id,
                symbol: req.symbol.clone(),
                window_days: req.window_days,
                instrument_type: req.instrument_type,
                parameters: parameters.clone(),
                return_pct: outcome.median_return_pct,
                max_drawdown: outcome.median.max_drawdown,
                win_rate: outcome.median.win_rate,
                trades_count: outcome.median.trades_count,
                passed: outcome.passed,
                created_at: now,
            })
            .await?;

        let mut state = match self.gateway.validation_state(user_id).await? {
            Some(st) => st,
            None => ValidationState::new(
                user_id,
                now,
                self.paper_window_days,
                self.paper_checkpoint_target,
            ),
        };
        state.historical_last_run_at = Some(now);
        state.historical_last_result = Some(HistoricalResult {
            passed: outcome.passed,
            return_pct: outcome.median_return_pct,
        });
        state.recompute_ready();
        self.gateway.upsert_validation_state(&state).await?;

        let title = if outcome.passed {
            JOURNAL_HISTORICAL_PASSED
        } else {
            JOURNAL_HISTORICAL_FAILED
        };
        self.gateway
            .append_journal(&ValidationJournalEntry {
                id: Uuid::new_v4(),
                user_id,
                created_at: now,
                title: title.to_string(),
                summary: format!(
                    "{} over {} days: median {:.1}% (goal {:.1}%), best {:.1}%, worst {:.1}%",
                    req.symbol,
                    req.window_days,
                    outcome.median_return_pct,
                    req.goal_return_pct,
                    outcome.best_return_pct,
                    outcome.worst_return_pct,
                ),
                details: serde_json::json!({
                    "request": parameters,
                    "seed": seed,
                    "outcome": outcome,
                }),
            })
            .await?;

        info!(
            %user_id,
            symbol = %req.symbol,
            passed = outcome.passed,
            median_return_pct = outcome.median_return_pct,
            "historical validation persisted"
        );
        Ok(outcome)
    }
}

fn derive_seed(req: &HistoricalRequest) -> u64 {
    let value = serde_json::to_value(req).unwrap_or_default();
    let hash = snapshot_hash(&value);
    u64::from_str_radix(&hash[..16], 16).unwrap_or(0)
}
