//! The training/autotune driver around the pure step function.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use otx_config::{snapshot_hash, Clock};
use otx_db::Gateway;
use otx_schemas::ValidationJournalEntry;

use otx_histval::HistoricalRequest;

use crate::machine::{perturb_params, step, TrainStep, TrainerConfig, TrainerState};
use crate::runner::{TrainError, TrainRunner};

pub const JOURNAL_PARAMS_ACCEPTED: &str = "Parameters Accepted";
pub const JOURNAL_PARAMS_REJECTED: &str = "Parameters Rejected";
pub const JOURNAL_TRAINING_EXHAUSTED: &str = "Training Exhausted";

/// Default snapshot used when a user has no active strategy config yet.
fn default_params() -> Value {
    serde_json::json!({
        "option_dte": 30.0,
        "option_moneyness": 0.97,
        "segment_tolerance_pct": 10.0,
    })
}

pub struct TrainingService {
    gateway: Arc<dyn Gateway>,
    runner: Arc<dyn TrainRunner>,
    clock: Arc<dyn Clock>,
}

/// Result of a training loop or autotune pass.
#[derive(Clone, Debug, PartialEq)]
pub enum TrainingResult {
    Accepted { snapshot: Value, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl TrainingService {
    pub fn new(gateway: Arc<dyn Gateway>, runner: Arc<dyn TrainRunner>, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            runner,
            clock,
        }
    }

    async fn initial_params(&self, user_id: Uuid) -> Result<Value, TrainError> {
        Ok(self
            .gateway
            .active_strategy_config(user_id)
            .await?
            .unwrap_or_else(default_params))
    }

    /// Run the full training loop until acceptance or budget exhaustion.
    pub async fn train(
        &self,
        user_id: Uuid,
        base: &HistoricalRequest,
        cfg: TrainerConfig,
        seed: Option<u64>,
    ) -> Result<TrainingResult, TrainError> {
        let initial = self.initial_params(user_id).await?;
        let seed = seed.unwrap_or_else(|| derive_seed(&initial, user_id));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut state = TrainerState::new(initial);

        loop {
            let outcome = self.runner.evaluate(user_id, base, &state.current).await?;
            let params_before = state.current.clone();
            let decision = step(&mut state, &outcome, &cfg, &mut rng);

            if !outcome.passed {
                self.journal(
                    user_id,
                    JOURNAL_PARAMS_REJECTED,
                    format!(
                        "snapshot rejected at attempt {} (return {:.1}%)",
                        state.attempts, outcome.return_pct
                    ),
                    serde_json::json!({"params": params_before, "return_pct": outcome.return_pct}),
                )
                .await?;
            }

            match decision {
                TrainStep::Continue => continue,
                TrainStep::Accepted { snapshot } => {
                    self.gateway
                        .set_active_strategy_config(user_id, &snapshot)
                        .await?;
                    self.journal(
                        user_id,
                        JOURNAL_PARAMS_ACCEPTED,
                        format!(
                            "snapshot accepted after {} attempts (streak {})",
                            state.attempts, cfg.target_streak
                        ),
                        serde_json::json!({"params": snapshot}),
                    )
                    .await?;
                    info!(%user_id, attempts = state.attempts, "training accepted snapshot");
                    return Ok(TrainingResult::Accepted {
                        snapshot,
                        attempts: state.attempts,
                    });
                }
                TrainStep::Exhausted => {
                    self.journal(
                        user_id,
                        JOURNAL_TRAINING_EXHAUSTED,
                        format!("no snapshot accepted within {} attempts", cfg.max_attempts),
                        serde_json::json!({"last_params": state.current}),
                    )
                    .await?;
                    info!(%user_id, attempts = state.attempts, "training budget exhausted");
                    return Ok(TrainingResult::Exhausted {
                        attempts: state.attempts,
                    });
                }
            }
        }
    }

    /// One-shot autotune: propose a single perturbation of the active
    /// snapshot, evaluate it once, accept on pass.
    pub async fn autotune(
        &self,
        user_id: Uuid,
        base: &HistoricalRequest,
        seed: Option<u64>,
    ) -> Result<TrainingResult, TrainError> {
        let current = self.initial_params(user_id).await?;
        let seed = seed.unwrap_or_else(|| derive_seed(&current, user_id));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let proposal = perturb_params(&current, 0.05, &mut rng);
        let outcome = self.runner.evaluate(user_id, base, &proposal).await?;

        if outcome.passed {
            self.gateway
                .set_active_strategy_config(user_id, &proposal)
                .await?;
            self.journal(
                user_id,
                JOURNAL_PARAMS_ACCEPTED,
                format!("autotune accepted proposal (return {:.1}%)", outcome.return_pct),
                serde_json::json!({"params": proposal}),
            )
            .await?;
            Ok(TrainingResult::Accepted {
                snapshot: self
                    .gateway
                    .active_strategy_config(user_id)
                    .await?
                    .unwrap_or_default(),
                attempts: 1,
            })
        } else {
            self.journal(
                user_id,
                JOURNAL_PARAMS_REJECTED,
                format!("autotune rejected proposal (return {:.1}%)", outcome.return_pct),
                serde_json::json!({"params": proposal, "return_pct": outcome.return_pct}),
            )
            .await?;
            Ok(TrainingResult::Exhausted { attempts: 1 })
        }
    }

    async fn journal(
        &self,
        user_id: Uuid,
        title: &str,
        summary: String,
        details: Value,
    ) -> Result<(), TrainError> {
        self.gateway
            .append_journal(&ValidationJournalEntry {
                id: Uuid::new_v4(),
                user_id,
                created_at: self.clock.now(),
                title: title.to_string(),
                summary,
                details,
            })
            .await?;
        Ok(())
    }
}

fn derive_seed(params: &Value, user_id: Uuid) -> u64 {
    let hash = snapshot_hash(&serde_json::json!({"params": params, "user": user_id}));
    u64::from_str_radix(&hash[..16], 16).unwrap_or(0)
}
