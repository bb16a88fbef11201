//! Pure training-loop step logic.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;

use crate::runner::RunOutcome;

#[derive(Clone, Copy, Debug)]
pub struct TrainerConfig {
    /// Consecutive passes required on one snapshot to accept it.
    pub target_streak: u32,
    /// Total evaluation budget.
    pub max_attempts: u32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            target_streak: 3,
            max_attempts: 20,
        }
    }
}

/// Loop state between evaluations.
#[derive(Clone, Debug)]
pub struct TrainerState {
    /// Snapshot currently under evaluation.
    pub current: Value,
    /// Consecutive passes on `current`.
    pub streak: u32,
    /// Evaluations spent so far.
    pub attempts: u32,
    /// Perturbation magnitude; shrinks while passing, widens on failure.
    pub step_scale: f64,
}

impl TrainerState {
    pub fn new(initial: Value) -> Self {
        Self {
            current: initial,
            streak: 0,
            attempts: 0,
            step_scale: 0.10,
        }
    }
}

/// Decision after applying one evaluation result.
#[derive(Clone, Debug, PartialEq)]
pub enum TrainStep {
    /// Keep evaluating (possibly with a freshly perturbed snapshot).
    Continue,
    /// Snapshot accepted: promote it to the active strategy config.
    Accepted { snapshot: Value },
    /// Budget spent without acceptance.
    Exhausted,
}

/// Fold one run outcome into the state.
///
/// A pass extends the streak and narrows the proposal distribution; a
/// failure resets the streak, widens the distribution, and replaces the
/// snapshot with a perturbed one — so a streak can only ever accumulate
/// on an unchanged snapshot.
pub fn step(
    state: &mut TrainerState,
    outcome: &RunOutcome,
    cfg: &TrainerConfig,
    rng: &mut ChaCha8Rng,
) -> TrainStep {
    state.attempts += 1;

    if outcome.passed {
        state.streak += 1;
        state.step_scale = (state.step_scale * 0.8).max(0.01);
        if state.streak >= cfg.target_streak {
            return TrainStep::Accepted {
                snapshot: state.current.clone(),
            };
        }
    } else {
        state.streak = 0;
        state.step_scale = (state.step_scale * 1.5).min(0.50);
        state.current = perturb_params(&state.current, state.step_scale, rng);
    }

    if state.attempts >= cfg.max_attempts {
        return TrainStep::Exhausted;
    }
    TrainStep::Continue
}

/// Jitter every numeric field of a parameter object by ±`scale`
/// (relative). Non-numeric fields pass through untouched.
pub fn perturb_params(params: &Value, scale: f64, rng: &mut ChaCha8Rng) -> Value {
    match params {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), perturb_params(v, scale, rng));
            }
            Value::Object(out)
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                let jitter = 1.0 + scale * rng.gen_range(-1.0..1.0);
                let new = f * jitter;
                serde_json::Number::from_f64(new)
                    .map(Value::Number)
                    .unwrap_or_else(|| params.clone())
            } else {
                params.clone()
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(11)
    }

    fn pass() -> RunOutcome {
        RunOutcome {
            passed: true,
            return_pct: 12.0,
        }
    }

    fn fail() -> RunOutcome {
        RunOutcome {
            passed: false,
            return_pct: -3.0,
        }
    }

    fn params() -> Value {
        serde_json::json!({"option_dte": 30.0, "option_moneyness": 0.95})
    }

    #[test]
    fn streak_of_target_accepts_current_snapshot() {
        let cfg = TrainerConfig {
            target_streak: 3,
            max_attempts: 10,
        };
        let mut st = TrainerState::new(params());
        let mut r = rng();

        assert_eq!(step(&mut st, &pass(), &cfg, &mut r), TrainStep::Continue);
        assert_eq!(step(&mut st, &pass(), &cfg, &mut r), TrainStep::Continue);
        let snapshot_before = st.current.clone();
        match step(&mut st, &pass(), &cfg, &mut r) {
            TrainStep::Accepted { snapshot } => assert_eq!(snapshot, snapshot_before),
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn failure_resets_streak_and_perturbs() {
        let cfg = TrainerConfig {
            target_streak: 3,
            max_attempts: 10,
        };
        let mut st = TrainerState::new(params());
        let mut r = rng();

        step(&mut st, &pass(), &cfg, &mut r);
        step(&mut st, &pass(), &cfg, &mut r);
        assert_eq!(st.streak, 2);

        let before = st.current.clone();
        assert_eq!(step(&mut st, &fail(), &cfg, &mut r), TrainStep::Continue);
        assert_eq!(st.streak, 0);
        assert_ne!(st.current, before, "failure must move the snapshot");
    }

    #[test]
    fn budget_exhaustion_terminates() {
        let cfg = TrainerConfig {
            target_streak: 5,
            max_attempts: 3,
        };
        let mut st = TrainerState::new(params());
        let mut r = rng();

        assert_eq!(step(&mut st, &fail(), &cfg, &mut r), TrainStep::Continue);
        assert_eq!(step(&mut st, &fail(), &cfg, &mut r), TrainStep::Continue);
        assert_eq!(step(&mut st, &fail(), &cfg, &mut r), TrainStep::Exhausted);
        assert_eq!(st.attempts, 3);
    }

    #[test]
    fn acceptance_on_final_attempt_wins_over_exhaustion() {
        let cfg = TrainerConfig {
            target_streak: 1,
            max_attempts: 1,
        };
        let mut st = TrainerState::new(params());
        let mut r = rng();
        assert!(matches!(
            step(&mut st, &pass(), &cfg, &mut r),
            TrainStep::Accepted { .. }
        ));
    }

    #[test]
    fn step_scale_adapts_to_outcomes() {
        let cfg = TrainerConfig::default();
        let mut st = TrainerState::new(params());
        let mut r = rng();
        let initial = st.step_scale;

        step(&mut st, &pass(), &cfg, &mut r);
        assert!(st.step_scale < initial);

        let after_pass = st.step_scale;
        step(&mut st, &fail(), &cfg, &mut r);
        assert!(st.step_scale > after_pass);
    }

    #[test]
    fn perturb_touches_only_numbers() {
        let mut r = rng();
        let input = serde_json::json!({
            "dte": 30.0,
            "name": "wheel",
            "nested": {"moneyness": 1.0}
        });
        let out = perturb_params(&input, 0.1, &mut r);
        assert_eq!(out["name"], "wheel");
        assert_ne!(out["dte"], input["dte"]);
        assert_ne!(out["nested"]["moneyness"], input["nested"]["moneyness"]);
    }

    #[test]
    fn perturbation_is_seed_deterministic() {
        let input = params();
        let a = perturb_params(&input, 0.1, &mut ChaCha8Rng::seed_from_u64(5));
        let b = perturb_params(&input, 0.1, &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(a, b);
    }
}
