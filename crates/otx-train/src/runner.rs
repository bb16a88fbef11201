//! Evaluation seam between the loop and the historical engine.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use otx_db::DbError;
use otx_histval::{HistoricalRequest, HistvalError, ValidationService};
use otx_schemas::InstrumentType;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunOutcome {
    pub passed: bool,
    pub return_pct: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error(transparent)]
    Histval(#[from] HistvalError),
    #[error("invalid parameter snapshot: {0}")]
    BadSnapshot(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Evaluates one parameter snapshot against a base request.
#[async_trait]
pub trait TrainRunner: Send + Sync {
    async fn evaluate(
        &self,
        user_id: Uuid,
        base: &HistoricalRequest,
        params: &Value,
    ) -> Result<RunOutcome, TrainError>;
}

/// Default evaluation target when a training job carries no explicit
/// request (e.g. the weekly autotune cron).
pub fn default_train_request() -> HistoricalRequest {
    HistoricalRequest {
        symbol: "SPY".to_string(),
        window_days: 90,
        instrument_type: InstrumentType::Option,
        option_right: Some(otx_histval::OptionRight::Call),
        option_dte: Some(30),
        option_moneyness: Some(1.0),
        use_rolling_contracts: true,
        strict_option_mode: false,
        segment_tolerance_pct: 10.0,
        concurrent_runs: 3,
        goal_return_pct: 5.0,
        seed: None,
    }
}

/// Production runner: overlays the snapshot's numeric knobs onto the base
/// request and runs the full validation (persisting runs and journal
/// entries as any historical run would).
pub struct HistvalTrainRunner {
    service: std::sync::Arc<ValidationService>,
}

impl HistvalTrainRunner {
    pub fn new(service: std::sync::Arc<ValidationService>) -> Self {
        Self { service }
    }

    fn request_for(
        &self,
        base: &HistoricalRequest,
        params: &Value,
    ) -> Result<HistoricalRequest, TrainError> {
        let mut req = base.clone();
        if let Some(dte) = params.get("option_dte").and_then(Value::as_f64) {
            req.option_dte = Some(dte.round().max(1.0) as i64);
        }
        if let Some(m) = params.get("option_moneyness").and_then(Value::as_f64) {
            if m <= 0.0 {
                return Err(TrainError::BadSnapshot(format!("moneyness {m} <= 0")));
            }
            req.option_moneyness = Some(m);
        }
        if let Some(tol) = params.get("segment_tolerance_pct").and_then(Value::as_f64) {
            req.segment_tolerance_pct = tol.max(0.0);
        }
        Ok(req)
    }
}

#[async_trait]
impl TrainRunner for HistvalTrainRunner {
    async fn evaluate(
        &self,
        user_id: Uuid,
        base: &HistoricalRequest,
        params: &Value,
    ) -> Result<RunOutcome, TrainError> {
        let req = self.request_for(base, params)?;
        let outcome = self.service.run_historical(user_id, &req).await?;
        Ok(RunOutcome {
            passed: outcome.passed,
            return_pct: outcome.median_return_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> HistvalTrainRunner {
        use chrono::TimeZone;
        HistvalTrainRunner::new(std::sync::Arc::new(ValidationService::new(
            std::sync::Arc::new(otx_db::MemGateway::new()),
            otx_histval::HistoricalEngine::new(std::sync::Arc::new(otx_histval::SyntheticHistory)),
            std::sync::Arc::new(otx_config::ManualClock::new(
                chrono::Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap(),
            )),
            14,
            3,
        )))
    }

    #[test]
    fn snapshot_overlays_numeric_knobs() {
        let req = runner()
            .request_for(
                &default_train_request(),
                &serde_json::json!({
                    "option_dte": 21.4,
                    "option_moneyness": 0.97,
                    "segment_tolerance_pct": 12.0
                }),
            )
            .unwrap();
        assert_eq!(req.option_dte, Some(21));
        assert_eq!(req.option_moneyness, Some(0.97));
        assert_eq!(req.segment_tolerance_pct, 12.0);
        // Untouched fields come from the base.
        assert_eq!(req.window_days, 90);
    }

    #[test]
    fn non_positive_moneyness_rejected() {
        assert!(runner()
            .request_for(
                &default_train_request(),
                &serde_json::json!({"option_moneyness": -0.5})
            )
            .is_err());
    }
}
