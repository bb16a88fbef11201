//! Persistence and journaling around the checkpoint machine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use otx_config::Clock;
use otx_db::{DbError, Gateway};
use otx_schemas::{ValidationJournalEntry, ValidationState};

use crate::machine::{
    apply_checkpoint, manual_reset, CheckpointEffect, CheckpointOutcome, FailFastThresholds,
};

pub const JOURNAL_CHECKPOINT_PASSED: &str = "Checkpoint Passed";
pub const JOURNAL_CHECKPOINT_FAILED: &str = "Checkpoint Failed";
pub const JOURNAL_WINDOW_RESET: &str = "Window Reset Triggered";
pub const JOURNAL_READY_FOR_LIVE: &str = "Ready For Live";
pub const JOURNAL_MANUAL_RESET: &str = "Paper Window Restarted";

/// Wire form of a paper checkpoint: measured forward-test numbers. When
/// `passed` is omitted, a non-negative return counts as a pass.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PaperCheckpointRequest {
    pub return_pct: f64,
    #[serde(default)]
    pub drawdown_pct: f64,
    #[serde(default)]
    pub loss_pct: f64,
    #[serde(default)]
    pub passed: Option<bool>,
}

impl PaperCheckpointRequest {
    pub fn outcome(&self) -> CheckpointOutcome {
        CheckpointOutcome {
            passed: self.passed.unwrap_or(self.return_pct >= 0.0),
            drawdown_pct: self.drawdown_pct,
            loss_pct: self.loss_pct,
        }
    }
}

pub struct GoLiveService {
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    thresholds: FailFastThresholds,
    paper_window_days: i64,
    paper_checkpoint_target: i32,
}

impl GoLiveService {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        clock: Arc<dyn Clock>,
        thresholds: FailFastThresholds,
        paper_window_days: i64,
        paper_checkpoint_target: i32,
    ) -> Self {
        Self {
            gateway,
            clock,
            thresholds,
            paper_window_days,
            paper_checkpoint_target,
        }
    }

    async fn load_or_init(&self, user_id: Uuid) -> Result<ValidationState, DbError> {
        match self.gateway.validation_state(user_id).await? {
            Some(st) => Ok(st),
            None => Ok(ValidationState::new(
                user_id,
                self.clock.now(),
                self.paper_window_days,
                self.paper_checkpoint_target,
            )),
        }
    }

    /// Record one paper checkpoint: apply the transition, persist, journal.
    pub async fn record_checkpoint(
        &self,
        user_id: Uuid,
        request: &PaperCheckpointRequest,
    ) -> Result<(ValidationState, CheckpointEffect), DbError> {
        let now = self.clock.now();
        let mut state = self.load_or_init(user_id).await?;
        let outcome = request.outcome();
        let effect = apply_checkpoint(
            &mut state,
            &outcome,
            &self.thresholds,
            now,
            self.paper_window_days,
        );
        self.gateway.upsert_validation_state(&state).await?;

        let (title, summary) = match &effect {
            CheckpointEffect::Pass { streak, .. } => (
                JOURNAL_CHECKPOINT_PASSED,
                format!(
                    "paper checkpoint passed; streak {}/{}",
                    streak, state.paper_checkpoint_target
                ),
            ),
            CheckpointEffect::StreakReset => (
                JOURNAL_CHECKPOINT_FAILED,
                "paper checkpoint failed; streak reset".to_string(),
            ),
            CheckpointEffect::FailFastReset { reason } => {
                (JOURNAL_WINDOW_RESET, reason.clone())
            }
        };
        self.append(user_id, title, summary, &request).await?;

        if let CheckpointEffect::Pass {
            became_ready: true, ..
        } = effect
        {
            self.append(
                user_id,
                JOURNAL_READY_FOR_LIVE,
                format!(
                    "{} consecutive paper passes with a passing historical run",
                    state.paper_consecutive_passes
                ),
                &request,
            )
            .await?;
        }

        info!(
            %user_id,
            passes = state.paper_consecutive_passes,
            ready = state.overall_ready,
            fail_fast = state.paper_fail_fast_triggered,
            "paper checkpoint recorded"
        );
        Ok((state, effect))
    }

    /// Operator reset: back to a fresh warmup window from any state.
    pub async fn reset(&self, user_id: Uuid) -> Result<ValidationState, DbError> {
        let now = self.clock.now();
        let mut state = self.load_or_init(user_id).await?;
        manual_reset(&mut state, now, self.paper_window_days);
        self.gateway.upsert_validation_state(&state).await?;
        self.append(
            user_id,
            JOURNAL_MANUAL_RESET,
            "paper window restarted by operator".to_string(),
            &serde_json::json!({}),
        )
        .await?;
        Ok(state)
    }

    async fn append<T: Serialize>(
        &self,
        user_id: Uuid,
        title: &str,
        summary: String,
        details: &T,
    ) -> Result<(), DbError> {
        self.gateway
            .append_journal(&ValidationJournalEntry {
                id: Uuid::new_v4(),
                user_id,
                created_at: self.clock.now(),
                title: title.to_string(),
                summary,
                details: serde_json::to_value(details).unwrap_or(serde_json::Value::Null),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use otx_config::ManualClock;
    use otx_db::MemGateway;
    use otx_schemas::HistoricalResult;

    fn service(gw: &MemGateway) -> GoLiveService {
        GoLiveService::new(
            Arc::new(gw.clone()),
            Arc::new(ManualClock::new(
                chrono::Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap(),
            )),
            FailFastThresholds {
                max_drawdown_pct: 10.0,
                max_loss_pct: 5.0,
            },
            14,
            3,
        )
    }

    fn passing() -> PaperCheckpointRequest {
        PaperCheckpointRequest {
            return_pct: 1.5,
            drawdown_pct: 1.0,
            loss_pct: 0.0,
            passed: None,
        }
    }

    #[tokio::test]
    async fn fail_fast_scenario_matches_contract() {
        let gw = MemGateway::new();
        let svc = service(&gw);
        let user = Uuid::new_v4();

        // Build up: passes to streak 2 of target 3.
        svc.record_checkpoint(user, &passing()).await.unwrap();
        svc.record_checkpoint(user, &passing()).await.unwrap();
        let st = gw.validation_state(user).await.unwrap().unwrap();
        assert_eq!(st.paper_consecutive_passes, 2);

        // Breach the drawdown threshold.
        let breach = PaperCheckpointRequest {
            return_pct: -4.0,
            drawdown_pct: 12.5,
            loss_pct: 4.0,
            passed: None,
        };
        let (state, effect) = svc.record_checkpoint(user, &breach).await.unwrap();
        assert!(matches!(effect, CheckpointEffect::FailFastReset { .. }));
        assert_eq!(state.paper_consecutive_passes, 0);
        assert!(state.paper_fail_fast_triggered);
        assert!(!state.paper_fail_fast_reason.as_deref().unwrap().is_empty());
        assert!(!state.overall_ready);

        assert!(gw
            .journal_titles()
            .contains(&"Window Reset Triggered".to_string()));
    }

    #[tokio::test]
    async fn full_streak_with_historical_becomes_ready() {
        let gw = MemGateway::new();
        let svc = service(&gw);
        let user = Uuid::new_v4();

        // Seed a passing historical result.
        let mut st = ValidationState::new(
            user,
            chrono::Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap(),
            14,
            3,
        );
        st.historical_last_result = Some(HistoricalResult {
            passed: true,
            return_pct: 12.4,
        });
        gw.upsert_validation_state(&st).await.unwrap();

        for _ in 0..3 {
            svc.record_checkpoint(user, &passing()).await.unwrap();
        }
        let state = gw.validation_state(user).await.unwrap().unwrap();
        assert!(state.overall_ready);
        assert!(gw.journal_titles().contains(&"Ready For Live".to_string()));
    }

    #[tokio::test]
    async fn ordinary_failure_journals_without_reset() {
        let gw = MemGateway::new();
        let svc = service(&gw);
        let user = Uuid::new_v4();

        svc.record_checkpoint(user, &passing()).await.unwrap();
        let soft_fail = PaperCheckpointRequest {
            return_pct: -0.5,
            drawdown_pct: 2.0,
            loss_pct: 0.5,
            passed: None,
        };
        let (state, effect) = svc.record_checkpoint(user, &soft_fail).await.unwrap();
        assert_eq!(effect, CheckpointEffect::StreakReset);
        assert!(!state.paper_fail_fast_triggered);
        assert!(gw
            .journal_titles()
            .contains(&"Checkpoint Failed".to_string()));
    }

    #[tokio::test]
    async fn manual_reset_unlatches() {
        let gw = MemGateway::new();
        let svc = service(&gw);
        let user = Uuid::new_v4();

        let breach = PaperCheckpointRequest {
            return_pct: -9.0,
            drawdown_pct: 20.0,
            loss_pct: 9.0,
            passed: None,
        };
        svc.record_checkpoint(user, &breach).await.unwrap();
        assert!(gw
            .validation_state(user)
            .await
            .unwrap()
            .unwrap()
            .paper_fail_fast_triggered);

        let state = svc.reset(user).await.unwrap();
        assert!(!state.paper_fail_fast_triggered);
        assert!(gw
            .journal_titles()
            .contains(&"Paper Window Restarted".to_string()));
    }
}
