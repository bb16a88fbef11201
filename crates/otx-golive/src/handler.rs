//! Queue handler for paper checkpoint jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use otx_queue::{JobError, JobHandler};
use otx_schemas::JobRun;

use crate::service::{GoLiveService, PaperCheckpointRequest};

pub const JOB_VALIDATION_PAPER: &str = "validation.paper";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaperJobPayload {
    pub user_id: Uuid,
    pub checkpoint: PaperCheckpointRequest,
}

pub struct PaperJobHandler {
    service: Arc<GoLiveService>,
}

impl PaperJobHandler {
    pub fn new(service: Arc<GoLiveService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for PaperJobHandler {
    fn name(&self) -> &'static str {
        JOB_VALIDATION_PAPER
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: PaperJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed paper payload: {e}")))?;

        let (state, effect) = self
            .service
            .record_checkpoint(payload.user_id, &payload.checkpoint)
            .await
            .map_err(JobError::from)?;

        // A fail-fast reset is a deterministic state transition, not a job
        // failure: it completes with passed=false in the result.
        Ok(serde_json::json!({
            "passed": matches!(effect, crate::machine::CheckpointEffect::Pass { .. }),
            "fail_fast": state.paper_fail_fast_triggered,
            "streak": state.paper_consecutive_passes,
            "overall_ready": state.overall_ready,
        }))
    }
}
