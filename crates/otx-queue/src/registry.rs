//! Handler registry: maps job names to their implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use otx_schemas::JobRun;

use crate::error::JobError;

/// One unit of background work. Implementations MUST be idempotent: the
/// queue is at-least-once and a crashed worker's lease is reclaimed.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job name this handler consumes.
    fn name(&self) -> &'static str;

    /// Per-attempt deadline in seconds. The worker cancels cooperatively
    /// at the deadline and classifies the attempt retryable.
    fn deadline_secs(&self) -> u64 {
        300
    }

    /// Execute one attempt. The returned value is stored as the run result.
    async fn run(&self, job: &JobRun) -> Result<Value, JobError>;
}

/// Immutable name → handler map, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.name(), handler);
        self
    }

    pub fn get(&self, job_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
