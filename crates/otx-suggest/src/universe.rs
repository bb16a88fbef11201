//! Universe sync: refresh held symbols' marks from the quote provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use otx_config::Clock;
use otx_db::Gateway;
use otx_quality::QuoteService;
use otx_queue::{JobError, JobHandler};
use otx_schemas::{AssetType, JobRun};

pub const JOB_UNIVERSE_SYNC: &str = "universe.sync";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UniverseSyncPayload {
    pub user_id: Uuid,
}

/// Refreshes `current_price` on equity holdings from the latest quote
/// mid (or last trade when the book is one-sided).
pub struct UniverseSyncHandler {
    gateway: Arc<dyn Gateway>,
    quotes: Arc<QuoteService>,
    clock: Arc<dyn Clock>,
}

impl UniverseSyncHandler {
    pub fn new(gateway: Arc<dyn Gateway>, quotes: Arc<QuoteService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            quotes,
            clock,
        }
    }
}

#[async_trait]
impl JobHandler for UniverseSyncHandler {
    fn name(&self) -> &'static str {
        JOB_UNIVERSE_SYNC
    }

    async fn run(&self, job: &JobRun) -> Result<Value, JobError> {
        let payload: UniverseSyncPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Terminal(format!("malformed universe payload: {e}")))?;

        let holdings = self
            .gateway
            .holdings_for_user(payload.user_id)
            .await
            .map_err(JobError::from)?;
        let symbols: Vec<String> = holdings
            .iter()
            .filter(|h| h.asset_type == AssetType::Equity)
            .map(|h| h.symbol.clone())
            .collect();
        if symbols.is_empty() {
            return Ok(serde_json::json!({"refreshed": 0}));
        }

        let snapshot = self
            .quotes
            .snapshot(&symbols)
            .await
            .map_err(|e| JobError::ProviderTransient(e.to_string()))?;
        if snapshot.provider_open {
            return Err(JobError::ProviderTransient(
                "quote provider circuit open".into(),
            ));
        }

        let now = self.clock.now();
        let mut refreshed = 0_usize;
        for mut holding in holdings {
            if holding.asset_type != AssetType::Equity {
                continue;
            }
            let Some(quote) = snapshot.quotes.get(&holding.symbol) else {
                continue;
            };
            let mark = match (quote.bid, quote.ask, quote.last) {
                (Some(bid), Some(ask), _) if bid <= ask => (bid + ask) / 2.0,
                (_, _, Some(last)) => last,
                _ => continue,
            };
            holding.current_price = mark;
            holding.updated_at = now;
            self.gateway
                .upsert_holding(&holding)
                .await
                .map_err(JobError::from)?;
            refreshed += 1;
        }

        info!(user_id = %payload.user_id, refreshed, "universe sync complete");
        Ok(serde_json::json!({"refreshed": refreshed}))
    }
}
