//! Wires every job handler into one registry for the worker pool.

use std::sync::Arc;

use otx_audit::{BackfillHistoryHandler, WeeklyReportHandler};
use otx_golive::PaperJobHandler;
use otx_histval::{
    HistoricalEngine, HistoricalJobHandler, SyntheticHistory, ValidationService,
};
use otx_queue::HandlerRegistry;
use otx_suggest::{
    GeneratorJobHandler, HoldingsScanSource, SuggestionGenerator, UniverseSyncHandler,
};
use otx_train::{
    AutotuneJobHandler, HistvalTrainRunner, LearningIngestHandler, TrainJobHandler,
    TrainingService,
};

use crate::dispatch::CronDispatchHandler;
use crate::state::AppState;

/// Deadlines (seconds) by job family; generators are short, validation
/// and training long.
pub struct Deadlines {
    pub generator: u64,
    pub historical: u64,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            generator: 300,
            historical: 1800,
        }
    }
}

/// Build the complete handler registry backed by the given state.
pub fn build_registry(state: &AppState, deadlines: Deadlines) -> HandlerRegistry {
    let generator = Arc::new(SuggestionGenerator::new(
        state.gateway.clone(),
        state.quotes.clone(),
        Arc::new(HoldingsScanSource),
        state.clock.clone(),
        state.quality_policy,
        otx_suggest::SizingCaps::default(),
    ));

    let validation = Arc::new(ValidationService::new(
        state.gateway.clone(),
        HistoricalEngine::new(Arc::new(SyntheticHistory)),
        state.clock.clone(),
        14,
        3,
    ));

    let training = Arc::new(TrainingService::new(
        state.gateway.clone(),
        Arc::new(HistvalTrainRunner::new(validation.clone())),
        state.clock.clone(),
    ));

    let mut registry = HandlerRegistry::new()
        .register(Arc::new(GeneratorJobHandler::new(
            generator,
            state.counters.paused_flag(),
            deadlines.generator,
        )))
        .register(Arc::new(UniverseSyncHandler::new(
            state.gateway.clone(),
            state.quotes.clone(),
            state.clock.clone(),
        )))
        .register(Arc::new(HistoricalJobHandler::new(
            validation,
            deadlines.historical,
        )))
        .register(Arc::new(PaperJobHandler::new(state.golive.clone())))
        .register(Arc::new(TrainJobHandler::new(
            training.clone(),
            deadlines.historical,
        )))
        .register(Arc::new(AutotuneJobHandler::new(
            training,
            deadlines.historical,
        )))
        .register(Arc::new(LearningIngestHandler::new(
            state.gateway.clone(),
            state.clock.clone(),
        )))
        .register(Arc::new(WeeklyReportHandler::new(
            state.gateway.clone(),
            state.clock.clone(),
        )))
        .register(Arc::new(BackfillHistoryHandler::new(
            state.gateway.clone(),
            state.clock.clone(),
        )));

    for dispatcher in CronDispatchHandler::all(
        state.gateway.clone(),
        state.queue.clone(),
        state.clock.clone(),
    ) {
        registry = registry.register(Arc::new(dispatcher));
    }
    registry
}
