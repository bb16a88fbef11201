//! Self-learning training loop and autotune.
//!
//! The loop repeatedly evaluates a parameter snapshot through the
//! historical engine, counting a streak of consecutive passes against the
//! *same* snapshot. Failures reset the streak and perturb the snapshot;
//! an accepted snapshot becomes the active strategy config. The step
//! function is pure ([`machine::step`]); the loop is just a driver.

pub mod handler;
pub mod machine;
pub mod runner;
pub mod service;

pub use handler::{
    AutotuneJobHandler, LearningIngestHandler, TrainJobHandler, TrainJobPayload,
    JOB_LEARNING_INGEST, JOB_STRATEGY_AUTOTUNE, JOB_STRATEGY_TRAIN,
};
pub use machine::{perturb_params, step, TrainStep, TrainerConfig, TrainerState};
pub use runner::{
    default_train_request, HistvalTrainRunner, RunOutcome, TrainError, TrainRunner,
};
pub use service::TrainingService;
