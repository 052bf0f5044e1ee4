//! Inference worker service
//!
//! A worker owns a hard concurrency gate, a cache of preloaded models, and
//! the validate/preprocess/execute/postprocess pipeline. Models are fetched
//! from the model manager on first load and served until explicitly
//! unloaded.

pub mod api;
pub mod capacity;
pub mod cache;
pub mod history;
pub mod pipeline;
pub mod predictor;
pub mod worker;

pub use capacity::{CapacityGate, CapacityPermit};
pub use cache::{LoadedModel, ModelCache};
pub use history::{HistoryStats, InferenceHistory, InferenceRecord};
pub use pipeline::InferencePipeline;
pub use predictor::{Predictor, PredictorFactory, SyntheticPredictor, SyntheticPredictorFactory};
pub use worker::InferenceWorker;
