//! The opaque predict capability
//!
//! A `Predictor` is whatever turns a preprocessed payload into raw model
//! output; tensor shapes and runtime semantics live behind this trait. The
//! synthetic implementation stands in for a real ML runtime: it produces a
//! deterministic prediction vector seeded from the model weights and the
//! input, which is enough to exercise every control-plane path.

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use infermesh_core::protocol::ModelMetadata;
use infermesh_core::Result;

/// Number of scores the synthetic runtime emits per inference
const SYNTHETIC_OUTPUT_SIZE: usize = 1000;

/// Executes inference for one loaded model
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Run the model against a preprocessed payload
    ///
    /// The payload is passed by value downstream of a copy, so abandoned
    /// work after a timeout cannot corrupt worker state.
    async fn predict(&self, input: &Value) -> Result<Value>;
}

/// Builds a predictor from a fetched model blob
pub trait PredictorFactory: Send + Sync {
    fn build(&self, metadata: &ModelMetadata, bytes: &[u8]) -> Result<Arc<dyn Predictor>>;
}

/// Stand-in runtime producing deterministic scores
pub struct SyntheticPredictor {
    /// Seed material derived from the model blob
    weight_digest: [u8; 32],
    /// Simulated compute time per call
    latency_ms: u64,
}

impl SyntheticPredictor {
    pub fn new(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            weight_digest: hasher.finalize().into(),
            latency_ms: 0,
        }
    }

    /// Simulate `latency_ms` of compute per predict call
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    fn seed_for(&self, input: &Value) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.weight_digest);
        hasher.update(input.to_string().as_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl Predictor for SyntheticPredictor {
    async fn predict(&self, input: &Value) -> Result<Value> {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }

        let mut rng = StdRng::from_seed(self.seed_for(input));
        let predictions: Vec<f64> = (0..SYNTHETIC_OUTPUT_SIZE)
            .map(|_| rng.gen_range(0.0..1.0))
            .collect();
        let confidence: f64 = rng.gen_range(0.5..1.0);

        Ok(json!({
            "predictions": predictions,
            "confidence": confidence,
        }))
    }
}

/// Factory for the synthetic runtime
#[derive(Default)]
pub struct SyntheticPredictorFactory {
    latency_ms: u64,
}

impl SyntheticPredictorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency_ms: u64) -> Self {
        Self { latency_ms }
    }
}

impl PredictorFactory for SyntheticPredictorFactory {
    fn build(&self, _metadata: &ModelMetadata, bytes: &[u8]) -> Result<Arc<dyn Predictor>> {
        Ok(Arc::new(
            SyntheticPredictor::new(bytes).with_latency(self.latency_ms),
        ))
    }
}
