//! The inference pipeline: validate, preprocess, execute, postprocess
//!
//! One request flows through the four stages in order. Execution races the
//! predictor against a deadline; the deadline winning cancels the predict
//! future (it holds a copy of the payload, so nothing shared is left
//! half-written) and surfaces `InferenceTimeout`.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use infermesh_core::protocol::{InferenceOptions, InferenceOutput, OutputMetadata};
use infermesh_core::{Error, Result};

use crate::cache::LoadedModel;

/// Stage driver for a single worker
pub struct InferencePipeline {
    default_timeout: Duration,
}

impl InferencePipeline {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Run all four stages for one request
    pub async fn run(
        &self,
        model: &LoadedModel,
        input: &Value,
        options: &InferenceOptions,
    ) -> Result<InferenceOutput> {
        Self::validate(model, input)?;
        let processed = Self::preprocess(model, input);
        let raw = self.execute(model, processed, options).await?;
        Ok(Self::postprocess(model, raw))
    }

    /// Reject null and empty inputs before any work happens
    fn validate(_model: &LoadedModel, input: &Value) -> Result<()> {
        let empty = match input {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        };
        if empty {
            return Err(Error::BadRequest(
                "inputData must not be null or empty".into(),
            ));
        }
        Ok(())
    }

    /// Wrap the payload with shape and timing metadata
    ///
    /// Shape conformance is a runtime concern; the advertised shape is only
    /// recorded so downstream consumers can compare.
    fn preprocess(model: &LoadedModel, input: &Value) -> Value {
        let original_shape = match input {
            Value::Array(a) => json!([a.len()]),
            Value::Object(o) => json!({ "fields": o.len() }),
            Value::String(s) => json!([s.len()]),
            _ => Value::Null,
        };
        let mut metadata = json!({
            "originalShape": original_shape,
            "processedAt": Utc::now(),
        });
        if let Some(shape) = &model.input_shape {
            metadata["expectedShape"] = json!(shape);
        }
        json!({
            "data": input,
            "metadata": metadata,
        })
    }

    /// Race predict against the request deadline
    async fn execute(
        &self,
        model: &LoadedModel,
        processed: Value,
        options: &InferenceOptions,
    ) -> Result<Value> {
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        match tokio::time::timeout(timeout, model.predict(&processed)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(Error::ExecutionError(e.to_string())),
            Err(_) => Err(Error::InferenceTimeout(format!(
                "model {} exceeded {}ms",
                model.id,
                timeout.as_millis()
            ))),
        }
    }

    /// Normalize raw model output into the response shape
    fn postprocess(model: &LoadedModel, raw: Value) -> InferenceOutput {
        let (predictions, confidence) = match &raw {
            Value::Object(fields) => {
                let predictions = fields.get("predictions").cloned().unwrap_or(raw.clone());
                let confidence = fields
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5);
                (predictions, confidence)
            }
            _ => (raw, 0.5),
        };

        InferenceOutput {
            predictions,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: OutputMetadata {
                model_version: model.version.clone(),
                processed_at: Utc::now(),
            },
        }
    }
}
