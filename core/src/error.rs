//! Error taxonomy shared by all InferMesh services
//!
//! Every caller-observable failure is one of these kinds. The kinds travel
//! across service boundaries as `{kind, message}` JSON bodies and are
//! rehydrated on the client side, so an orchestrator sees the same
//! `CapacityExceeded` a worker raised.

use thiserror::Error;

/// Result type alias for InferMesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for InferMesh services
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid API key
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated but lacking the required permission
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Client exceeded its request window
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Malformed or incomplete request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Model id not present in the catalog
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Model id already registered with this version
    #[error("model already exists: {0}")]
    ModelAlreadyExists(String),

    /// Blob exceeds the configured size cap
    #[error("model too large: {0}")]
    ModelTooLarge(String),

    /// Blob bytes could not be decoded or are empty
    #[error("invalid model data: {0}")]
    InvalidModelData(String),

    /// Metadata failed validation
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Stored blob no longer matches its recorded checksum
    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    /// No registered worker serves the requested model
    #[error("no workers available: {0}")]
    NoWorkersAvailable(String),

    /// Workers exist but none satisfy the request requirements
    #[error("no workers match requirements: {0}")]
    NoWorkersMatchRequirements(String),

    /// Worker is at its concurrency ceiling
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Model is not preloaded on the worker
    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    /// Inference ran past its deadline
    #[error("inference timeout: {0}")]
    InferenceTimeout(String),

    /// The model runtime raised during predict
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// RPC transport failure (connect, send, decode)
    #[error("transport error: {0}")]
    TransportError(String),

    /// Selected worker could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable kind identifier used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Forbidden(_) => "forbidden",
            Error::RateLimited(_) => "rate_limited",
            Error::BadRequest(_) => "bad_request",
            Error::ModelNotFound(_) => "model_not_found",
            Error::ModelAlreadyExists(_) => "model_already_exists",
            Error::ModelTooLarge(_) => "model_too_large",
            Error::InvalidModelData(_) => "invalid_model_data",
            Error::InvalidMetadata(_) => "invalid_metadata",
            Error::IntegrityMismatch(_) => "integrity_mismatch",
            Error::NoWorkersAvailable(_) => "no_workers_available",
            Error::NoWorkersMatchRequirements(_) => "no_workers_match_requirements",
            Error::CapacityExceeded(_) => "capacity_exceeded",
            Error::ModelNotAvailable(_) => "model_not_available",
            Error::InferenceTimeout(_) => "inference_timeout",
            Error::ExecutionError(_) => "execution_error",
            Error::TransportError(_) => "transport_error",
            Error::Unavailable(_) => "unavailable",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// Rebuild a typed error from its wire representation
    ///
    /// Unknown kinds collapse to `TransportError` so a newer peer never
    /// panics an older client.
    pub fn from_wire(kind: &str, message: String) -> Self {
        match kind {
            "unauthenticated" => Error::Unauthenticated(message),
            "forbidden" => Error::Forbidden(message),
            "rate_limited" => Error::RateLimited(message),
            "bad_request" => Error::BadRequest(message),
            "model_not_found" => Error::ModelNotFound(message),
            "model_already_exists" => Error::ModelAlreadyExists(message),
            "model_too_large" => Error::ModelTooLarge(message),
            "invalid_model_data" => Error::InvalidModelData(message),
            "invalid_metadata" => Error::InvalidMetadata(message),
            "integrity_mismatch" => Error::IntegrityMismatch(message),
            "no_workers_available" => Error::NoWorkersAvailable(message),
            "no_workers_match_requirements" => Error::NoWorkersMatchRequirements(message),
            "capacity_exceeded" => Error::CapacityExceeded(message),
            "model_not_available" => Error::ModelNotAvailable(message),
            "inference_timeout" => Error::InferenceTimeout(message),
            "execution_error" => Error::ExecutionError(message),
            "transport_error" => Error::TransportError(message),
            "unavailable" => Error::Unavailable(message),
            other => Error::TransportError(format!("{}: {}", other, message)),
        }
    }

    /// HTTP status code this kind maps to at a service edge
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Unauthenticated(_) => 401,
            Error::Forbidden(_) => 403,
            Error::RateLimited(_) => 429,
            Error::BadRequest(_) | Error::InvalidMetadata(_) | Error::InvalidModelData(_) => 400,
            Error::ModelNotFound(_) => 404,
            Error::ModelAlreadyExists(_) => 409,
            Error::ModelTooLarge(_) => 413,
            Error::IntegrityMismatch(_) => 500,
            Error::NoWorkersAvailable(_) | Error::NoWorkersMatchRequirements(_) => 503,
            Error::CapacityExceeded(_) => 500,
            Error::ModelNotAvailable(_) => 409,
            Error::InferenceTimeout(_) => 504,
            Error::ExecutionError(_) => 500,
            Error::TransportError(_) | Error::Unavailable(_) => 503,
            Error::Io(_) | Error::Json(_) => 500,
        }
    }
}
