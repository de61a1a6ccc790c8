use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
///
/// Every variant reaches the caller as `{"error": "<message>"}`; the variant
/// only decides the HTTP status and how loudly it is logged.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Malformed inbound payload (location, farm size, non-numeric fields).
    InvalidInput(String),
    /// One of the geo data fetchers returned no usable value.
    UpstreamUnavailable(String),
    /// A field the feature vector needs is absent from the payload.
    MissingFeature(String),
    /// Failure inside the preprocessing transform or the forward pass.
    Inference(String),
    /// No inference engine was loaded at startup.
    ModelUnavailable,
    /// Model or preprocessor artifact could not be loaded.
    ModelLoad(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Status code for the variant, looking through context wrappers.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::MissingFeature(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UpstreamUnavailable(_) | AppError::ExternalApiError(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::ModelUnavailable | AppError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Inference(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }

    /// The JSON payload returned to callers.
    pub fn to_payload(&self) -> serde_json::Value {
        json!({ "error": self.to_string() })
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidInput(msg) => write!(f, "{}", msg),
            AppError::UpstreamUnavailable(msg) => write!(f, "{}", msg),
            AppError::MissingFeature(name) => write!(
                f,
                "Missing required feature: '{}'. Check your input data.",
                name
            ),
            AppError::Inference(msg) => write!(f, "An error occurred during prediction: {}", msg),
            AppError::ModelUnavailable => write!(f, "Model or preprocessor not loaded."),
            AppError::ModelLoad(msg) => write!(f, "Failed to load model artifacts: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status and an `{"error": ...}` body.
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::InvalidInput(msg) | AppError::MissingFeature(msg) => {
                tracing::warn!("Rejected request: {}", msg);
            }
            AppError::UpstreamUnavailable(msg) | AppError::ExternalApiError(msg) => {
                tracing::error!("Upstream data unavailable: {}", msg);
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
            }
            other => {
                tracing::error!("Request failed: {}", other);
            }
        }

        (status, Json(self.to_payload())).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Artifact loading goes through `std::io` and `serde_json`; both surface as
/// load failures with the file path attached by the caller.
impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::ModelLoad(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::ModelLoad(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Result<T, serde_json::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::ModelLoad(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::ModelLoad(format!("{}: {}", f(), e)))
    }
}
