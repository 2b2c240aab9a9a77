//! Error types for the extraction pipeline.
//!
//! Every variant except [`ExtractionError::Upstream`] is safe to show to the
//! caller as-is. `Upstream` wraps transport and service failures whose details
//! are only ever logged.

use thiserror::Error;

use crate::core::extractor::Task;

/// A [`Result`](std::result::Result) alias using [`ExtractionError`] as the error type.
pub type Result<T> = std::result::Result<T, ExtractionError>;

#[derive(Error, Debug)]
pub enum ExtractionError {
    /// No API key was supplied at startup.
    #[error("The Gemini API key is not configured. Set GEMINI_API_KEY in the environment or in a .env file.")]
    NotConfigured,

    /// The caller's request could not be used.
    #[error("{0}")]
    InvalidInput(String),

    /// The model output contains no `{ ... }` span.
    #[error("The model did not return valid JSON for the {}.", .0.label())]
    MalformedOutput(Task),

    /// A `{ ... }` span was found but it is not JSON. The fragment stays server-side.
    #[error("The model returned invalid JSON for the {}.", .task.label())]
    InvalidJson {
        task: Task,
        fragment: String,
        #[source]
        source: serde_json::Error,
    },

    /// The JSON object lacks a bilingual field or has the wrong shape for one.
    #[error("{}", .0.missing_fields_message())]
    MissingFields(Task),

    /// Transport, service or otherwise unexpected failure.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl ExtractionError {
    /// Whether the error is the caller's or the model's fault (HTTP 400)
    /// rather than an internal failure (HTTP 500).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ExtractionError::Upstream(_))
    }
}
