use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Configuration;
use crate::core::error::{ExtractionError, Result};
use crate::core::llm_client::{GeminiClient, ModelInvoker};
use crate::core::sanitizer;
use crate::templates::PromptBuilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary_es: String,
    pub summary_en: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPointsResult {
    pub key_points_es: Vec<String>,
    pub key_points_en: Vec<String>,
}

impl SummaryResult {
    /// Typed view of a validated summary object. `None` if a field is not a string.
    pub fn from_object(object: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(object.clone())).ok()
    }
}

impl KeyPointsResult {
    /// Typed view of a validated key points object. `None` if an item is not a string.
    pub fn from_object(object: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(object.clone())).ok()
    }
}

/// What a required field must look like for the object to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Any JSON value.
    Present,
    /// A JSON array.
    Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Summarize,
    KeyPoints,
}

impl Task {
    pub fn required_fields(&self) -> [&'static str; 2] {
        match self {
            Task::Summarize => ["summary_es", "summary_en"],
            Task::KeyPoints => ["key_points_es", "key_points_en"],
        }
    }

    pub fn field_shape(&self) -> FieldShape {
        match self {
            Task::Summarize => FieldShape::Present,
            Task::KeyPoints => FieldShape::Sequence,
        }
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            Task::Summarize => "summarize",
            Task::KeyPoints => "key_points",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Task::Summarize => "summary",
            Task::KeyPoints => "key points",
        }
    }

    pub fn missing_fields_message(&self) -> &'static str {
        match self {
            Task::Summarize => {
                "The model response does not contain the summaries in both languages."
            }
            Task::KeyPoints => {
                "The model response does not contain the key points as a list in both languages."
            }
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_name())
    }
}

/// Prompt, one model call, sanitize. Shared read-only across requests.
pub struct ExtractionPipeline {
    prompts: PromptBuilder,
    invoker: Option<Arc<dyn ModelInvoker>>,
}

impl ExtractionPipeline {
    pub fn new(invoker: Option<Arc<dyn ModelInvoker>>) -> anyhow::Result<Self> {
        Ok(Self {
            prompts: PromptBuilder::new()?,
            invoker,
        })
    }

    /// Build the pipeline from configuration. A missing API key is not an
    /// error here; every run reports [`ExtractionError::NotConfigured`] instead.
    pub fn from_config(config: &Configuration) -> anyhow::Result<Self> {
        let invoker = GeminiClient::from_settings(&config.llm_settings)?
            .map(|client| Arc::new(client) as Arc<dyn ModelInvoker>);
        Self::new(invoker)
    }

    pub fn is_configured(&self) -> bool {
        self.invoker.is_some()
    }

    pub async fn summarize(&self, text: &str) -> Result<Map<String, Value>> {
        self.run(Task::Summarize, text).await
    }

    pub async fn key_points(&self, text: &str) -> Result<Map<String, Value>> {
        self.run(Task::KeyPoints, text).await
    }

    pub async fn run(&self, task: Task, text: &str) -> Result<Map<String, Value>> {
        let invoker = self.invoker.as_ref().ok_or(ExtractionError::NotConfigured)?;

        if text.trim().is_empty() {
            return Err(ExtractionError::InvalidInput(
                "The text field must not be empty.".to_string(),
            ));
        }

        let request_id = Uuid::new_v4();
        let span = info_span!("extraction", task = %task, request_id = %request_id);

        async move {
            let start_time = Instant::now();
            let result = self.execute(invoker.as_ref(), task, text).await;
            let elapsed_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(_) => info!(elapsed_ms, "extraction completed"),
                Err(ExtractionError::Upstream(e)) => {
                    error!(model = %invoker.model(), elapsed_ms, error = ?e, "extraction failed")
                }
                Err(e) => warn!(elapsed_ms, error = %e, "extraction rejected"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        invoker: &dyn ModelInvoker,
        task: Task,
        text: &str,
    ) -> Result<Map<String, Value>> {
        let prompt = self.prompts.build(task, text)?;

        let response = invoker.generate(&prompt).await?;

        debug!(
            model = %response.model,
            finish_reason = %response.finish_reason,
            total_tokens = response.usage.total_token_count,
            response_ms = response.response_time.as_millis() as u64,
            "model response received"
        );

        sanitizer::sanitize(task, &response.content)
    }
}
