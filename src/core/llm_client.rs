use anyhow::{Result, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::LlmSettings;

/// Every request goes to this model with the same sampling parameters.
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const TEMPERATURE: f32 = 0.7;
pub const MAX_OUTPUT_TOKENS: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<Usage>,
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub input_token_limit: Option<u64>,
    #[serde(default)]
    pub output_token_limit: Option<u64>,
}

#[derive(Debug)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Usage,
    pub model: String,
    pub finish_reason: String,
    pub response_time: Duration,
}

/// A single-shot text generation backend.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse>;

    fn model(&self) -> &str;
}

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        base_url: String,
        api_key: String,
        timeout: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let mut key = reqwest::header::HeaderValue::from_str(&api_key)
            .context("API key contains characters not allowed in a header")?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from settings, or `None` when no API key is configured.
    pub fn from_settings(settings: &LlmSettings) -> Result<Option<Self>> {
        let Some(api_key) = settings.api_key() else {
            return Ok(None);
        };

        Self::new(
            settings.base_url.clone(),
            api_key.to_string(),
            settings.timeout,
        )
        .map(Some)
    }

    pub async fn model_info(&self) -> Result<ModelInfo> {
        let url = format!("{}/v1beta/models/{}", self.base_url, GEMINI_MODEL);

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch model metadata")?;

        if !response.status().is_success() {
            anyhow::bail!("Gemini API returned error: {}", response.status());
        }

        response.json().await
            .context("Failed to parse model metadata")
    }

    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }
}

#[async_trait]
impl ModelInvoker for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        let start_time = Instant::now();

        let request = self.build_request(prompt);

        debug!(model = GEMINI_MODEL, prompt_chars = prompt.len(), "sending request to Gemini");

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, GEMINI_MODEL);
        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {}: {}", status, error_text);
        }

        let completion: GenerateContentResponse = response.json().await
            .context("Failed to parse generateContent response")?;

        let block_reason = completion
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref());
        if let Some(reason) = block_reason {
            anyhow::bail!("Prompt was blocked by Gemini: {}", reason);
        }

        let candidate = completion.candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No candidates in response"))?;

        let texts: Vec<String> = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        let finish_reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
        if texts.is_empty() {
            anyhow::bail!("Candidate has no text parts (finish reason: {})", finish_reason);
        }

        Ok(LlmResponse {
            content: texts.concat(),
            usage: completion.usage_metadata.unwrap_or_default(),
            model: completion.model_version.unwrap_or_else(|| GEMINI_MODEL.to_string()),
            finish_reason,
            response_time: start_time.elapsed(),
        })
    }

    fn model(&self) -> &str {
        GEMINI_MODEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn client_for(server: &mockito::ServerGuard) -> GeminiClient {
        GeminiClient::new(server.url(), "test-key".to_string(), 5).unwrap()
    }

    #[tokio::test]
    async fn test_generate_sends_fixed_sampling_parameters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", GENERATE_PATH)
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
                "generationConfig": {"temperature": 0.7, "maxOutputTokens": 500}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "{\"a\":"}, {"text": "1}"}]},
                        "finishReason": "STOP",
                        "index": 0
                    }],
                    "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 4, "totalTokenCount": 7}
                }"#,
            )
            .create_async()
            .await;

        let response = client_for(&server).generate("hello").await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "{\"a\":1}");
        assert_eq!(response.finish_reason, "STOP");
        assert_eq!(response.usage.total_token_count, 7);
        assert_eq!(response.model, "gemini-1.5-flash");
    }

    #[tokio::test]
    async fn test_generate_fails_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", GENERATE_PATH)
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = client_for(&server).generate("hello").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_generate_fails_on_blocked_prompt() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", GENERATE_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#)
            .create_async()
            .await;

        let err = client_for(&server).generate("hello").await.unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_generate_fails_without_text_parts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", GENERATE_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"candidates": [{"finishReason": "MAX_TOKENS", "index": 0}]}"#)
            .create_async()
            .await;

        let err = client_for(&server).generate("hello").await.unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[tokio::test]
    async fn test_model_info() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1beta/models/gemini-1.5-flash")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"name": "models/gemini-1.5-flash", "displayName": "Gemini 1.5 Flash",
                    "inputTokenLimit": 1000000, "outputTokenLimit": 8192}"#,
            )
            .create_async()
            .await;

        let info = client_for(&server).model_info().await.unwrap();
        assert_eq!(info.display_name.as_deref(), Some("Gemini 1.5 Flash"));
        assert_eq!(info.output_token_limit, Some(8192));
    }

    #[test]
    fn test_from_settings_without_key() {
        let settings = LlmSettings::default();
        assert!(GeminiClient::from_settings(&settings).unwrap().is_none());
    }

    #[test]
    fn test_fixed_model_and_sampling_parameters() {
        let settings = LlmSettings {
            api_key: Some("test-key".to_string()),
            ..LlmSettings::default()
        };
        let client = GeminiClient::from_settings(&settings).unwrap().unwrap();
        assert_eq!(client.model(), "gemini-1.5-flash");

        let body = serde_json::to_value(client.build_request("hola")).unwrap();
        assert_eq!(body["generationConfig"]["temperature"].as_f64().unwrap() as f32, 0.7);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 500);
    }
}
