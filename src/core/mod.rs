pub mod error;
pub mod llm_client;
pub mod sanitizer;
pub mod extractor;

pub use error::ExtractionError;
pub use llm_client::{GeminiClient, ModelInvoker, LlmResponse, GEMINI_MODEL, MAX_OUTPUT_TOKENS, TEMPERATURE};
pub use extractor::{ExtractionPipeline, Task, TextRequest, SummaryResult, KeyPointsResult};
