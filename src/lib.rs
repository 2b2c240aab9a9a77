pub mod config;
pub mod core;
pub mod handlers;
pub mod templates;

pub use crate::config::Configuration;
pub use crate::core::{ExtractionPipeline, ExtractionError, Task};
pub use crate::handlers::{router, CorsPolicy};
pub use crate::templates::PromptBuilder;
