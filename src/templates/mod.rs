use anyhow::{Result, Context};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::core::Task;

const SUMMARY_TEMPLATE: &str = r#"You are an educational content assistant designed to help parents.
Your task is to summarize the following educational text concisely, in a way that is easy for an adult to understand.
Provide the same summary in two languages: Spanish and English.
Return the answer strictly as a JSON object with the following properties:
"summary_es" (the summary in Spanish) and "summary_en" (the summary in English).
Make sure the answer is only the JSON object, with no additional text and no preamble such as "json" or "```json".

Text to summarize:
"{{text}}"
"#;

const KEY_POINTS_TEMPLATE: &str = r#"You are an educational content assistant designed to help parents.
Your task is to extract the 3 to 5 key points or main ideas of the following educational text.
Provide these key points as a list, in both Spanish and English.
Return the answer strictly as a JSON object with the following properties:
"key_points_es" (a list of strings with the key points in Spanish) and
"key_points_en" (a list of strings with the key points in English).
Make sure the answer is only the JSON object, with no additional text and no preamble such as "json" or "```json".

Text to extract key points from:
"{{text}}"
"#;

#[derive(Serialize)]
struct PromptContext<'a> {
    text: &'a str,
}

/// Renders the per-task instruction prompts.
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();

        // The caller's text goes in verbatim, never HTML-escaped.
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);

        handlebars
            .register_template_string(Task::Summarize.template_name(), SUMMARY_TEMPLATE)
            .context("Failed to register summary prompt template")?;
        handlebars
            .register_template_string(Task::KeyPoints.template_name(), KEY_POINTS_TEMPLATE)
            .context("Failed to register key points prompt template")?;

        Ok(Self { handlebars })
    }

    pub fn build(&self, task: Task, text: &str) -> Result<String> {
        let prompt = self
            .handlebars
            .render(task.template_name(), &PromptContext { text })
            .with_context(|| format!("Failed to render {} prompt", task.label()))?;

        debug!(task = %task, prompt_chars = prompt.len(), "prompt rendered");
        Ok(prompt)
    }
}
