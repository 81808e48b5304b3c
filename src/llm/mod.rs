pub mod ollama;

pub use ollama::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Ollama is not running at {0}")]
    OllamaConnection(String),

    #[error("Ollama returned error (status {status}): {body}")]
    OllamaError { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

/// LLM client abstraction (allows mocking)
pub trait LlmClient: Send + Sync {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;
}

/// Completion service consumed by the agent.
///
/// Wraps an [`LlmClient`] and never fails: any client error is logged and
/// surfaces as empty text, which the agent treats as an unusable response.
pub struct CompletionService {
    client: Box<dyn LlmClient>,
    model: String,
}

impl CompletionService {
    pub fn new(client: Box<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Run one completion. Returns `""` on any failure.
    pub fn complete(&self, prompt: &str, system: &str) -> String {
        match self.client.generate(&self.model, prompt, system) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "Completion failed, treating as empty response");
                String::new()
            }
        }
    }
}
