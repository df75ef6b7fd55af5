//! LLM provider abstraction used by the planner and learning extractor.
//!
//! Concrete HTTP providers live outside this crate; the core only needs a
//! single-shot completion call.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Scripted provider for tests and offline runs.
pub struct MockLlmProvider {
    model: String,
    responses: std::sync::Mutex<Vec<Result<CompletionResponse, String>>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(Ok(response));
        }
    }

    /// Queue a failure for the next `complete` call.
    pub fn queue_error(&self, message: &str) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(Err(message.to_string()));
        }
    }

    /// Number of `complete` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = match self.responses.lock() {
            Ok(mut responses) if !responses.is_empty() => Some(responses.remove(0)),
            _ => None,
        };
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(LlmError::ApiRequest { message }),
            None => Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
