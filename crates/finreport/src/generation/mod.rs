//! Streaming report generation.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub mod coordinator;
pub mod events;

pub use coordinator::{GenerationHandle, GenerationOutcome, ReportGenerator, DEFAULT_SYSTEM_PROMPT};
pub use events::{GenerationEvent, DONE_SENTINEL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Authenticated caller; trusted as given.
    pub user_id: String,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Continue an existing conversation.
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(user_id: &str, prompt: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            model: None,
            system_prompt: None,
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: &str) -> Self {
        self.thread_id = Some(thread_id.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub(crate) fn validate(&self, max_prompt_chars: usize) -> Result<(), ApiError> {
        if self.user_id.trim().is_empty() {
            return Err(ApiError::Validation("user id is required".to_string()));
        }
        if self.prompt.trim().is_empty() {
            return Err(ApiError::Validation("prompt must not be empty".to_string()));
        }
        let chars = self.prompt.chars().count();
        if chars > max_prompt_chars {
            return Err(ApiError::Validation(format!(
                "prompt is {} characters, limit is {}",
                chars, max_prompt_chars
            )));
        }
        Ok(())
    }
}
