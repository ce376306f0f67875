//! AI completion providers.
//!
//! A provider turns a [`CompletionRequest`] into either one complete answer
//! or a stream of [`StreamChunk`]s. Timeouts between chunks are enforced by
//! the caller, not the provider.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ConfigError;
use crate::live::MessageRole;
use crate::usage::TokenUsage;

pub mod anthropic;
pub mod error;
pub mod scripted;

pub use anthropic::AnthropicProvider;
pub use error::{parse_http_error, ProviderError};
pub use scripted::{ScriptedProvider, ScriptedResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// `None` when the provider did not report token counts.
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    /// Cumulative usage so far; the last one seen wins.
    Usage(TokenUsage),
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Opens a streaming completion. Errors before the first chunk are
    /// returned directly; later ones arrive as stream items.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError>;
}

/// Builds the provider named by `config.kind`.
///
/// A scripted provider built this way has an empty script and answers every
/// request with an empty completion; tests construct their own.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn CompletionProvider>, ConfigError> {
    match config.kind {
        ProviderKind::Anthropic => {
            let api_key = crate::config::resolve_api_key(config)?;
            let provider = AnthropicProvider::new(config, api_key).map_err(|e| {
                ConfigError::Validation {
                    message: format!("cannot build HTTP client: {}", e),
                }
            })?;
            Ok(Arc::new(provider))
        }
        ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::new())),
    }
}
