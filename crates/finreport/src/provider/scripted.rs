//! A provider that replays canned answers.
//!
//! Used by tests and by `ProviderKind::Scripted` deployments. Responses are
//! consumed in order; once the script runs out the default response (if
//! any) is repeated, otherwise an empty completion is returned.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use super::{ChunkStream, Completion, CompletionProvider, CompletionRequest, ProviderError, StreamChunk};
use crate::usage::TokenUsage;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedResponse {
    /// Streams `text` in chunks and reports `usage` at the end, if set.
    Text {
        text: String,
        usage: Option<TokenUsage>,
    },
    /// Streams the first `chunks` chunks of `text`, then fails.
    FailAfter {
        text: String,
        chunks: usize,
        error: ProviderError,
    },
    /// Fails before any chunk.
    Error(ProviderError),
    /// Streams the first `chunks` chunks of `text`, then goes silent.
    Stall { text: String, chunks: usize },
}

enum Step {
    Emit(Result<StreamChunk, ProviderError>),
    Stall,
}

pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedResponse>>,
    default_response: Option<ScriptedResponse>,
    requests: Mutex<Vec<CompletionRequest>>,
    chunk_chars: usize,
    chunk_delay: Option<Duration>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_response: None,
            requests: Mutex::new(Vec::new()),
            chunk_chars: 16,
            chunk_delay: None,
        }
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(ScriptedResponse::Text {
            text: text.into(),
            usage: None,
        })
    }

    pub fn with_usage_response(self, text: impl Into<String>, usage: TokenUsage) -> Self {
        self.push(ScriptedResponse::Text {
            text: text.into(),
            usage: Some(usage),
        })
    }

    pub fn with_failure_after(self, text: impl Into<String>, chunks: usize, error: ProviderError) -> Self {
        self.push(ScriptedResponse::FailAfter {
            text: text.into(),
            chunks,
            error,
        })
    }

    pub fn with_error(self, error: ProviderError) -> Self {
        self.push(ScriptedResponse::Error(error))
    }

    pub fn with_stall(self, text: impl Into<String>, chunks: usize) -> Self {
        self.push(ScriptedResponse::Stall {
            text: text.into(),
            chunks,
        })
    }

    /// Answer used whenever the script is exhausted.
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_response = Some(ScriptedResponse::Text {
            text: text.into(),
            usage: None,
        });
        self
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn push(self, response: ScriptedResponse) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_response(&self, request: CompletionRequest) -> ScriptedResponse {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .or_else(|| self.default_response.clone())
            .unwrap_or(ScriptedResponse::Text {
                text: String::new(),
                usage: None,
            })
    }

    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_chars)
            .map(|c| c.iter().collect())
            .collect()
    }

    fn text_steps(&self, text: &str, limit: Option<usize>) -> VecDeque<Step> {
        let mut chunks = self.split(text);
        if let Some(limit) = limit {
            chunks.truncate(limit);
        }
        chunks
            .into_iter()
            .map(|c| Step::Emit(Ok(StreamChunk::Text(c))))
            .collect()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        match self.next_response(request) {
            ScriptedResponse::Text { text, usage } => Ok(Completion { text, usage }),
            ScriptedResponse::FailAfter { error, .. } | ScriptedResponse::Error(error) => Err(error),
            ScriptedResponse::Stall { .. } => {
                futures_util::future::pending::<()>().await;
                Err(ProviderError::EmptyResponse)
            }
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let steps = match self.next_response(request) {
            ScriptedResponse::Error(error) => return Err(error),
            ScriptedResponse::Text { text, usage } => {
                let mut steps = self.text_steps(&text, None);
                if let Some(usage) = usage {
                    steps.push_back(Step::Emit(Ok(StreamChunk::Usage(usage))));
                }
                steps
            }
            ScriptedResponse::FailAfter {
                text,
                chunks,
                error,
            } => {
                let mut steps = self.text_steps(&text, Some(chunks));
                steps.push_back(Step::Emit(Err(error)));
                steps
            }
            ScriptedResponse::Stall { text, chunks } => {
                let mut steps = self.text_steps(&text, Some(chunks));
                steps.push_back(Step::Stall);
                steps
            }
        };

        let delay = self.chunk_delay;
        let stream = futures_util::stream::unfold(steps, move |mut steps| async move {
            match steps.pop_front()? {
                Step::Emit(item) => {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    Some((item, steps))
                }
                Step::Stall => {
                    futures_util::future::pending::<()>().await;
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
