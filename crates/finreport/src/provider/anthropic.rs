//! Anthropic Messages API provider with SSE streaming.

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{
    parse_http_error, ChatMessage, ChunkStream, Completion, CompletionProvider,
    CompletionRequest, ProviderError, StreamChunk,
};
use crate::config::ProviderConfig;
use crate::usage::TokenUsage;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Default)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig, api_key: SecretString) -> Result<Self, reqwest::Error> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Sends the request and returns the response once headers arrive.
    /// Only the wait for headers is bounded here; the body is not.
    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let body = MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.as_deref(),
            messages: &request.messages,
            stream,
        };

        let pending = self
            .client
            .post(self.endpoint())
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.request_timeout, pending)
            .await
            .map_err(|_| ProviderError::Timeout(self.request_timeout))?
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response
                .text()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            return Err(parse_http_error(status, &text));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let response = self.send(&request, false).await?;
        let body = tokio::time::timeout(self.request_timeout, response.json::<MessagesResponse>())
            .await
            .map_err(|_| ProviderError::Timeout(self.request_timeout))?
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let text: String = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect();

        Ok(Completion {
            text,
            usage: body.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.send(&request, true).await?;
        Ok(decode_sse(Box::pin(response.bytes_stream())))
    }
}

/// Server-sent events of the Messages streaming API.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Error {
        error: SseError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct SseError {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    message: String,
}

/// Line-level SSE decoder. Tracks usage across `message_start` and
/// `message_delta`, which report input and output counts separately.
#[derive(Debug, Default)]
struct SseDecoder {
    usage: TokenUsage,
    finished: bool,
}

impl SseDecoder {
    fn decode_line(&mut self, line: &str) -> Result<Option<StreamChunk>, ProviderError> {
        let trimmed = line.trim();
        let Some(json) = trimmed.strip_prefix("data:") else {
            // event:, id:, retry: and comment lines carry nothing we need
            return Ok(None);
        };
        let json = json.trim();
        if json.is_empty() || json == "[DONE]" {
            return Ok(None);
        }

        let event: SseEvent =
            serde_json::from_str(json).map_err(|e| ProviderError::Decode(e.to_string()))?;

        match event {
            SseEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.input_tokens = usage.input_tokens;
                    self.usage.output_tokens = usage.output_tokens;
                    return Ok(Some(StreamChunk::Usage(self.usage)));
                }
                Ok(None)
            }
            SseEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            } => Ok(Some(StreamChunk::Text(text))),
            SseEvent::ContentBlockDelta { .. } => Ok(None),
            SseEvent::MessageDelta { usage } => match usage {
                Some(usage) => {
                    self.usage.output_tokens = usage.output_tokens;
                    Ok(Some(StreamChunk::Usage(self.usage)))
                }
                None => Ok(None),
            },
            SseEvent::MessageStop => {
                self.finished = true;
                Ok(None)
            }
            SseEvent::Error { error } => Err(ProviderError::Stream(format!(
                "{}: {}",
                error.error_type.as_deref().unwrap_or("error"),
                error.message
            ))),
            SseEvent::Unknown => Ok(None),
        }
    }
}

struct SseState<S> {
    body: S,
    /// Raw bytes of the current partial line. Decoded only once a whole
    /// line is present so multi-byte characters survive frame splits.
    buffer: Vec<u8>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamChunk, ProviderError>>,
    done: bool,
}

impl<S> SseState<S> {
    fn drain_lines(&mut self) {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            self.push_line(&String::from_utf8_lossy(&raw));
            if self.done {
                return;
            }
        }
    }

    fn push_line(&mut self, line: &str) {
        match self.decoder.decode_line(line) {
            Ok(Some(chunk)) => self.pending.push_back(Ok(chunk)),
            Ok(None) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
        if self.decoder.finished {
            self.done = true;
        }
    }

    /// Body closed. Anything short of `message_stop` is a dropped connection.
    fn finish(&mut self) {
        let rest = std::mem::take(&mut self.buffer);
        if !rest.iter().all(u8::is_ascii_whitespace) {
            self.push_line(&String::from_utf8_lossy(&rest));
        }
        if !self.decoder.finished && !self.pending.iter().any(Result::is_err) {
            self.pending.push_back(Err(ProviderError::Stream(
                "stream ended before message_stop".to_string(),
            )));
        }
        self.done = true;
    }
}

/// Turns a raw byte stream of server-sent events into stream chunks. The
/// stream ends after `message_stop` or the first error; a body that closes
/// before `message_stop` yields a `Stream` error.
pub(crate) fn decode_sse<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        body,
        buffer: Vec::new(),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(bytes.as_ref());
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ProviderError::Network(e.to_string())), state));
                }
                None => state.finish(),
            }
        }
    })
    .boxed()
}
