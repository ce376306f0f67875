//! Drives one streaming generation from prompt to persisted report.
//!
//! The provider stream is consumed by a single task that re-emits every
//! chunk as a `content` event. Nothing is written until the stream has
//! ended cleanly; an error, timeout or cancellation before that point leaves
//! no report behind.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{GenerationEvent, GenerationRequest};
use crate::config::{GenerationConfig, ProviderConfig};
use crate::error::ApiError;
use crate::html;
use crate::live::{DocumentStore, Exchange, MessageRole, Thread};
use crate::provider::{ChatMessage, CompletionProvider, CompletionRequest, StreamChunk};
use crate::report::{parse_report, Report, Section, SectionMetadata};
use crate::usage::{estimate_tokens, TokenUsage, UsageEntry};
use crate::worker::{BackgroundJob, JobQueue};

const TITLE_CHARS: usize = 80;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You write financial reports as HTML. Start with a single <h1> title. \
Wrap every section in an element carrying a unique data-section-id attribute whose value names \
the section kind (for example summary-1, revenue-chart-2, peer-table-3, kpi-metric-4). \
Put key takeaways in elements with class \"insight\".";

/// How a generation task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed { report_id: String },
    Failed { message: String },
    Cancelled,
}

/// Caller side of a running generation.
pub struct GenerationHandle {
    pub events: mpsc::Receiver<GenerationEvent>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<GenerationOutcome>,
}

impl GenerationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains every event, then waits for the task.
    pub async fn collect(mut self) -> (Vec<GenerationEvent>, GenerationOutcome) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = self.task.await.unwrap_or_else(|e| GenerationOutcome::Failed {
            message: e.to_string(),
        });
        (events, outcome)
    }

    /// Events framed as SSE, followed by the `[DONE]` sentinel.
    pub fn into_sse(self) -> impl Stream<Item = String> + Send + 'static {
        let GenerationHandle { events, .. } = self;
        futures_util::stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            match events.recv().await {
                Some(event) => Some((event.to_sse(), Some(events))),
                None => Some((GenerationEvent::sse_done(), None)),
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Settings {
    default_model: String,
    max_tokens: u32,
    temperature: f32,
    request_timeout: Duration,
    idle_timeout: Duration,
    max_prompt_chars: usize,
    event_buffer: usize,
}

pub struct ReportGenerator {
    provider: Arc<dyn CompletionProvider>,
    live: Arc<dyn DocumentStore>,
    queue: Arc<JobQueue>,
    settings: Settings,
}

impl ReportGenerator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        live: Arc<dyn DocumentStore>,
        queue: Arc<JobQueue>,
        provider_config: &ProviderConfig,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            provider,
            live,
            queue,
            settings: Settings {
                default_model: provider_config.default_model.clone(),
                max_tokens: provider_config.max_tokens,
                temperature: provider_config.temperature,
                request_timeout: Duration::from_secs(provider_config.request_timeout_secs),
                idle_timeout: Duration::from_secs(provider_config.idle_timeout_secs),
                max_prompt_chars: config.max_prompt_chars,
                event_buffer: config.event_buffer.max(1),
            },
        }
    }

    /// Overrides the whole-request and between-chunk timeouts.
    pub fn with_timeouts(mut self, request: Duration, idle: Duration) -> Self {
        self.settings.request_timeout = request;
        self.settings.idle_timeout = idle;
        self
    }

    /// Validates `request` and starts the generation task.
    ///
    /// Validation, thread lookup and ownership errors are returned here and
    /// nothing is started. Everything after that is reported through the
    /// handle's event stream.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationHandle, ApiError> {
        request.validate(self.settings.max_prompt_chars)?;

        let thread = match &request.thread_id {
            Some(thread_id) => {
                let thread = self
                    .live
                    .get_thread(thread_id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("thread {}", thread_id)))?;
                if thread.user_id != request.user_id {
                    return Err(ApiError::Forbidden(format!(
                        "thread {} belongs to another user",
                        thread_id
                    )));
                }
                Some(thread)
            }
            None => None,
        };

        let model = request
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_model.clone());

        let (events, receiver) = mpsc::channel(self.settings.event_buffer);
        let cancel = CancellationToken::new();

        let span = tracing::info_span!(
            "generation",
            user_id = %request.user_id,
            model = %model,
            prompt_chars = request.prompt.chars().count()
        );
        let run = GenerationRun {
            provider: Arc::clone(&self.provider),
            live: Arc::clone(&self.live),
            queue: Arc::clone(&self.queue),
            settings: self.settings.clone(),
            request,
            thread,
            model,
            events,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run.execute().instrument(span));

        Ok(GenerationHandle {
            events: receiver,
            cancel,
            task,
        })
    }
}

enum Abort {
    Cancelled,
    Failed(String),
}

struct GenerationRun {
    provider: Arc<dyn CompletionProvider>,
    live: Arc<dyn DocumentStore>,
    queue: Arc<JobQueue>,
    settings: Settings,
    request: GenerationRequest,
    thread: Option<Thread>,
    model: String,
    events: mpsc::Sender<GenerationEvent>,
    cancel: CancellationToken,
}

impl GenerationRun {
    async fn execute(self) -> GenerationOutcome {
        let result = match self.emit(GenerationEvent::Start).await {
            Ok(()) => self.run().await,
            Err(abort) => Err(abort),
        };

        match result {
            Ok(report_id) => GenerationOutcome::Completed { report_id },
            Err(Abort::Cancelled) => {
                info!("Generation cancelled, nothing persisted");
                GenerationOutcome::Cancelled
            }
            Err(Abort::Failed(message)) => {
                warn!("Generation failed: {}", message);
                let _ = self
                    .events
                    .send(GenerationEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                GenerationOutcome::Failed { message }
            }
        }
    }

    async fn run(&self) -> Result<String, Abort> {
        let request = self.completion_request();
        let input_estimate = estimate_input(&request);
        let (buffer, usage) = self.consume(request).await?;

        if buffer.trim().is_empty() {
            return Err(Abort::Failed("provider returned an empty completion".to_string()));
        }
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }

        let usage = match usage {
            Some(usage) if usage.total() > 0 => UsageEntry::new(&self.model, usage, false),
            _ => UsageEntry::new(
                &self.model,
                TokenUsage {
                    input_tokens: input_estimate,
                    output_tokens: estimate_tokens(&buffer),
                },
                true,
            ),
        };

        let (report, thread, exchange) = self.assemble(&buffer, usage);
        let report_id = report.id.clone();
        let sections = report.sections.clone();
        let insights = report.insights.clone();

        self.live
            .insert_generated(report, thread, exchange)
            .await
            .map_err(|e| Abort::Failed(format!("failed to save report: {}", e)))?;
        info!(
            "Generated report {} with {} sections ({} chars)",
            report_id,
            sections.len(),
            buffer.len()
        );

        let complete = GenerationEvent::Complete {
            report_id: report_id.clone(),
            sections,
            insights,
        };
        if self.events.send(complete).await.is_err() {
            debug!("Client left before the complete event for report {}", report_id);
        }

        let job = BackgroundJob::SyncReport {
            report_id: report_id.clone(),
        };
        if let Err(e) = self.queue.submit(job) {
            warn!("Could not queue sync for report {}: {}", report_id, e);
        }

        Ok(report_id)
    }

    /// Reads the provider stream to the end, forwarding each text chunk.
    async fn consume(
        &self,
        request: CompletionRequest,
    ) -> Result<(String, Option<TokenUsage>), Abort> {
        let deadline = Instant::now() + self.settings.request_timeout;
        let timed_out = || {
            Abort::Failed(format!(
                "generation timed out after {}s",
                self.settings.request_timeout.as_secs_f64()
            ))
        };

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Abort::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            opened = self.provider.stream(request) => opened,
        };
        let mut stream = opened.map_err(|e| Abort::Failed(e.to_string()))?;

        let mut buffer = String::new();
        let mut usage = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Closing provider stream after {} chars", buffer.len());
                    return Err(Abort::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                next = tokio::time::timeout(self.settings.idle_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    return Err(Abort::Failed(format!(
                        "provider sent nothing for {}s",
                        self.settings.idle_timeout.as_secs_f64()
                    )))
                }
                Ok(None) => break,
                Ok(Some(Ok(StreamChunk::Text(text)))) => {
                    buffer.push_str(&text);
                    self.emit(GenerationEvent::Content { text }).await?;
                }
                Ok(Some(Ok(StreamChunk::Usage(reported)))) => usage = Some(reported),
                Ok(Some(Err(e))) => return Err(Abort::Failed(e.to_string())),
            }
        }

        Ok((buffer, usage))
    }

    /// Sends `event`, treating a departed receiver as a cancellation.
    async fn emit(&self, event: GenerationEvent) -> Result<(), Abort> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Abort::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| Abort::Cancelled),
        }
    }

    fn completion_request(&self) -> CompletionRequest {
        let mut messages: Vec<ChatMessage> = self
            .thread
            .iter()
            .flat_map(|t| t.messages.iter())
            .map(|m| match m.role {
                MessageRole::User => ChatMessage::user(m.content.as_str()),
                MessageRole::Assistant => ChatMessage::assistant(m.content.as_str()),
            })
            .collect();
        messages.push(ChatMessage::user(self.request.prompt.trim()));

        CompletionRequest {
            model: self.model.clone(),
            system: Some(
                self.request
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            ),
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    /// Builds the report (sections in document order), the thread it belongs
    /// to and the exchange to append to that thread.
    fn assemble(&self, buffer: &str, usage: UsageEntry) -> (Report, Thread, Exchange) {
        let prompt = self.request.prompt.trim();
        let user_id = self.request.user_id.as_str();
        let parsed = parse_report(buffer);

        let title = parsed
            .title
            .unwrap_or_else(|| html::truncate_chars(prompt, TITLE_CHARS));
        let mut report = Report::new(user_id, &title);
        report.prompt = Some(prompt.to_string());
        report.model = Some(self.model.clone());
        report.insights = parsed.insights;
        report.sections = parsed
            .sections
            .into_iter()
            .enumerate()
            .map(|(order, region)| {
                Section::new(
                    &report.id,
                    region.section_type,
                    &region.title,
                    &region.html,
                    order as u32,
                    SectionMetadata::generated(&self.model, &region.identifier),
                )
            })
            .collect();
        let section_count = report.sections.len();
        report.record_usage(user_id, usage, section_count);

        let thread = self
            .thread
            .clone()
            .unwrap_or_else(|| Thread::new(user_id, &html::truncate_chars(prompt, TITLE_CHARS)));
        let summary = format!(
            "Generated report \"{}\" with {} sections",
            report.title, section_count
        );
        report.thread_id = Some(thread.id.clone());
        report.refresh_snapshot();

        (report, thread, Exchange::new(prompt, summary))
    }
}

fn estimate_input(request: &CompletionRequest) -> u64 {
    let system = request.system.as_deref().map(estimate_tokens).unwrap_or(0);
    system
        + request
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<u64>()
}
