//! Builders for test configurations and canned model output.

#![allow(dead_code)]

use finreport::config::{EngineConfig, ProviderKind};

/// Builder for `EngineConfig` instances suited to tests.
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    /// Scripted provider, two workers, fast retries.
    pub fn new() -> Self {
        let mut config = EngineConfig::default();
        config.provider.kind = ProviderKind::Scripted;
        config.provider.default_model = "claude-3-5-sonnet-20241022".to_string();
        config.queue.workers = 2;
        config.queue.max_retries = 2;
        config.queue.retry_base_delay_ms = 10;
        Self { config }
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.config.database.path = Some(path.to_string());
        self
    }

    pub fn min_text_length(mut self, chars: usize) -> Self {
        self.config.entities.min_text_length = chars;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.queue.max_retries = retries;
        self
    }

    pub fn max_prompt_chars(mut self, chars: usize) -> Self {
        self.config.generation.max_prompt_chars = chars;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds model output HTML with marked sections.
#[derive(Default)]
pub struct ReportHtmlBuilder {
    title: Option<String>,
    parts: Vec<String>,
}

impl ReportHtmlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// A section marked with `identifier`, headed by `heading`.
    pub fn section(mut self, identifier: &str, heading: &str, body: &str) -> Self {
        self.parts.push(format!(
            r#"<div data-section-id="{}"><h2>{}</h2><p>{}</p></div>"#,
            identifier, heading, body
        ));
        self
    }

    pub fn insight(mut self, class: &str, text: &str) -> Self {
        self.parts.push(format!(
            r#"<div data-section-id="insight-{}"><div class="insight {}"><p>{}</p></div></div>"#,
            self.parts.len() + 1,
            class,
            text
        ));
        self
    }

    pub fn build(self) -> String {
        let mut html = String::new();
        if let Some(title) = self.title {
            html.push_str(&format!("<h1>{}</h1>\n", title));
        }
        html.push_str(&self.parts.join("\n"));
        html
    }
}

/// A quarterly semiconductor report long enough for entity extraction.
pub fn semiconductor_report() -> String {
    ReportHtmlBuilder::new()
        .title("Q3 Semiconductor Review")
        .section(
            "summary-1",
            "Executive Summary",
            "NVIDIA Corporation posted record data center revenue while Advanced Micro Devices gained share in server CPUs.",
        )
        .section(
            "revenue-chart-2",
            "Revenue Trend",
            "Quarterly revenue rose for the sixth consecutive period on accelerator demand.",
        )
        .section(
            "peer-table-3",
            "Peer Comparison",
            "Intel lagged peers on margins as foundry losses widened.",
        )
        .insight("warning", "Export restrictions remain a risk for China revenue.")
        .build()
}

/// One entry of a canned extraction answer.
pub struct EntityAnswer {
    pub name: &'static str,
    pub entity_type: &'static str,
    pub ticker: Option<&'static str>,
    pub sentiment: f64,
    pub relevance: f64,
}

impl EntityAnswer {
    pub fn company(name: &'static str, ticker: &'static str) -> Self {
        Self {
            name,
            entity_type: "company",
            ticker: Some(ticker),
            sentiment: 0.5,
            relevance: 0.8,
        }
    }
}

/// JSON answer as the extraction model would return it, wrapped in prose.
pub fn extraction_answer(entities: &[EntityAnswer]) -> String {
    let items: Vec<serde_json::Value> = entities
        .iter()
        .map(|e| {
            serde_json::json!({
                "name": e.name,
                "type": e.entity_type,
                "ticker": e.ticker,
                "context": format!("{} was discussed.", e.name),
                "sentiment": e.sentiment,
                "relevance": e.relevance,
                "metadata": {"revenue": "$35.1B"}
            })
        })
        .collect();
    format!(
        "Here are the entities:\n```json\n{}\n```",
        serde_json::Value::Array(items)
    )
}
