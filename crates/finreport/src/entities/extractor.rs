//! Entity extraction through the completion provider.
//!
//! The model is asked for a single JSON array. Its answer is free-form text,
//! so the array is located with a string-aware bracket scanner and each
//! element is validated on its own; one malformed element never discards
//! the rest.

use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use super::{EntityType, ExtractedEntity, Figure, MentionMetadata, MentionMetadataV1};
use crate::config::EntitiesConfig;
use crate::html;
use crate::provider::{ChatMessage, CompletionProvider, CompletionRequest, ProviderError};

/// Upper bound on text sent for extraction.
const MAX_INPUT_CHARS: usize = 12_000;
const MAX_TICKER_CHARS: usize = 12;
const MAX_NAME_CHARS: usize = 120;

const SYSTEM_PROMPT: &str = "You extract named financial entities from report text. \
Answer with one JSON array and nothing else.";

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("No JSON array found in extraction answer")]
    NoJson,

    #[error("Extraction answer is not a JSON array: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    sentiment: Option<f64>,
    #[serde(default)]
    relevance: Option<f64>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

pub struct EntityExtractor {
    provider: Arc<dyn CompletionProvider>,
    model: String,
    max_entities: usize,
    max_context_chars: usize,
}

impl EntityExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &EntitiesConfig) -> Self {
        Self {
            provider,
            model: config.extraction_model.clone(),
            max_entities: config.max_entities,
            max_context_chars: config.max_context_chars,
        }
    }

    /// Extracts entities from plain text. Never fails: provider and parse
    /// errors are logged and yield an empty list.
    pub async fn extract(&self, text: &str) -> Vec<ExtractedEntity> {
        match self.try_extract(text).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Entity extraction failed, continuing without entities: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn try_extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractionError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![ChatMessage::user(self.build_prompt(text))],
            max_tokens: 2048,
            temperature: 0.0,
        };

        let completion = self.provider.complete(request).await?;
        let entities = self.parse_entities(&completion.text)?;
        debug!(
            "Extracted {} entities from {} chars",
            entities.len(),
            text.len()
        );
        Ok(entities)
    }

    fn build_prompt(&self, text: &str) -> String {
        format!(
            "Identify between 3 and {max} named financial entities in the text below.\n\
             Return a JSON array where each item has:\n\
             - \"name\": canonical name\n\
             - \"type\": one of company, stock, person, sector, crypto, commodity, index, etf, currency\n\
             - \"ticker\": ticker symbol or null\n\
             - \"context\": the sentence mentioning it, at most {ctx} characters\n\
             - \"sentiment\": number from -1 (negative) to 1 (positive)\n\
             - \"relevance\": number from 0 to 1\n\
             - \"metadata\": object of financial figures mentioned with it, e.g. {{\"revenue\": \"$35.1B\"}}\n\n\
             Text:\n{text}",
            max = self.max_entities,
            ctx = self.max_context_chars,
            text = html::truncate_chars(text, MAX_INPUT_CHARS),
        )
    }

    /// Parses a model answer into validated entities, at most
    /// `max_entities` of them.
    pub fn parse_entities(&self, response: &str) -> Result<Vec<ExtractedEntity>, ExtractionError> {
        let json = extract_json_array(response).ok_or(ExtractionError::NoJson)?;
        let items: Vec<serde_json::Value> = serde_json::from_str(json)?;

        let entities: Vec<ExtractedEntity> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RawEntity>(item) {
                Ok(raw) => self.validate(raw),
                Err(e) => {
                    debug!("Skipping malformed entity: {}", e);
                    None
                }
            })
            .take(self.max_entities)
            .collect();

        if entities.is_empty() {
            warn!("Extraction answer contained no usable entities");
        }
        Ok(entities)
    }

    fn validate(&self, raw: RawEntity) -> Option<ExtractedEntity> {
        let name = raw.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
        if html::entity_slug(&name).is_empty() {
            return None;
        }

        let ticker = raw
            .ticker
            .map(|t| t.trim().trim_start_matches('$').to_uppercase())
            .filter(|t| !t.is_empty() && t != "NULL" && t.chars().count() <= MAX_TICKER_CHARS);

        Some(ExtractedEntity {
            name: html::truncate_chars(&name, MAX_NAME_CHARS),
            entity_type: raw
                .entity_type
                .as_deref()
                .map(EntityType::from_label)
                .unwrap_or(EntityType::Other),
            ticker,
            context: html::truncate_chars(
                raw.context.as_deref().unwrap_or("").trim(),
                self.max_context_chars,
            ),
            sentiment: clamp_score(raw.sentiment, -1.0, 1.0),
            relevance: clamp_score(raw.relevance, 0.0, 1.0),
            metadata: MentionMetadata::V1(MentionMetadataV1 {
                extraction_model: Some(self.model.clone()),
                figures: figures_from(raw.metadata),
            }),
        })
    }
}

fn clamp_score(value: Option<f64>, min: f64, max: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(min, max),
        _ => 0.0_f64.clamp(min, max),
    }
}

/// Flattens a metadata object into label/value figures. Nested values are
/// dropped.
fn figures_from(metadata: Option<serde_json::Value>) -> Vec<Figure> {
    let Some(serde_json::Value::Object(map)) = metadata else {
        return Vec::new();
    };

    map.into_iter()
        .filter_map(|(label, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some(Figure { label, value })
        })
        .collect()
}

/// Locates the first balanced JSON array in `response` that actually parses,
/// ignoring brackets inside string literals. Bracketed prose such as
/// "[see below]" is skipped.
pub fn extract_json_array(response: &str) -> Option<&str> {
    response
        .match_indices('[')
        .filter_map(|(start, _)| balanced_array(response, start))
        .find(|candidate| {
            serde_json::from_str::<serde_json::Value>(candidate).is_ok_and(|v| v.is_array())
        })
}

fn balanced_array(response: &str, start: usize) -> Option<&str> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in response[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&response[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;

    fn extractor(provider: ScriptedProvider) -> EntityExtractor {
        EntityExtractor::new(Arc::new(provider), &EntitiesConfig::default())
    }

    #[test]
    fn test_extract_json_array_skips_prose_and_strings() {
        let response = r#"Sure! Here you go:
[{"name": "Apple [AAPL]", "context": "said \"great\" ]"}, {"name": "Nvidia"}]
Hope that helps [1]."#;
        let json = extract_json_array(response).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["name"], "Apple [AAPL]");
    }

    #[test]
    fn test_extract_json_array_skips_bracketed_prose() {
        let response = r#"Entities [see below]: [{"name": "Apple", "type": "company"}]"#;
        let json = extract_json_array(response).unwrap();
        assert_eq!(json, r#"[{"name": "Apple", "type": "company"}]"#);
    }

    #[tokio::test]
    async fn test_extract_after_bracketed_prose() {
        let answer = r#"Entities [see below]: [{"name": "Apple Inc.", "type": "company", "ticker": "AAPL"}]"#;
        let e = extractor(ScriptedProvider::new().with_default(answer));
        let entities = e.extract("Apple reported results.").await;
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].ticker.as_deref(), Some("AAPL"));
    }

    #[test]
    fn test_extract_json_array_unbalanced() {
        assert!(extract_json_array("[{\"name\": \"x\"}").is_none());
        assert!(extract_json_array("no json here").is_none());
    }

    #[test]
    fn test_parse_clamps_and_truncates() {
        let ex = extractor(ScriptedProvider::new());
        let long_context = "x".repeat(500);
        let response = format!(
            r#"[{{"name": " Tesla, Inc. ", "type": "Company", "ticker": "$tsla", "context": "{}", "sentiment": 3.5, "relevance": -2, "metadata": {{"revenue": "$25B", "growth": 0.12, "nested": {{"a": 1}}}}}}]"#,
            long_context
        );
        let entities = ex.parse_entities(&response).unwrap();
        assert_eq!(entities.len(), 1);
        let tesla = &entities[0];
        assert_eq!(tesla.name, "Tesla, Inc.");
        assert_eq!(tesla.ticker.as_deref(), Some("TSLA"));
        assert_eq!(tesla.context.chars().count(), 200);
        assert_eq!(tesla.sentiment, 1.0);
        assert_eq!(tesla.relevance, 0.0);
        assert_eq!(tesla.metadata.figures().len(), 2);
    }

    #[test]
    fn test_parse_skips_bad_items_and_limits_count() {
        let ex = extractor(ScriptedProvider::new());
        let mut items: Vec<String> = (0..15)
            .map(|i| format!(r#"{{"name": "Company {}", "type": "company"}}"#, i))
            .collect();
        items.insert(0, r#"{"type": "company"}"#.to_string());
        items.insert(1, r#""just a string""#.to_string());
        let response = format!("[{}]", items.join(","));

        let entities = ex.parse_entities(&response).unwrap();
        assert_eq!(entities.len(), 10);
        assert_eq!(entities[0].name, "Company 0");
    }

    #[tokio::test]
    async fn test_extract_fails_soft_on_garbage() {
        let ex = extractor(ScriptedProvider::new().with_response("I could not find anything."));
        assert!(ex.extract("Some text about markets").await.is_empty());
    }

    #[tokio::test]
    async fn test_extract_fails_soft_on_provider_error() {
        let ex = extractor(
            ScriptedProvider::new().with_error(ProviderError::Network("down".to_string())),
        );
        assert!(ex.extract("Some text about markets").await.is_empty());
    }

    #[tokio::test]
    async fn test_extract_sends_bounded_prompt() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_response(r#"[{"name": "Apple", "type": "company", "sentiment": 0.4}]"#),
        );
        let ex = EntityExtractor::new(provider.clone(), &EntitiesConfig::default());
        let entities = ex.extract("Apple beat estimates.").await;

        assert_eq!(entities.len(), 1);
        let requests = provider.requests();
        assert_eq!(requests[0].model, "claude-3-5-haiku-20241022");
        assert!(requests[0].messages[0].content.contains("between 3 and 10"));
    }
}
