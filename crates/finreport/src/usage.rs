//! Cost/usage ledger: maps (model, input tokens, output tokens) to a cost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-million-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Prices keyed by model-id prefix. First matching prefix wins, so more
/// specific prefixes come first.
const PRICING: &[(&str, ModelPricing)] = &[
    (
        "claude-3-5-haiku",
        ModelPricing {
            input_per_million: 0.80,
            output_per_million: 4.00,
        },
    ),
    (
        "claude-3-haiku",
        ModelPricing {
            input_per_million: 0.25,
            output_per_million: 1.25,
        },
    ),
    (
        "claude-3-opus",
        ModelPricing {
            input_per_million: 15.00,
            output_per_million: 75.00,
        },
    ),
    (
        "claude-opus-4",
        ModelPricing {
            input_per_million: 15.00,
            output_per_million: 75.00,
        },
    ),
    (
        "claude-3-5-sonnet",
        ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
        },
    ),
    (
        "claude-3-7-sonnet",
        ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
        },
    ),
    (
        "claude-sonnet-4",
        ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
        },
    ),
    (
        "gpt-4o-mini",
        ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
    ),
    (
        "gpt-4o",
        ModelPricing {
            input_per_million: 2.50,
            output_per_million: 10.00,
        },
    ),
];

/// Used for models missing from the table.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input_per_million: 3.00,
    output_per_million: 15.00,
};

pub fn pricing_for(model: &str) -> ModelPricing {
    let model = model.to_ascii_lowercase();
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

/// Cost in USD for one call.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let pricing = pricing_for(model);
    (input_tokens as f64 * pricing.input_per_million
        + output_tokens as f64 * pricing.output_per_million)
        / 1_000_000.0
}

/// Rough token estimate for providers that don't report usage: ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One ledger line appended to a report's operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    /// True when token counts were estimated rather than reported.
    #[serde(default)]
    pub estimated: bool,
    pub recorded_at: DateTime<Utc>,
}

impl UsageEntry {
    pub fn new(model: &str, usage: TokenUsage, estimated: bool) -> Self {
        Self {
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: calculate_cost(model, usage.input_tokens, usage.output_tokens),
            estimated,
            recorded_at: Utc::now(),
        }
    }
}
