//! Entity extraction and aggregation.
//!
//! Plain text goes to the extraction model, the answer is parsed
//! defensively, and every entity is merged into the shared graph keyed by
//! slug. Derived statistics are refreshed in the background.

use serde::{Deserialize, Serialize};

pub mod extractor;
pub mod pipeline;
pub mod queries;
pub mod stats;

pub use extractor::{EntityExtractor, ExtractionError};
pub use pipeline::{EntityPipeline, ProcessOutcome};
pub use queries::{EntityDetail, EntityPage, EntityQueries, ReportEntity};
pub use stats::EntityStats;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Company,
    Stock,
    Person,
    Sector,
    Crypto,
    Commodity,
    Index,
    Etf,
    Currency,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "company",
            EntityType::Stock => "stock",
            EntityType::Person => "person",
            EntityType::Sector => "sector",
            EntityType::Crypto => "crypto",
            EntityType::Commodity => "commodity",
            EntityType::Index => "index",
            EntityType::Etf => "etf",
            EntityType::Currency => "currency",
            EntityType::Other => "other",
        }
    }

    /// Lenient parse of model output. Unknown labels become `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "company" | "corporation" | "organization" | "organisation" | "bank" => {
                EntityType::Company
            }
            "stock" | "equity" | "ticker" | "share" => EntityType::Stock,
            "person" | "executive" | "people" => EntityType::Person,
            "sector" | "industry" => EntityType::Sector,
            "crypto" | "cryptocurrency" | "token" => EntityType::Crypto,
            "commodity" => EntityType::Commodity,
            "index" | "indice" => EntityType::Index,
            "etf" | "fund" => EntityType::Etf,
            "currency" | "fx" => EntityType::Currency,
            _ => EntityType::Other,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A figure the model attached to a mention, e.g. `revenue = "$35.1B"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub label: String,
    pub value: String,
}

/// Versioned metadata stored with each mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "lowercase")]
pub enum MentionMetadata {
    V1(MentionMetadataV1),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionMetadataV1 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_model: Option<String>,
    #[serde(default)]
    pub figures: Vec<Figure>,
}

impl Default for MentionMetadata {
    fn default() -> Self {
        MentionMetadata::V1(MentionMetadataV1::default())
    }
}

impl MentionMetadata {
    pub fn figures(&self) -> &[Figure] {
        match self {
            MentionMetadata::V1(v1) => &v1.figures,
        }
    }
}

/// One validated entity from an extraction answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub ticker: Option<String>,
    pub context: String,
    /// Clamped to [-1, 1].
    pub sentiment: f64,
    /// Clamped to [0, 1].
    pub relevance: f64,
    pub metadata: MentionMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_labels() {
        assert_eq!(EntityType::from_label("Company"), EntityType::Company);
        assert_eq!(EntityType::from_label(" cryptocurrency "), EntityType::Crypto);
        assert_eq!(EntityType::from_label("ETF"), EntityType::Etf);
        assert_eq!(EntityType::from_label("planet"), EntityType::Other);
    }

    #[test]
    fn test_metadata_is_schema_tagged() {
        let metadata = MentionMetadata::V1(MentionMetadataV1 {
            extraction_model: Some("m".to_string()),
            figures: vec![Figure {
                label: "revenue".to_string(),
                value: "$35.1B".to_string(),
            }],
        });
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["schema"], "v1");
        assert_eq!(json["figures"][0]["label"], "revenue");

        let back: MentionMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back.figures().len(), 1);
    }
}
