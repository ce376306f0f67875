//! Section CRUD over the live store.
//!
//! Every operation checks existence and ownership first, then applies its
//! change to a private copy of the report inside one atomic
//! [`DocumentStore::modify_report`](crate::live::DocumentStore::modify_report)
//! call. Successful changes queue a durable sync.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::report::SectionType;

pub mod service;

pub use service::SectionService;

pub const MAX_TITLE_CHARS: usize = 200;

/// Payload for creating a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    pub report_id: String,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    /// Defaults to the first heading in `content`.
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    /// Inserts at this position when it is inside the current range;
    /// appends otherwise.
    #[serde(default)]
    pub order: Option<u32>,
}

/// Partial update of a section. Only a content change bumps the version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionPatch {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Instruction that produced the new content, kept in edit history.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl SectionPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

fn validate_title(title: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::Validation(format!(
            "title is longer than {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::Validation("content must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_section_json_shape() {
        let json = r#"{"reportId":"r1","type":"chart","content":"<div></div>","order":2}"#;
        let parsed: NewSection = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.section_type, SectionType::Chart);
        assert_eq!(parsed.order, Some(2));
        assert!(parsed.title.is_none());
    }

    #[test]
    fn test_validation() {
        assert!(validate_title("Revenue").is_ok());
        assert!(validate_title("  ").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_CHARS + 1)).is_err());
        assert!(validate_content("<p>x</p>").is_ok());
        assert_eq!(validate_content("\n").unwrap_err().status_code(), 400);
    }
}
