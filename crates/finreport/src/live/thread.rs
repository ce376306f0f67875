//! Conversation threads that generations belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub report_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The prompt/answer pair one generation adds to its thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub prompt: String,
    pub summary: String,
}

impl Exchange {
    pub fn new(prompt: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub messages: Vec<ThreadMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(user_id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Records one prompt/answer exchange that produced `report_id`.
    pub fn record_exchange(&mut self, prompt: &str, summary: &str, report_id: &str) {
        let now = Utc::now();
        self.messages.push(ThreadMessage {
            role: MessageRole::User,
            content: prompt.to_string(),
            report_id: None,
            created_at: now,
        });
        self.messages.push(ThreadMessage {
            role: MessageRole::Assistant,
            content: summary.to_string(),
            report_id: Some(report_id.to_string()),
            created_at: now,
        });
        self.updated_at = now;
    }
}
