//! Outbound generation events and their server-sent-events framing.

use serde::{Deserialize, Serialize};

use crate::report::{Insight, Section};

/// Data line that terminates every event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One step of a generation, in emission order: `start`, any number of
/// `content`, then exactly one of `complete` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationEvent {
    Start,
    Content {
        text: String,
    },
    Complete {
        #[serde(rename = "reportId")]
        report_id: String,
        sections: Vec<Section>,
        insights: Vec<Insight>,
    },
    Error {
        message: String,
    },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationEvent::Complete { .. } | GenerationEvent::Error { .. })
    }

    /// `data: <json>\n\n`
    pub fn to_sse(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {}\n\n", json),
            Err(e) => {
                log::error!("Failed to encode generation event: {}", e);
                String::new()
            }
        }
    }

    pub fn sse_done() -> String {
        format!("data: {}\n\n", DONE_SENTINEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(GenerationEvent::Content {
            text: "<h1>".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["text"], "<h1>");

        let json = serde_json::to_value(GenerationEvent::Complete {
            report_id: "r1".to_string(),
            sections: vec![],
            insights: vec![],
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["reportId"], "r1");
    }

    #[test]
    fn test_sse_framing() {
        assert_eq!(GenerationEvent::Start.to_sse(), "data: {\"type\":\"start\"}\n\n");
        assert_eq!(GenerationEvent::sse_done(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_terminal_events() {
        assert!(!GenerationEvent::Start.is_terminal());
        assert!(GenerationEvent::Error {
            message: "x".to_string()
        }
        .is_terminal());
    }
}
