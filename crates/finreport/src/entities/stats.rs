//! Derived per-entity statistics, recomputed from all mention rows.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entity_repo::MentionRow;

/// Sentiment above this is positive, below its negation negative.
const SENTIMENT_BAND: f64 = 0.2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentDistribution {
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
    pub entity_id: String,
    pub total_mentions: u64,
    pub unique_reports: u64,
    pub sentiment: SentimentDistribution,
    pub average_relevance: f64,
    /// `YYYY-MM` → mentions created that month.
    pub mentions_by_month: BTreeMap<String, u64>,
    pub refreshed_at: DateTime<Utc>,
}

impl EntityStats {
    pub fn compute(entity_id: &str, mentions: &[MentionRow]) -> Self {
        let mut sentiment = SentimentDistribution::default();
        let mut by_month: BTreeMap<String, u64> = BTreeMap::new();
        let mut reports: HashSet<&str> = HashSet::new();
        let mut sentiment_sum = 0.0;
        let mut relevance_sum = 0.0;

        for mention in mentions {
            reports.insert(mention.report_id.as_str());
            sentiment_sum += mention.sentiment;
            relevance_sum += mention.relevance;

            if mention.sentiment > SENTIMENT_BAND {
                sentiment.positive += 1;
            } else if mention.sentiment < -SENTIMENT_BAND {
                sentiment.negative += 1;
            } else {
                sentiment.neutral += 1;
            }

            if let Some(month) = month_of(&mention.created_at) {
                *by_month.entry(month).or_insert(0) += 1;
            }
        }

        let count = mentions.len() as f64;
        if !mentions.is_empty() {
            sentiment.average = sentiment_sum / count;
        }

        Self {
            entity_id: entity_id.to_string(),
            total_mentions: mentions.len() as u64,
            unique_reports: reports.len() as u64,
            sentiment,
            average_relevance: if mentions.is_empty() {
                0.0
            } else {
                relevance_sum / count
            },
            mentions_by_month: by_month,
            refreshed_at: Utc::now(),
        }
    }
}

fn month_of(timestamp: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format("%Y-%m").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention(report: &str, sentiment: f64, created_at: &str) -> MentionRow {
        MentionRow {
            id: uuid::Uuid::new_v4().to_string(),
            entity_id: "e1".to_string(),
            report_id: report.to_string(),
            context: String::new(),
            sentiment,
            relevance: 0.5,
            metadata: "{}".to_string(),
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_compute_distribution_and_months() {
        let mentions = vec![
            mention("r1", 0.8, "2026-01-15T10:00:00+00:00"),
            mention("r2", -0.6, "2026-01-20T10:00:00+00:00"),
            mention("r3", 0.1, "2026-02-01T00:00:00+00:00"),
        ];
        let stats = EntityStats::compute("e1", &mentions);

        assert_eq!(stats.total_mentions, 3);
        assert_eq!(stats.unique_reports, 3);
        assert_eq!(stats.sentiment.positive, 1);
        assert_eq!(stats.sentiment.negative, 1);
        assert_eq!(stats.sentiment.neutral, 1);
        assert!((stats.sentiment.average - 0.1).abs() < 1e-9);
        assert_eq!(stats.mentions_by_month.get("2026-01"), Some(&2));
        assert_eq!(stats.mentions_by_month.get("2026-02"), Some(&1));
    }

    #[test]
    fn test_compute_empty() {
        let stats = EntityStats::compute("e1", &[]);
        assert_eq!(stats.total_mentions, 0);
        assert_eq!(stats.sentiment.average, 0.0);
        assert_eq!(stats.average_relevance, 0.0);
    }

    #[test]
    fn test_unparseable_timestamp_is_not_bucketed() {
        let stats = EntityStats::compute("e1", &[mention("r1", 0.0, "yesterday")]);
        assert!(stats.mentions_by_month.is_empty());
        assert_eq!(stats.total_mentions, 1);
    }
}
