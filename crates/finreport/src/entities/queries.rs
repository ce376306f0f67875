//! Cached read side of the entity graph.
//!
//! Every key lives under `entities:` so a single pattern delete after a
//! merge or stats refresh drops all of them.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{EntityStats, MentionMetadata};
use crate::cache::QueryCache;
use crate::db::entity_repo::{self, EntityFilter, EntityRow, MentionRow, UserEntityRow};
use crate::db::{Database, DatabaseError};
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPage {
    pub entities: Vec<EntityRow>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDetail {
    pub entity: EntityRow,
    /// `None` until the first background refresh has run.
    pub stats: Option<EntityStats>,
    pub mentions: Vec<MentionRow>,
}

/// An entity as it appears in one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntity {
    pub entity: EntityRow,
    pub context: String,
    pub sentiment: f64,
    pub relevance: f64,
    pub metadata: MentionMetadata,
}

#[derive(Clone)]
pub struct EntityQueries {
    db: Database,
    cache: QueryCache,
}

impl EntityQueries {
    pub fn new(db: Database, cache: QueryCache) -> Self {
        Self { db, cache }
    }

    pub fn list_entities(&self, filter: &EntityFilter) -> Result<EntityPage, ApiError> {
        let key = format!(
            "entities:list:{}:{}:{:?}:{}:{}",
            filter.entity_type.as_deref().unwrap_or("*"),
            filter.search.as_deref().unwrap_or(""),
            filter.sort,
            filter.limit.unwrap_or(0),
            filter.offset.unwrap_or(0)
        );
        self.cached(&key, || {
            let (entities, total) = entity_repo::list(&self.db, filter)?;
            Ok(EntityPage { entities, total })
        })
    }

    pub fn get_entity(&self, slug: &str) -> Result<EntityDetail, ApiError> {
        let key = format!("entities:entity:{}", slug);
        if let Some(hit) = self.cache.get_as::<EntityDetail>(&key) {
            return Ok(hit);
        }

        let entity = entity_repo::find_by_slug(&self.db, slug)?
            .ok_or_else(|| ApiError::NotFound(format!("entity {}", slug)))?;
        let stats = match entity_repo::load_stats(&self.db, &entity.id)? {
            Some(json) => match serde_json::from_str::<EntityStats>(&json) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!("Ignoring unreadable stats for entity {}: {}", entity.id, e);
                    None
                }
            },
            None => None,
        };
        let mentions = entity_repo::mentions_for_entity(&self.db, &entity.id)?;

        let detail = EntityDetail {
            entity,
            stats,
            mentions,
        };
        self.cache.set_as(&key, &detail);
        Ok(detail)
    }

    /// Entities linked to a report, most relevant first.
    pub fn report_entities(&self, report_id: &str) -> Result<Vec<ReportEntity>, ApiError> {
        let key = format!("entities:report:{}", report_id);
        self.cached(&key, || {
            let mut linked = Vec::new();
            for mention in entity_repo::mentions_for_report(&self.db, report_id)? {
                let Some(entity) = entity_repo::find_by_id(&self.db, &mention.entity_id)? else {
                    continue;
                };
                let metadata = serde_json::from_str(&mention.metadata).unwrap_or_default();
                linked.push(ReportEntity {
                    entity,
                    context: mention.context,
                    sentiment: mention.sentiment,
                    relevance: mention.relevance,
                    metadata,
                });
            }
            linked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
            Ok(linked)
        })
    }

    /// Entities across every report owned by `user_id`.
    pub fn user_entities(&self, user_id: &str) -> Result<Vec<UserEntityRow>, ApiError> {
        let key = format!("entities:user:{}", user_id);
        self.cached(&key, || Ok(entity_repo::for_user(&self.db, user_id)?))
    }

    fn cached<T, F>(&self, key: &str, load: F) -> Result<T, ApiError>
    where
        T: Serialize + for<'de> Deserialize<'de>,
        F: FnOnce() -> Result<T, DatabaseError>,
    {
        if let Some(hit) = self.cache.get_as::<T>(key) {
            debug!("Cache hit: {}", key);
            return Ok(hit);
        }
        let value = load()?;
        self.cache.set_as(key, &value);
        Ok(value)
    }
}
