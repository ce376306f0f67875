//! Entity repository: the shared, slug-deduplicated entity graph.
//!
//! Counter and timestamp changes are single SQL statements
//! (`mention_count = mention_count + 1`, `COALESCE(first_mentioned, ?)`) so
//! concurrent extractions never lose an update.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRow {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub entity_type: String,
    pub ticker: Option<String>,
    pub mention_count: u64,
    pub first_mentioned: Option<String>,
    pub last_mentioned: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl EntityRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            slug: row.get("slug")?,
            entity_type: row.get("entity_type")?,
            ticker: row.get("ticker")?,
            mention_count: row.get::<_, i64>("mention_count")? as u64,
            first_mentioned: row.get("first_mentioned")?,
            last_mentioned: row.get("last_mentioned")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionRow {
    pub id: String,
    pub entity_id: String,
    pub report_id: String,
    pub context: String,
    pub sentiment: f64,
    pub relevance: f64,
    /// JSON-encoded `MentionMetadata`.
    pub metadata: String,
    pub created_at: String,
}

impl MentionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            entity_id: row.get("entity_id")?,
            report_id: row.get("report_id")?,
            context: row.get("context")?,
            sentiment: row.get("sentiment")?,
            relevance: row.get("relevance")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// One entity occurrence to merge into the graph.
#[derive(Debug, Clone)]
pub struct NewMention<'a> {
    pub slug: &'a str,
    pub name: &'a str,
    pub entity_type: &'a str,
    pub ticker: Option<&'a str>,
    pub report_id: &'a str,
    pub context: &'a str,
    pub sentiment: f64,
    pub relevance: f64,
    pub metadata: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionOutcome {
    pub entity_id: String,
    pub entity_created: bool,
    /// False when the (entity, report) pair was already recorded.
    pub mention_created: bool,
}

/// Upserts the entity by slug and records the mention if the
/// (entity, report) pair is new. The counter moves only when a mention row
/// is actually inserted.
pub fn record_mention(db: &Database, mention: &NewMention<'_>) -> Result<MentionOutcome, DatabaseError> {
    db.with_transaction(|tx| {
        let now = now_rfc3339();

        let entity_created = tx.execute(
            "INSERT INTO entities (id, name, slug, entity_type, ticker, mention_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
             ON CONFLICT(slug) DO NOTHING",
            params![
                uuid::Uuid::new_v4().to_string(),
                mention.name,
                mention.slug,
                mention.entity_type,
                mention.ticker,
                now
            ],
        )? == 1;

        if !entity_created && mention.ticker.is_some() {
            tx.execute(
                "UPDATE entities SET ticker = ?1 WHERE slug = ?2 AND ticker IS NULL",
                params![mention.ticker, mention.slug],
            )?;
        }

        let entity_id: String = tx.query_row(
            "SELECT id FROM entities WHERE slug = ?1",
            params![mention.slug],
            |r| r.get(0),
        )?;

        let mention_created = tx.execute(
            "INSERT INTO entity_mentions (id, entity_id, report_id, context, sentiment, relevance, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(entity_id, report_id) DO NOTHING",
            params![
                uuid::Uuid::new_v4().to_string(),
                entity_id,
                mention.report_id,
                mention.context,
                mention.sentiment,
                mention.relevance,
                mention.metadata,
                now
            ],
        )? == 1;

        if mention_created {
            tx.execute(
                "UPDATE entities SET
                   mention_count = mention_count + 1,
                   last_mentioned = ?1,
                   first_mentioned = COALESCE(first_mentioned, ?1),
                   updated_at = ?1
                 WHERE id = ?2",
                params![now, entity_id],
            )?;
        }

        Ok(MentionOutcome {
            entity_id,
            entity_created,
            mention_created,
        })
    })
}

pub fn find_by_slug(db: &Database, slug: &str) -> Result<Option<EntityRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM entities WHERE slug = ?1",
                params![slug],
                EntityRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<EntityRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM entities WHERE id = ?1",
                params![id],
                EntityRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntitySort {
    #[default]
    Mentions,
    Recent,
    Name,
}

/// Query filter parameters for entity listing.
#[derive(Debug, Default, Clone)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    /// Case-insensitive substring over name, slug and ticker.
    pub search: Option<String>,
    pub sort: EntitySort,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Lists entities matching `filter`. Returns the page and the total match
/// count.
pub fn list(db: &Database, filter: &EntityFilter) -> Result<(Vec<EntityRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref entity_type) = filter.entity_type {
            conditions.push(format!("entity_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(entity_type.clone()));
        }
        if let Some(ref search) = filter.search {
            let n = param_values.len() + 1;
            conditions.push(format!(
                "(name LIKE ?{n} OR slug LIKE ?{n} OR IFNULL(ticker, '') LIKE ?{n})"
            ));
            param_values.push(Box::new(format!("%{}%", search)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM entities {}", where_clause),
            params_ref.as_slice(),
            |r| r.get(0),
        )?;

        let order_by = match filter.sort {
            EntitySort::Mentions => "mention_count DESC, name ASC",
            EntitySort::Recent => "last_mentioned DESC, name ASC",
            EntitySort::Name => "name ASC",
        };
        let sql = format!(
            "SELECT * FROM entities {} ORDER BY {} LIMIT {} OFFSET {}",
            where_clause,
            order_by,
            filter.limit.unwrap_or(50),
            filter.offset.unwrap_or(0)
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), EntityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total as u64))
    })
}

pub fn mentions_for_entity(db: &Database, entity_id: &str) -> Result<Vec<MentionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM entity_mentions WHERE entity_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![entity_id], MentionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn mentions_for_report(db: &Database, report_id: &str) -> Result<Vec<MentionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM entity_mentions WHERE report_id = ?1 ORDER BY relevance DESC",
        )?;
        let rows = stmt
            .query_map(params![report_id], MentionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// An entity seen in one user's reports, with per-user aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntityRow {
    #[serde(flatten)]
    pub entity: EntityRow,
    pub report_count: u64,
    pub avg_sentiment: f64,
    pub last_seen: String,
}

/// Entities mentioned across all reports owned by `external_user_id`,
/// most-mentioned first.
pub fn for_user(db: &Database, external_user_id: &str) -> Result<Vec<UserEntityRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT e.*,
                    COUNT(DISTINCT m.report_id) AS report_count,
                    AVG(m.sentiment) AS avg_sentiment,
                    MAX(m.created_at) AS last_seen
             FROM entities e
             JOIN entity_mentions m ON m.entity_id = e.id
             JOIN reports r ON r.id = m.report_id
             JOIN users u ON u.id = r.user_id
             WHERE u.external_id = ?1
             GROUP BY e.id
             ORDER BY report_count DESC, e.name ASC",
        )?;
        let rows = stmt
            .query_map(params![external_user_id], |row| {
                Ok(UserEntityRow {
                    entity: EntityRow::from_row(row)?,
                    report_count: row.get::<_, i64>("report_count")? as u64,
                    avg_sentiment: row.get("avg_sentiment")?,
                    last_seen: row.get("last_seen")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Stores the derived statistics blob for an entity, replacing any previous one.
pub fn save_stats(db: &Database, entity_id: &str, stats_json: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO entity_stats (entity_id, stats, refreshed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_id) DO UPDATE SET stats = excluded.stats, refreshed_at = excluded.refreshed_at",
            params![entity_id, stats_json, now_rfc3339()],
        )?;
        Ok(())
    })
}

pub fn load_stats(db: &Database, entity_id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let stats = conn
            .query_row(
                "SELECT stats FROM entity_stats WHERE entity_id = ?1",
                params![entity_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(stats)
    })
}
