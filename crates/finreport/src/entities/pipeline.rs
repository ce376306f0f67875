//! Merges extracted entities into the shared entity graph.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tracing::Instrument;

use super::{EntityExtractor, EntityStats, ExtractedEntity};
use crate::cache::QueryCache;
use crate::config::EntitiesConfig;
use crate::db::entity_repo::{self, NewMention};
use crate::db::{Database, DatabaseError};
use crate::html;
use crate::worker::{BackgroundJob, JobQueue};

/// Cache namespace invalidated after every merge.
pub const ENTITY_CACHE_PATTERN: &str = "entities:*";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    /// Text was below the minimum length; nothing was extracted.
    pub skipped: bool,
    pub extracted: usize,
    pub new_entities: usize,
    pub new_mentions: usize,
    /// Entities already linked to this report.
    pub already_linked: usize,
}

pub struct EntityPipeline {
    db: Database,
    extractor: EntityExtractor,
    cache: QueryCache,
    queue: Option<Arc<JobQueue>>,
    min_text_length: usize,
}

impl EntityPipeline {
    pub fn new(
        db: Database,
        extractor: EntityExtractor,
        cache: QueryCache,
        config: &EntitiesConfig,
    ) -> Self {
        Self {
            db,
            extractor,
            cache,
            queue: None,
            min_text_length: config.min_text_length,
        }
    }

    /// Statistics refreshes go through `queue` instead of running inline.
    pub fn with_queue(mut self, queue: Arc<JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Extracts entities from a report's HTML and links them to the report.
    ///
    /// Safe to re-run: a (entity, report) pair is linked once and counted
    /// once. Extraction failures yield no entities; only durable-store
    /// failures are returned.
    pub async fn process_report(
        &self,
        report_id: &str,
        report_html: &str,
    ) -> Result<ProcessOutcome, DatabaseError> {
        let span = tracing::info_span!("entities", report_id = %report_id);
        self.process(report_id, report_html).instrument(span).await
    }

    async fn process(
        &self,
        report_id: &str,
        report_html: &str,
    ) -> Result<ProcessOutcome, DatabaseError> {
        let text = html::html_to_text(report_html);
        let length = text.chars().count();
        if length < self.min_text_length {
            debug!(
                "Skipping entity extraction for report {}: {} chars of text",
                report_id, length
            );
            return Ok(ProcessOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        let extracted = self.extractor.extract(&text).await;
        let owned_id = report_id.to_string();
        let (outcome, touched) = self
            .db
            .run_blocking(move |db| merge_mentions(db, &owned_id, &extracted))
            .await?;

        if outcome.new_mentions > 0 {
            self.cache.delete_pattern(ENTITY_CACHE_PATTERN);
            self.schedule_refresh(&touched).await;
        }

        info!(
            "Report {}: {} extracted, {} new entities, {} new mentions, {} already linked",
            report_id,
            outcome.extracted,
            outcome.new_entities,
            outcome.new_mentions,
            outcome.already_linked
        );
        Ok(outcome)
    }

    async fn schedule_refresh(&self, entity_ids: &[String]) {
        for entity_id in entity_ids {
            match &self.queue {
                Some(queue) => {
                    let job = BackgroundJob::RefreshEntity {
                        entity_id: entity_id.clone(),
                    };
                    if let Err(e) = queue.submit(job) {
                        warn!("Could not queue stats refresh for entity {}: {}", entity_id, e);
                    }
                }
                None => {
                    if let Err(e) = self.refresh_entity(entity_id).await {
                        warn!("Stats refresh for entity {} failed: {}", entity_id, e);
                    }
                }
            }
        }
    }

    /// Recomputes and stores statistics for one entity. Returns `None` when
    /// the entity no longer exists.
    pub async fn refresh_entity(&self, entity_id: &str) -> Result<Option<EntityStats>, DatabaseError> {
        let owned_id = entity_id.to_string();
        let stats = self
            .db
            .run_blocking(move |db| store_stats(db, &owned_id))
            .await?;
        if let Some(stats) = &stats {
            self.cache.delete_pattern(ENTITY_CACHE_PATTERN);
            debug!(
                "Refreshed stats for entity {}: {} mentions across {} reports",
                entity_id, stats.total_mentions, stats.unique_reports
            );
        }
        Ok(stats)
    }
}

/// Links each distinct entity in `extracted` to the report. Returns the
/// tally and the ids of entities that gained a mention.
fn merge_mentions(
    db: &Database,
    report_id: &str,
    extracted: &[ExtractedEntity],
) -> Result<(ProcessOutcome, Vec<String>), DatabaseError> {
    let mut outcome = ProcessOutcome {
        extracted: extracted.len(),
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut touched: Vec<String> = Vec::new();

    for entity in extracted {
        let slug = html::entity_slug(&entity.name);
        if slug.is_empty() || !seen.insert(slug.clone()) {
            continue;
        }

        let metadata = serde_json::to_string(&entity.metadata)?;
        let result = entity_repo::record_mention(
            db,
            &NewMention {
                slug: &slug,
                name: &entity.name,
                entity_type: entity.entity_type.as_str(),
                ticker: entity.ticker.as_deref(),
                report_id,
                context: &entity.context,
                sentiment: entity.sentiment,
                relevance: entity.relevance,
                metadata: &metadata,
            },
        )?;

        if result.entity_created {
            outcome.new_entities += 1;
        }
        if result.mention_created {
            outcome.new_mentions += 1;
            touched.push(result.entity_id);
        } else {
            outcome.already_linked += 1;
        }
    }

    Ok((outcome, touched))
}

fn store_stats(db: &Database, entity_id: &str) -> Result<Option<EntityStats>, DatabaseError> {
    if entity_repo::find_by_id(db, entity_id)?.is_none() {
        debug!("Entity {} vanished before its stats refresh", entity_id);
        return Ok(None);
    }

    let mentions = entity_repo::mentions_for_entity(db, entity_id)?;
    let stats = EntityStats::compute(entity_id, &mentions);
    entity_repo::save_stats(db, entity_id, &serde_json::to_string(&stats)?)?;
    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::db::report_repo;
    use crate::provider::ScriptedProvider;
    use crate::report::Report;

    const ANSWER: &str = r#"[
        {"name": "Apple Inc.", "type": "company", "ticker": "AAPL", "context": "Apple beat.", "sentiment": 0.6, "relevance": 0.9},
        {"name": "Apple", "type": "stock", "sentiment": 0.2, "relevance": 0.5},
        {"name": "Tim Cook", "type": "person", "sentiment": 0.1, "relevance": 0.4}
    ]"#;

    fn long_html() -> String {
        format!(
            "<div><p>{}</p></div>",
            "Apple reported record services revenue while Tim Cook reiterated guidance. ".repeat(3)
        )
    }

    fn pipeline(db: &Database, provider: ScriptedProvider) -> EntityPipeline {
        let config = EntitiesConfig::default();
        EntityPipeline::new(
            db.clone(),
            EntityExtractor::new(Arc::new(provider), &config),
            QueryCache::new(&CacheConfig::default()),
            &config,
        )
    }

    fn synced_report(db: &Database) -> String {
        let report = Report::new("auth0|u1", "R");
        report_repo::save_snapshot(db, &report).unwrap();
        report.id
    }

    #[tokio::test]
    async fn test_short_text_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        let provider = ScriptedProvider::new().with_default(ANSWER);
        let p = pipeline(&db, provider);
        let report_id = synced_report(&db);

        let outcome = p.process_report(&report_id, "<p>Too short</p>").await.unwrap();
        assert!(outcome.skipped);
        assert!(entity_repo::find_by_slug(&db, "apple").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aliases_merge_into_one_entity() {
        let db = Database::open_in_memory().unwrap();
        let p = pipeline(&db, ScriptedProvider::new().with_default(ANSWER));
        let report_id = synced_report(&db);

        let outcome = p.process_report(&report_id, &long_html()).await.unwrap();
        assert_eq!(outcome.extracted, 3);
        assert_eq!(outcome.new_entities, 2);
        assert_eq!(outcome.new_mentions, 2);

        let apple = entity_repo::find_by_slug(&db, "apple").unwrap().unwrap();
        assert_eq!(apple.mention_count, 1);
        assert_eq!(apple.name, "Apple Inc.");
        assert_eq!(apple.ticker.as_deref(), Some("AAPL"));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let p = pipeline(&db, ScriptedProvider::new().with_default(ANSWER));
        let report_id = synced_report(&db);

        p.process_report(&report_id, &long_html()).await.unwrap();
        let second = p.process_report(&report_id, &long_html()).await.unwrap();

        assert_eq!(second.new_mentions, 0);
        assert_eq!(second.already_linked, 2);
        let apple = entity_repo::find_by_slug(&db, "apple").unwrap().unwrap();
        assert_eq!(apple.mention_count, 1);
        assert_eq!(entity_repo::mentions_for_report(&db, &report_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_inline_refresh_stores_stats() {
        let db = Database::open_in_memory().unwrap();
        let p = pipeline(&db, ScriptedProvider::new().with_default(ANSWER));
        let report_id = synced_report(&db);

        p.process_report(&report_id, &long_html()).await.unwrap();
        let apple = entity_repo::find_by_slug(&db, "apple").unwrap().unwrap();
        let stats: EntityStats =
            serde_json::from_str(&entity_repo::load_stats(&db, &apple.id).unwrap().unwrap()).unwrap();
        assert_eq!(stats.total_mentions, 1);
        assert_eq!(stats.sentiment.positive, 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_yields_empty_outcome() {
        let db = Database::open_in_memory().unwrap();
        let p = pipeline(&db, ScriptedProvider::new().with_default("not json"));
        let report_id = synced_report(&db);

        let outcome = p.process_report(&report_id, &long_html()).await.unwrap();
        assert!(!outcome.skipped);
        assert_eq!(outcome.extracted, 0);
    }

    #[tokio::test]
    async fn test_unsynced_report_is_a_store_error() {
        let db = Database::open_in_memory().unwrap();
        let p = pipeline(&db, ScriptedProvider::new().with_default(ANSWER));
        let result = p.process_report("never-synced", &long_html()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_refresh_missing_entity() {
        let db = Database::open_in_memory().unwrap();
        let p = pipeline(&db, ScriptedProvider::new());
        assert!(p.refresh_entity("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_busy_store_does_not_stall_the_runtime() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let db = Database::open_in_memory().unwrap();
        let p = pipeline(&db, ScriptedProvider::new().with_default(ANSWER));
        let report_id = synced_report(&db);

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = {
            let db = db.clone();
            std::thread::spawn(move || {
                db.with_conn(|_| {
                    let _ = locked_tx.send(());
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(())
                })
                .unwrap();
            })
        };
        locked_rx.recv().unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let outcome = p.process_report(&report_id, &long_html()).await.unwrap();
        ticker.abort();
        holder.join().unwrap();

        assert_eq!(outcome.new_mentions, 2);
        // single-threaded runtime: the ticker only advances if the merge waited off-thread
        assert!(ticks.load(Ordering::Relaxed) >= 3);
    }
}
