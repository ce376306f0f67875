//! Wires every component from one [`EngineConfig`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::cache::QueryCache;
use crate::config::{load_config, EngineConfig};
use crate::db::Database;
use crate::entities::{EntityExtractor, EntityPipeline, EntityQueries};
use crate::error::{JobError, Result};
use crate::generation::ReportGenerator;
use crate::live::{DocumentStore, MemoryDocumentStore};
use crate::provider::{build_provider, CompletionProvider};
use crate::sections::SectionService;
use crate::sync::Reconciler;
use crate::worker::{BackgroundJob, JobHandler, JobQueue};

/// Externally built collaborators.
pub struct EngineParts {
    pub config: EngineConfig,
    pub provider: Arc<dyn CompletionProvider>,
    pub live: Arc<dyn DocumentStore>,
    pub db: Database,
}

pub struct Engine {
    config: EngineConfig,
    live: Arc<dyn DocumentStore>,
    db: Database,
    queue: Arc<JobQueue>,
    generator: ReportGenerator,
    sections: SectionService,
    pipeline: Arc<EntityPipeline>,
    reconciler: Arc<Reconciler>,
    queries: EntityQueries,
}

impl Engine {
    /// Loads the config file and builds the engine. Must run inside a tokio
    /// runtime.
    pub fn from_config_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_config(load_config(path)?)
    }

    /// Opens the configured database and provider with an in-process live
    /// store. Must run inside a tokio runtime.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let db = Database::open_configured(config.database.path.as_deref())?;
        let provider = build_provider(&config.provider)?;
        Ok(Self::new(EngineParts {
            config,
            provider,
            live: Arc::new(MemoryDocumentStore::new()),
            db,
        }))
    }

    /// Builds every component and starts the background workers.
    pub fn new(parts: EngineParts) -> Self {
        let EngineParts {
            config,
            provider,
            live,
            db,
        } = parts;

        let queue = Arc::new(JobQueue::new(&config.queue));
        let cache = QueryCache::new(&config.cache);

        let extractor = EntityExtractor::new(Arc::clone(&provider), &config.entities);
        let pipeline = Arc::new(
            EntityPipeline::new(db.clone(), extractor, cache.clone(), &config.entities)
                .with_queue(Arc::clone(&queue)),
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&live),
            db.clone(),
            Arc::clone(&pipeline),
        ));

        queue.start(Arc::new(JobDispatcher {
            reconciler: Arc::clone(&reconciler),
            pipeline: Arc::clone(&pipeline),
        }));

        let generator = ReportGenerator::new(
            provider,
            Arc::clone(&live),
            Arc::clone(&queue),
            &config.provider,
            &config.generation,
        );
        let sections = SectionService::new(Arc::clone(&live), db.clone(), Arc::clone(&queue));
        let queries = EntityQueries::new(db.clone(), cache);

        info!(
            "Engine ready: {} workers, provider {:?}",
            config.queue.workers, config.provider.kind
        );

        Self {
            config,
            live,
            db,
            queue,
            generator,
            sections,
            pipeline,
            reconciler,
            queries,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn live(&self) -> &Arc<dyn DocumentStore> {
        &self.live
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn generator(&self) -> &ReportGenerator {
        &self.generator
    }

    pub fn sections(&self) -> &SectionService {
        &self.sections
    }

    pub fn pipeline(&self) -> &Arc<EntityPipeline> {
        &self.pipeline
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn entities(&self) -> &EntityQueries {
        &self.queries
    }

    /// Stops the background workers. Queued jobs are dropped; the next
    /// `reconcile_all` picks up any report left unsynced.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

/// Routes background jobs to the component that owns them.
struct JobDispatcher {
    reconciler: Arc<Reconciler>,
    pipeline: Arc<EntityPipeline>,
}

#[async_trait]
impl JobHandler for JobDispatcher {
    async fn handle(&self, job: &BackgroundJob) -> std::result::Result<(), JobError> {
        match job {
            BackgroundJob::SyncReport { report_id } => {
                self.reconciler.sync_report(report_id).await?;
            }
            BackgroundJob::RefreshEntity { entity_id } => {
                self.pipeline.refresh_entity(entity_id).await?;
            }
        }
        Ok(())
    }
}
