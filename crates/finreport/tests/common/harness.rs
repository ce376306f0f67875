//! Test harness for isolated engine execution.
//!
//! Each harness owns a temp directory holding its SQLite database, an
//! in-memory live store and a scripted provider shared by generation and
//! entity extraction.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use finreport::config::EngineConfig;
use finreport::db::Database;
use finreport::generation::{GenerationEvent, GenerationOutcome, GenerationRequest, ReportGenerator};
use finreport::live::{DocumentStore, MemoryDocumentStore};
use finreport::provider::ScriptedProvider;
use finreport::{Engine, EngineParts};

use super::builders::ConfigBuilder;

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: EngineConfig,
    pub engine: Engine,
    pub provider: Arc<ScriptedProvider>,
    pub live: Arc<MemoryDocumentStore>,
    pub db: Database,
}

impl TestHarness {
    /// Must be created inside a tokio runtime.
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, ConfigBuilder::new())
    }

    pub fn with_config(provider: ScriptedProvider, builder: ConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("finreport.db");
        let config = builder
            .database_path(db_path.to_str().expect("utf-8 temp path"))
            .build();

        let db = Database::open(&db_path).expect("Failed to open database");
        let provider = Arc::new(provider);
        let live = Arc::new(MemoryDocumentStore::new());

        let engine = Engine::new(EngineParts {
            config: config.clone(),
            provider: provider.clone(),
            live: live.clone(),
            db: db.clone(),
        });

        Self {
            temp_dir,
            config,
            engine,
            provider,
            live,
            db,
        }
    }

    /// Runs one generation to the end and returns its events and outcome.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> (Vec<GenerationEvent>, GenerationOutcome) {
        let handle = self
            .engine
            .generator()
            .generate(request)
            .await
            .expect("generation request rejected");
        handle.collect().await
    }

    /// A generator over the same collaborators with custom timeouts.
    pub fn generator_with_timeouts(&self, request: Duration, idle: Duration) -> ReportGenerator {
        ReportGenerator::new(
            self.provider.clone(),
            self.live.clone(),
            self.engine.queue().clone(),
            &self.config.provider,
            &self.config.generation,
        )
        .with_timeouts(request, idle)
    }

    /// Waits for every queued background job to finish.
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.engine.queue().wait_idle())
            .await
            .expect("background jobs did not settle");
    }

    pub async fn live_report_count(&self) -> usize {
        self.live.report_count().await
    }

    pub fn durable_report_count(&self) -> i64 {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM reports", [], |r| r.get(0))?))
            .expect("count reports")
    }

    pub fn durable_section_count(&self) -> i64 {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sections", [], |r| r.get(0))?))
            .expect("count sections")
    }

    pub async fn report(&self, report_id: &str) -> finreport::Report {
        self.live
            .get_report(report_id)
            .await
            .expect("live store read")
            .expect("report exists")
    }
}
