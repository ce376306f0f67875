pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod generation;
pub mod html;
pub mod live;
pub mod provider;
pub mod report;
pub mod sections;
pub mod sync;
pub mod telemetry;
pub mod usage;
pub mod worker;

pub use cache::QueryCache;
pub use config::{load_config, load_config_from_str, EngineConfig};
pub use db::{Database, DatabaseError};
pub use engine::{Engine, EngineParts};
pub use entities::{EntityPipeline, EntityQueries};
pub use error::{ApiError, ConfigError, FinreportError, JobError, Result, StoreError};
pub use generation::{GenerationEvent, GenerationHandle, GenerationRequest, ReportGenerator};
pub use live::{DocumentStore, MemoryDocumentStore};
pub use provider::{CompletionProvider, ProviderError, ScriptedProvider};
pub use report::{Report, Section};
pub use sections::SectionService;
pub use sync::{Reconciler, SyncState};
pub use telemetry::init_tracing;
pub use worker::{BackgroundJob, JobQueue};
