use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::db::report_repo::{self, SaveOutcome};
use crate::db::{Database, DatabaseError};
use crate::entities::EntityPipeline;
use crate::error::JobError;
use crate::live::DocumentStore;

/// Durable presence of a report. `syncing` is not observable: a sync is
/// synchronous up to the upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncState {
    Absent,
    Synced { version: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// Durable copy now matches live `version`.
    Synced { version: u64, sections: usize },
    /// A newer snapshot was already stored; nothing written.
    Stale { durable_version: u64 },
    /// The report no longer exists in the live store.
    Missing,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub examined: usize,
    pub synced: usize,
    pub failed: usize,
    /// Another pass was already running.
    pub skipped: bool,
}

pub struct Reconciler {
    live: Arc<dyn DocumentStore>,
    db: Database,
    pipeline: Arc<EntityPipeline>,
    reconcile_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(live: Arc<dyn DocumentStore>, db: Database, pipeline: Arc<EntityPipeline>) -> Self {
        Self {
            live,
            db,
            pipeline,
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Copies the live report into the durable store, creating a placeholder
    /// owner when needed, then runs entity processing.
    ///
    /// Durable failures are returned (transient ones are retried by the work
    /// queue); the live report is never touched. Entity processing failures
    /// are logged and contained.
    pub async fn sync_report(&self, report_id: &str) -> Result<SyncOutcome, JobError> {
        let span = tracing::info_span!("sync", report_id = %report_id);
        self.sync(report_id).instrument(span).await
    }

    async fn sync(&self, report_id: &str) -> Result<SyncOutcome, JobError> {
        let Some(report) = self.live.get_report(report_id).await? else {
            debug!("Report {} is gone from the live store, nothing to sync", report_id);
            return Ok(SyncOutcome::Missing);
        };

        let snapshot = report.clone();
        let outcome = self
            .db
            .run_blocking(move |db| report_repo::save_snapshot(db, &snapshot))
            .await
            .map_err(|e| {
                warn!(
                    "Durable sync of report {} (version {}) failed: {}",
                    report.id, report.version, e
                );
                JobError::from(e)
            })?;

        match outcome {
            SaveOutcome::Deleted => {
                debug!("Report {} was deleted while syncing, durable copy not restored", report.id);
                Ok(SyncOutcome::Missing)
            }
            SaveOutcome::Stale { durable_version } => {
                debug!(
                    "Report {} version {} is older than durable version {}, skipped",
                    report.id, report.version, durable_version
                );
                Ok(SyncOutcome::Stale { durable_version })
            }
            SaveOutcome::Written { sections } => {
                info!(
                    "Synced report {} at version {} ({} sections)",
                    report.id, report.version, sections
                );

                if let Err(e) = self.pipeline.process_report(&report.id, &report.html).await {
                    error!("Entity processing for report {} failed: {}", report.id, e);
                }

                Ok(SyncOutcome::Synced {
                    version: report.version,
                    sections,
                })
            }
        }
    }

    /// Re-syncs every live report whose durable copy is missing or behind.
    /// Safe to run repeatedly; overlapping calls return immediately.
    pub async fn reconcile_all(&self) -> Result<ReconcileResult, JobError> {
        let _guard = match self.reconcile_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Reconcile skipped: another reconcile is already in progress");
                return Ok(ReconcileResult {
                    skipped: true,
                    ..Default::default()
                });
            }
        };

        let reports = self.live.list_reports(None).await?;
        let mut result = ReconcileResult {
            examined: reports.len(),
            ..Default::default()
        };

        for report in reports {
            let id = report.id.clone();
            let durable = self
                .db
                .run_blocking(move |db| report_repo::live_version(db, &id))
                .await?;
            if durable.is_some_and(|v| v >= report.version) {
                continue;
            }

            match self.sync_report(&report.id).await {
                Ok(SyncOutcome::Synced { .. }) => result.synced += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!("Reconcile could not sync report {}: {}", report.id, e);
                    result.failed += 1;
                }
            }
        }

        info!(
            "Reconcile finished: {} examined, {} synced, {} failed",
            result.examined, result.synced, result.failed
        );
        Ok(result)
    }

    pub fn sync_state(&self, report_id: &str) -> Result<SyncState, DatabaseError> {
        Ok(match report_repo::live_version(&self.db, report_id)? {
            Some(version) => SyncState::Synced { version },
            None => SyncState::Absent,
        })
    }
}
