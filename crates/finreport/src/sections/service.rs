use std::sync::Arc;

use log::{debug, info, warn};

use super::{validate_content, validate_title, NewSection, SectionPatch};
use crate::db::{report_repo, Database};
use crate::error::{ApiError, StoreError};
use crate::live::{DocumentStore, ReportMutation};
use crate::report::parser::{first_heading, UNTITLED_SECTION};
use crate::report::{ordering, Direction, OperationKind, Report, ReportStatus, Section, SectionMetadata};
use crate::worker::{BackgroundJob, JobQueue};

pub struct SectionService {
    live: Arc<dyn DocumentStore>,
    db: Database,
    queue: Arc<JobQueue>,
}

impl SectionService {
    pub fn new(live: Arc<dyn DocumentStore>, db: Database, queue: Arc<JobQueue>) -> Self {
        Self { live, db, queue }
    }

    pub async fn get_report(&self, user_id: &str, report_id: &str) -> Result<Report, ApiError> {
        self.owned_report(user_id, report_id).await
    }

    /// Reports owned by `user_id`, newest first.
    pub async fn list_reports(&self, user_id: &str) -> Result<Vec<Report>, ApiError> {
        Ok(self.live.list_reports(Some(user_id)).await?)
    }

    pub async fn get_section(&self, user_id: &str, section_id: &str) -> Result<Section, ApiError> {
        let report = self.owned_section(user_id, section_id).await?;
        find_section(&report, section_id)
    }

    pub async fn create(&self, user_id: &str, new: NewSection) -> Result<Section, ApiError> {
        validate_content(&new.content)?;
        if let Some(title) = &new.title {
            validate_title(title)?;
        }
        let report = self.owned_report(user_id, &new.report_id).await?;

        let title = new
            .title
            .or_else(|| first_heading(&new.content))
            .unwrap_or_else(|| UNTITLED_SECTION.to_string());
        let section = Section::new(
            &report.id,
            new.section_type,
            &title,
            &new.content,
            0,
            SectionMetadata::manual(user_id),
        );
        let section_id = section.id.clone();

        let actor = user_id.to_string();
        let id = section_id.clone();
        let explicit_order = new.order;
        let mutation: ReportMutation = Box::new(move |r: &mut Report| {
            let order = ordering::insert_at(&mut r.sections, section, explicit_order);
            r.record(&actor, OperationKind::SectionCreated { section_id: id, order });
            r.touch();
            Ok(())
        });

        let committed = self.commit(&report, mutation).await?;
        find_section(&committed, &section_id)
    }

    /// Applies `patch`. New content pushes the current content and version
    /// into the edit history first.
    pub async fn update(
        &self,
        user_id: &str,
        section_id: &str,
        patch: SectionPatch,
    ) -> Result<Section, ApiError> {
        if patch.content.is_none() && patch.title.is_none() {
            return Err(ApiError::Validation("nothing to update".to_string()));
        }
        if let Some(content) = &patch.content {
            validate_content(content)?;
        }
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        let report = self.owned_section(user_id, section_id).await?;

        let actor = user_id.to_string();
        let id = section_id.to_string();
        let mutation: ReportMutation = Box::new(move |r: &mut Report| {
            let section = r
                .section_mut(&id)
                .ok_or_else(|| StoreError::SectionNotFound(id.clone()))?;
            if let Some(title) = patch.title {
                section.title = title;
                section.metadata.set_last_editor(&actor);
                section.updated_at = chrono::Utc::now();
            }
            if let Some(content) = patch.content {
                section.apply_edit(&content, &actor, patch.prompt.as_deref());
            }
            let version = section.version;
            r.record(&actor, OperationKind::SectionEdited { section_id: id, version });
            r.touch();
            Ok(())
        });

        let committed = self.commit(&report, mutation).await?;
        find_section(&committed, section_id)
    }

    /// Swaps the section with its neighbour. At a boundary nothing changes.
    pub async fn reorder(
        &self,
        user_id: &str,
        section_id: &str,
        direction: Direction,
    ) -> Result<Section, ApiError> {
        let report = self.owned_section(user_id, section_id).await?;

        let actor = user_id.to_string();
        let id = section_id.to_string();
        let mutation: ReportMutation = Box::new(move |r: &mut Report| {
            let swapped = ordering::swap_adjacent(&mut r.sections, &id, direction)
                .map_err(|_| StoreError::SectionNotFound(id.clone()))?;
            match swapped {
                Some((from, to)) => {
                    r.record(
                        &actor,
                        OperationKind::SectionReordered {
                            section_id: id,
                            direction,
                            from,
                            to,
                        },
                    );
                    r.touch();
                }
                None => debug!("Section {} already at the {:?} boundary", id, direction),
            }
            Ok(())
        });

        let committed = self.commit(&report, mutation).await?;
        find_section(&committed, section_id)
    }

    /// Appends a copy of the section with its own identity and history.
    pub async fn duplicate(&self, user_id: &str, section_id: &str) -> Result<Section, ApiError> {
        let report = self.owned_section(user_id, section_id).await?;

        let copy_id = uuid::Uuid::new_v4().to_string();
        let actor = user_id.to_string();
        let id = section_id.to_string();
        let new_id = copy_id.clone();
        let mutation: ReportMutation = Box::new(move |r: &mut Report| {
            let source = r
                .section(&id)
                .ok_or_else(|| StoreError::SectionNotFound(id.clone()))?;
            let mut copy = source.duplicate(r.sections.len() as u32, &actor);
            copy.id = new_id.clone();
            r.sections.push(copy);
            r.record(
                &actor,
                OperationKind::SectionDuplicated {
                    section_id: id,
                    copy_id: new_id,
                },
            );
            r.touch();
            Ok(())
        });

        let committed = self.commit(&report, mutation).await?;
        find_section(&committed, &copy_id)
    }

    /// Removes the section and closes the gap in the ordering.
    pub async fn delete(&self, user_id: &str, section_id: &str) -> Result<(), ApiError> {
        let report = self.owned_section(user_id, section_id).await?;

        let actor = user_id.to_string();
        let id = section_id.to_string();
        let mutation: ReportMutation = Box::new(move |r: &mut Report| {
            let removed = ordering::remove_and_compact(&mut r.sections, &id)
                .ok_or_else(|| StoreError::SectionNotFound(id.clone()))?;
            r.record(
                &actor,
                OperationKind::SectionDeleted {
                    section_id: id,
                    order: removed.order,
                },
            );
            r.touch();
            Ok(())
        });

        self.commit(&report, mutation).await?;
        Ok(())
    }

    pub async fn set_status(
        &self,
        user_id: &str,
        report_id: &str,
        status: ReportStatus,
    ) -> Result<Report, ApiError> {
        let report = self.owned_report(user_id, report_id).await?;

        let actor = user_id.to_string();
        let mutation: ReportMutation = Box::new(move |r: &mut Report| {
            let from = r.status;
            if from != status {
                r.status = status;
                r.record(&actor, OperationKind::StatusChanged { from, to: status });
                r.touch();
            }
            Ok(())
        });

        self.commit(&report, mutation).await
    }

    pub async fn rename(&self, user_id: &str, report_id: &str, title: &str) -> Result<Report, ApiError> {
        validate_title(title)?;
        let report = self.owned_report(user_id, report_id).await?;

        let actor = user_id.to_string();
        let title = title.trim().to_string();
        let mutation: ReportMutation = Box::new(move |r: &mut Report| {
            if r.title != title {
                r.title = title.clone();
                r.record(&actor, OperationKind::Renamed { title });
                r.touch();
            }
            Ok(())
        });

        self.commit(&report, mutation).await
    }

    /// Deletes the report from both stores. Durable sections and entity
    /// mentions cascade; entity mention counts are history and stay. The
    /// durable side goes first and leaves a tombstone, so a sync already in
    /// flight cannot bring the report back.
    pub async fn delete_report(&self, user_id: &str, report_id: &str) -> Result<(), ApiError> {
        self.owned_report(user_id, report_id).await?;

        let id = report_id.to_string();
        let durable = self
            .db
            .run_blocking(move |db| report_repo::delete(db, &id))
            .await?;
        self.live.delete_report(report_id).await?;
        info!(
            "Deleted report {} (durable copy {})",
            report_id,
            if durable { "removed" } else { "absent" }
        );
        Ok(())
    }

    async fn owned_report(&self, user_id: &str, report_id: &str) -> Result<Report, ApiError> {
        let report = self
            .live
            .get_report(report_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("report {}", report_id)))?;
        if report.user_id != user_id {
            return Err(ApiError::Forbidden(format!(
                "report {} belongs to another user",
                report_id
            )));
        }
        Ok(report)
    }

    async fn owned_section(&self, user_id: &str, section_id: &str) -> Result<Report, ApiError> {
        let report_id = self
            .live
            .find_report_for_section(section_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("section {}", section_id)))?;
        self.owned_report(user_id, &report_id).await
    }

    /// Runs `mutation` and queues a sync when the report actually changed.
    async fn commit(&self, report: &Report, mutation: ReportMutation) -> Result<Report, ApiError> {
        let committed = self.live.modify_report(&report.id, mutation).await?;
        if committed.version != report.version {
            self.schedule_sync(&committed.id);
        }
        Ok(committed)
    }

    fn schedule_sync(&self, report_id: &str) {
        let job = BackgroundJob::SyncReport {
            report_id: report_id.to_string(),
        };
        if let Err(e) = self.queue.submit(job) {
            warn!("Could not queue sync for report {}: {}", report_id, e);
        }
    }
}

fn find_section(report: &Report, section_id: &str) -> Result<Section, ApiError> {
    report
        .section(section_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("section {}", section_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::live::{Exchange, MemoryDocumentStore, Thread};
    use crate::report::SectionType;

    struct Fixture {
        service: SectionService,
        live: Arc<MemoryDocumentStore>,
        queue: Arc<JobQueue>,
        report_id: String,
        ids: Vec<String>,
    }

    async fn fixture(titles: &[&str]) -> Fixture {
        let live = Arc::new(MemoryDocumentStore::new());
        let db = Database::open_in_memory().unwrap();
        let queue = Arc::new(JobQueue::new(&QueueConfig::default()));

        let mut report = Report::new("owner", "Q3");
        for (i, title) in titles.iter().enumerate() {
            report.sections.push(Section::new(
                &report.id,
                SectionType::Text,
                title,
                &format!("<p>{}</p>", title),
                i as u32,
                SectionMetadata::default(),
            ));
        }
        let report_id = report.id.clone();
        let ids = report.sections.iter().map(|s| s.id.clone()).collect();
        live.insert_generated(report, Thread::new("owner", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();

        Fixture {
            service: SectionService::new(live.clone(), db, queue.clone()),
            live,
            queue,
            report_id,
            ids,
        }
    }

    async fn titles(f: &Fixture) -> Vec<String> {
        let report = f.live.get_report(&f.report_id).await.unwrap().unwrap();
        report.sections.iter().map(|s| s.title.clone()).collect()
    }

    fn new_section(report_id: &str, title: &str, order: Option<u32>) -> NewSection {
        NewSection {
            report_id: report_id.to_string(),
            section_type: SectionType::Text,
            title: Some(title.to_string()),
            content: format!("<p>{}</p>", title),
            order,
        }
    }

    #[tokio::test]
    async fn test_create_at_explicit_order_shifts_later() {
        let f = fixture(&["A", "B", "C"]).await;
        let created = f
            .service
            .create("owner", new_section(&f.report_id, "X", Some(1)))
            .await
            .unwrap();
        assert_eq!(created.order, 1);
        assert_eq!(titles(&f).await, vec!["A", "X", "B", "C"]);
    }

    #[tokio::test]
    async fn test_create_appends_by_default() {
        let f = fixture(&["A"]).await;
        let created = f
            .service
            .create("owner", new_section(&f.report_id, "Z", None))
            .await
            .unwrap();
        assert_eq!(created.order, 1);
        assert_eq!(created.version, 1);
    }

    #[tokio::test]
    async fn test_create_title_from_heading() {
        let f = fixture(&[]).await;
        let mut new = new_section(&f.report_id, "ignored", None);
        new.title = None;
        new.content = "<h3>Margins</h3><p>up</p>".to_string();
        let created = f.service.create("owner", new).await.unwrap();
        assert_eq!(created.title, "Margins");
        assert_eq!(created.order, 0);
    }

    #[tokio::test]
    async fn test_update_twice_keeps_history() {
        let f = fixture(&["A"]).await;
        let id = &f.ids[0];
        f.service
            .update("owner", id, SectionPatch::content("<p>X</p>"))
            .await
            .unwrap();
        let section = f
            .service
            .update("owner", id, SectionPatch::content("<p>Y</p>"))
            .await
            .unwrap();

        assert_eq!(section.version, 3);
        assert_eq!(section.content, "<p>Y</p>");
        assert_eq!(section.edit_history.len(), 2);
        assert!(section.edit_history.iter().any(|e| e.content == "<p>X</p>"));
        assert_eq!(section.metadata.last_edited_by(), Some("owner"));
    }

    #[tokio::test]
    async fn test_title_only_update_keeps_version() {
        let f = fixture(&["A"]).await;
        let patch = SectionPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        let section = f.service.update("owner", &f.ids[0], patch).await.unwrap();
        assert_eq!(section.title, "Renamed");
        assert_eq!(section.version, 1);
    }

    #[tokio::test]
    async fn test_reorder_up_then_boundary_noop() {
        let f = fixture(&["A", "B", "C"]).await;
        let b = &f.ids[1];

        let moved = f.service.reorder("owner", b, Direction::Up).await.unwrap();
        assert_eq!(moved.order, 0);
        assert_eq!(titles(&f).await, vec!["B", "A", "C"]);
        let queued = f.queue.pending();

        let version = f.live.get_report(&f.report_id).await.unwrap().unwrap().version;
        f.service.reorder("owner", b, Direction::Up).await.unwrap();
        assert_eq!(titles(&f).await, vec!["B", "A", "C"]);
        let after = f.live.get_report(&f.report_id).await.unwrap().unwrap();
        assert_eq!(after.version, version);
        assert_eq!(f.queue.pending(), queued);
    }

    #[tokio::test]
    async fn test_delete_compacts_orders() {
        let f = fixture(&["A", "B", "C", "D"]).await;
        f.service.delete("owner", &f.ids[1]).await.unwrap();

        let report = f.live.get_report(&f.report_id).await.unwrap().unwrap();
        let orders: Vec<u32> = report.sections.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(titles(&f).await, vec!["A", "C", "D"]);
        assert!(!report.section_refs.contains(&f.ids[1]));
        assert!(!report.html.contains("<p>B</p>"));
    }

    #[tokio::test]
    async fn test_duplicate_appends_copy() {
        let f = fixture(&["A", "B"]).await;
        let copy = f.service.duplicate("owner", &f.ids[0]).await.unwrap();
        assert_eq!(copy.order, 2);
        assert_eq!(copy.title, "A (Copy)");
        assert_ne!(copy.id, f.ids[0]);
        assert_eq!(f.service.get_section("owner", &copy.id).await.unwrap().id, copy.id);
    }

    #[tokio::test]
    async fn test_non_owner_is_forbidden() {
        let f = fixture(&["A"]).await;
        let err = f
            .service
            .update("intruder", &f.ids[0], SectionPatch::content("<p>x</p>"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(titles(&f).await, vec!["A"]);
        assert_eq!(f.queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_missing_targets_are_not_found() {
        let f = fixture(&["A"]).await;
        let err = f.service.delete("owner", "no-such-section").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        let err = f
            .service
            .create("owner", new_section("no-such-report", "X", None))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_invalid_payload_rejected_before_lookup() {
        let f = fixture(&["A"]).await;
        let err = f
            .service
            .update("owner", &f.ids[0], SectionPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let mut new = new_section("no-such-report", "X", None);
        new.content = "   ".to_string();
        let err = f.service.create("owner", new).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_status_and_rename_are_logged() {
        let f = fixture(&["A"]).await;
        let report = f
            .service
            .set_status("owner", &f.report_id, ReportStatus::Published)
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Published);

        let report = f.service.rename("owner", &f.report_id, " Q3 Final ").await.unwrap();
        assert_eq!(report.title, "Q3 Final");
        assert_eq!(report.version, 3);
        assert!(matches!(
            report.operations.last().map(|o| &o.kind),
            Some(OperationKind::Renamed { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutations_queue_sync() {
        let f = fixture(&["A"]).await;
        f.service.duplicate("owner", &f.ids[0]).await.unwrap();
        assert_eq!(f.queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_delete_report_removes_live_copy() {
        let f = fixture(&["A"]).await;
        f.service.delete_report("owner", &f.report_id).await.unwrap();
        assert!(f.live.get_report(&f.report_id).await.unwrap().is_none());
        let err = f.service.get_report("owner", &f.report_id).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
