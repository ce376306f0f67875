//! In-process implementation of [`DocumentStore`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{DocumentStore, Exchange, ReportMutation, Thread};
use crate::error::StoreError;
use crate::report::{ordering, Report};

/// Reports live behind their own mutex so writers to different reports
/// never wait on each other.
#[derive(Default)]
pub struct MemoryDocumentStore {
    reports: RwLock<HashMap<String, Arc<Mutex<Report>>>>,
    /// section id → report id
    section_index: RwLock<HashMap<String, String>>,
    threads: RwLock<HashMap<String, Thread>>,
    unavailable: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with `StoreError::Unavailable` (for tests and
    /// maintenance windows).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(
                "live store is not accepting writes".to_string(),
            ));
        }
        Ok(())
    }

    async fn report_handle(&self, report_id: &str) -> Option<Arc<Mutex<Report>>> {
        self.reports.read().await.get(report_id).cloned()
    }

    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_generated(
        &self,
        mut report: Report,
        thread: Thread,
        exchange: Exchange,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;

        report.refresh_snapshot();
        ordering::check_dense(&report.sections).map_err(|detail| StoreError::OrderingViolation {
            report_id: report.id.clone(),
            detail,
        })?;

        let mut reports = self.reports.write().await;
        if reports.contains_key(&report.id) {
            return Err(StoreError::Duplicate(report.id));
        }

        {
            let mut index = self.section_index.write().await;
            for section in &report.sections {
                index.insert(section.id.clone(), report.id.clone());
            }
        }
        {
            let mut threads = self.threads.write().await;
            let stored = threads.entry(thread.id.clone()).or_insert(thread);
            stored.record_exchange(&exchange.prompt, &exchange.summary, &report.id);
        }
        reports.insert(report.id.clone(), Arc::new(Mutex::new(report)));
        Ok(())
    }

    async fn get_report(&self, report_id: &str) -> Result<Option<Report>, StoreError> {
        match self.report_handle(report_id).await {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_reports(&self, user_id: Option<&str>) -> Result<Vec<Report>, StoreError> {
        let handles: Vec<Arc<Mutex<Report>>> =
            self.reports.read().await.values().cloned().collect();

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle.lock().await;
            if user_id.map_or(true, |u| report.user_id == u) {
                reports.push(report.clone());
            }
        }
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }

    async fn find_report_for_section(
        &self,
        section_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.section_index.read().await.get(section_id).cloned())
    }

    async fn modify_report(
        &self,
        report_id: &str,
        mutation: ReportMutation,
    ) -> Result<Report, StoreError> {
        self.ensure_available()?;

        let handle = self
            .report_handle(report_id)
            .await
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;
        let mut current = handle.lock().await;
        // A delete may have won the race while this writer waited.
        let still_live = self
            .reports
            .read()
            .await
            .get(report_id)
            .is_some_and(|live| Arc::ptr_eq(live, &handle));
        if !still_live {
            return Err(StoreError::ReportNotFound(report_id.to_string()));
        }

        let mut draft = current.clone();
        mutation(&mut draft)?;
        draft.refresh_snapshot();
        ordering::check_dense(&draft.sections).map_err(|detail| StoreError::OrderingViolation {
            report_id: report_id.to_string(),
            detail,
        })?;

        {
            let before: HashSet<&str> = current.sections.iter().map(|s| s.id.as_str()).collect();
            let after: HashSet<&str> = draft.sections.iter().map(|s| s.id.as_str()).collect();
            let mut index = self.section_index.write().await;
            for removed in before.difference(&after) {
                index.remove(*removed);
            }
            for added in after.difference(&before) {
                index.insert((*added).to_string(), report_id.to_string());
            }
        }

        *current = draft;
        Ok(current.clone())
    }

    async fn delete_report(&self, report_id: &str) -> Result<Option<Report>, StoreError> {
        self.ensure_available()?;

        let removed = self.reports.write().await.remove(report_id);
        let Some(handle) = removed else {
            return Ok(None);
        };
        let report = handle.lock().await.clone();

        let mut index = self.section_index.write().await;
        for section in &report.sections {
            index.remove(&section.id);
        }
        Ok(Some(report))
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Section, SectionMetadata, SectionType};

    fn report_with_sections(n: u32) -> Report {
        let mut report = Report::new("user-1", "Test");
        for i in 0..n {
            report.sections.push(Section::new(
                &report.id,
                SectionType::Text,
                &format!("S{}", i),
                &format!("<p>{}</p>", i),
                i,
                SectionMetadata::default(),
            ));
        }
        report
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryDocumentStore::new();
        let report = report_with_sections(2);
        let id = report.id.clone();
        let section_id = report.sections[1].id.clone();
        store
            .insert_generated(report, Thread::new("user-1", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();

        let loaded = store.get_report(&id).await.unwrap().unwrap();
        assert_eq!(loaded.sections.len(), 2);
        assert_eq!(loaded.section_refs.len(), 2);
        assert_eq!(
            store.find_report_for_section(&section_id).await.unwrap(),
            Some(id)
        );
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_gapped_orders() {
        let store = MemoryDocumentStore::new();
        let mut report = report_with_sections(2);
        report.sections[1].order = 5;
        let result = store
            .insert_generated(report, Thread::new("user-1", "t"), Exchange::new("p", "s"))
            .await;
        assert!(matches!(result, Err(StoreError::OrderingViolation { .. })));
        assert_eq!(store.report_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_report_untouched() {
        let store = MemoryDocumentStore::new();
        let report = report_with_sections(2);
        let id = report.id.clone();
        store
            .insert_generated(report, Thread::new("user-1", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();

        let result = store
            .modify_report(
                &id,
                Box::new(|r: &mut Report| {
                    r.title = "changed".to_string();
                    Err(StoreError::Unavailable("boom".to_string()))
                }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.get_report(&id).await.unwrap().unwrap().title, "Test");
    }

    #[tokio::test]
    async fn test_mutation_breaking_order_is_rejected() {
        let store = MemoryDocumentStore::new();
        let report = report_with_sections(3);
        let id = report.id.clone();
        store
            .insert_generated(report, Thread::new("user-1", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();

        let result = store
            .modify_report(
                &id,
                Box::new(|r: &mut Report| {
                    r.sections[0].order = 2;
                    Ok(())
                }),
            )
            .await;
        assert!(matches!(result, Err(StoreError::OrderingViolation { .. })));
    }

    #[tokio::test]
    async fn test_delete_clears_section_index() {
        let store = MemoryDocumentStore::new();
        let report = report_with_sections(1);
        let id = report.id.clone();
        let section_id = report.sections[0].id.clone();
        store
            .insert_generated(report, Thread::new("user-1", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();

        assert!(store.delete_report(&id).await.unwrap().is_some());
        assert!(store.get_report(&id).await.unwrap().is_none());
        assert!(store
            .find_report_for_section(&section_id)
            .await
            .unwrap()
            .is_none());
        assert!(store.delete_report(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_modify_after_concurrent_delete_is_not_found() {
        let store = Arc::new(MemoryDocumentStore::new());
        let report = report_with_sections(1);
        let id = report.id.clone();
        store
            .insert_generated(report, Thread::new("user-1", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();

        let added = Section::new(&id, SectionType::Text, "New", "<p>n</p>", 1, SectionMetadata::default());
        let added_id = added.id.clone();

        // Hold the report so the writer and the delete queue up behind it.
        let handle = store.report_handle(&id).await.unwrap();
        let guard = handle.lock().await;

        let writer = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                store
                    .modify_report(
                        &id,
                        Box::new(move |r: &mut Report| {
                            r.sections.push(added);
                            Ok(())
                        }),
                    )
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let deleter = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.delete_report(&id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(guard);

        let written = writer.await.unwrap();
        assert!(matches!(written, Err(StoreError::ReportNotFound(_))));
        assert!(deleter.await.unwrap().unwrap().is_some());
        assert!(store.get_report(&id).await.unwrap().is_none());
        assert!(store
            .find_report_for_section(&added_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unavailable_rejects_writes() {
        let store = MemoryDocumentStore::new();
        store.set_unavailable(true);
        let result = store
            .insert_generated(report_with_sections(1), Thread::new("u", "t"), Exchange::new("p", "s"))
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_list_reports_by_user() {
        let store = MemoryDocumentStore::new();
        store
            .insert_generated(report_with_sections(1), Thread::new("user-1", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();
        let mut other = report_with_sections(1);
        other.user_id = "user-2".to_string();
        store
            .insert_generated(other, Thread::new("user-2", "t"), Exchange::new("p", "s"))
            .await
            .unwrap();

        assert_eq!(store.list_reports(Some("user-1")).await.unwrap().len(), 1);
        assert_eq!(store.list_reports(None).await.unwrap().len(), 2);
    }
}
