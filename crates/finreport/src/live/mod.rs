//! Live document store: the fast representation reports are generated and
//! edited against.
//!
//! A report is one document with its sections embedded, so every
//! per-report mutation is a single document write.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::report::Report;

pub mod memory;
pub mod thread;

pub use memory::MemoryDocumentStore;
pub use thread::{Exchange, MessageRole, Thread, ThreadMessage};

/// A change applied to a private copy of a report. Returning `Err` discards
/// the copy.
pub type ReportMutation = Box<dyn FnOnce(&mut Report) -> Result<(), StoreError> + Send>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persists a new report and appends `exchange` to its thread.
    ///
    /// `thread` is stored only when no thread with its id exists yet. An
    /// existing thread keeps its messages and gains the exchange, so
    /// concurrent generations on one thread never drop each other's turns.
    async fn insert_generated(
        &self,
        report: Report,
        thread: Thread,
        exchange: Exchange,
    ) -> Result<(), StoreError>;

    async fn get_report(&self, report_id: &str) -> Result<Option<Report>, StoreError>;

    async fn list_reports(&self, user_id: Option<&str>) -> Result<Vec<Report>, StoreError>;

    /// Id of the report that owns `section_id`.
    async fn find_report_for_section(&self, section_id: &str)
        -> Result<Option<String>, StoreError>;

    /// Applies `mutation` atomically and returns the committed report.
    ///
    /// Mutations of the same report are serialized. The committed report must
    /// satisfy the dense-order invariant or nothing is written.
    async fn modify_report(
        &self,
        report_id: &str,
        mutation: ReportMutation,
    ) -> Result<Report, StoreError>;

    /// Removes a report and its sections. Returns the removed report.
    async fn delete_report(&self, report_id: &str) -> Result<Option<Report>, StoreError>;

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError>;
}
