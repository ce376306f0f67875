//! Report repository: durable mirror of live reports and their sections.

use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::Serialize;

use super::{now_rfc3339, user_repo, Database, DatabaseError};
use crate::report::Report;

/// A durable report row. `user_id` is the durable user id, not the
/// external one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub html: String,
    pub status: String,
    pub live_version: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub thread_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub synced_at: String,
}

impl ReportRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            html: row.get("html")?,
            status: row.get("status")?,
            live_version: row.get::<_, i64>("live_version")? as u64,
            total_input_tokens: row.get::<_, i64>("total_input_tokens")? as u64,
            total_output_tokens: row.get::<_, i64>("total_output_tokens")? as u64,
            total_cost: row.get("total_cost")?,
            thread_id: row.get("thread_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            synced_at: row.get("synced_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRow {
    pub id: String,
    pub report_id: String,
    pub section_type: String,
    pub title: String,
    pub content: String,
    pub sort_order: u32,
    pub version: u32,
    /// JSON array of edit-history entries.
    pub edit_history: String,
    /// JSON-encoded `SectionMetadata`.
    pub metadata: String,
}

impl SectionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            report_id: row.get("report_id")?,
            section_type: row.get("section_type")?,
            title: row.get("title")?,
            content: row.get("content")?,
            sort_order: row.get("sort_order")?,
            version: row.get("version")?,
            edit_history: row.get("edit_history")?,
            metadata: row.get("metadata")?,
        })
    }
}

/// Result of mirroring a live snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written { sections: usize },
    /// The durable copy already holds this version or a newer one.
    Stale { durable_version: u64 },
    /// The report was deleted; nothing written.
    Deleted,
}

/// Writes the report row and replaces its sections in one transaction,
/// creating a placeholder owner if needed. Older snapshots never overwrite
/// newer ones, and a deleted report is never brought back.
pub fn save_snapshot(db: &Database, report: &Report) -> Result<SaveOutcome, DatabaseError> {
    db.with_transaction(|tx| {
        if is_tombstoned(tx, &report.id)? {
            return Ok(SaveOutcome::Deleted);
        }
        let owner = user_repo::ensure_placeholder(tx, &report.user_id)?;

        if !upsert_report(tx, report, &owner.id)? {
            let durable_version: i64 = tx.query_row(
                "SELECT live_version FROM reports WHERE id = ?1",
                params![report.id],
                |r| r.get(0),
            )?;
            return Ok(SaveOutcome::Stale {
                durable_version: durable_version as u64,
            });
        }

        let sections = replace_sections(tx, report)?;
        Ok(SaveOutcome::Written { sections })
    })
}

/// Returns false when the stored row carries a newer live version.
fn upsert_report(tx: &Transaction<'_>, report: &Report, owner_id: &str) -> Result<bool, DatabaseError> {
    let changed = tx.execute(
        "INSERT INTO reports (id, user_id, title, html, status, live_version,
         total_input_tokens, total_output_tokens, total_cost, thread_id,
         created_at, updated_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           html = excluded.html,
           status = excluded.status,
           live_version = excluded.live_version,
           total_input_tokens = excluded.total_input_tokens,
           total_output_tokens = excluded.total_output_tokens,
           total_cost = excluded.total_cost,
           thread_id = excluded.thread_id,
           updated_at = excluded.updated_at,
           synced_at = excluded.synced_at
         WHERE excluded.live_version >= reports.live_version",
        params![
            report.id,
            owner_id,
            report.title,
            report.html,
            report.status.as_str(),
            report.version as i64,
            report.total_input_tokens as i64,
            report.total_output_tokens as i64,
            report.total_cost,
            report.thread_id,
            report.created_at.to_rfc3339(),
            report.updated_at.to_rfc3339(),
            now_rfc3339(),
        ],
    )?;
    Ok(changed == 1)
}

fn replace_sections(tx: &Transaction<'_>, report: &Report) -> Result<usize, DatabaseError> {
    tx.execute(
        "DELETE FROM sections WHERE report_id = ?1",
        params![report.id],
    )?;

    let mut stmt = tx.prepare(
        "INSERT INTO sections (id, report_id, section_type, title, content, sort_order,
         version, edit_history, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for section in &report.sections {
        stmt.execute(params![
            section.id,
            report.id,
            section.section_type.as_str(),
            section.title,
            section.content,
            section.order,
            section.version,
            serde_json::to_string(&section.edit_history)?,
            serde_json::to_string(&section.metadata)?,
            section.created_at.to_rfc3339(),
            section.updated_at.to_rfc3339(),
        ])?;
    }
    Ok(report.sections.len())
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ReportRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM reports WHERE id = ?1",
                params![id],
                ReportRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// The live version last mirrored for `id`, if any.
pub fn live_version(db: &Database, id: &str) -> Result<Option<u64>, DatabaseError> {
    db.with_conn(|conn| {
        let version: Option<i64> = conn
            .query_row(
                "SELECT live_version FROM reports WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(version.map(|v| v as u64))
    })
}

/// Sections of a report in display order.
pub fn sections_for(db: &Database, report_id: &str) -> Result<Vec<SectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM sections WHERE report_id = ?1 ORDER BY sort_order")?;
        let rows = stmt
            .query_map(params![report_id], SectionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Reports owned by the user with the given external id, newest first.
pub fn list_for_user(db: &Database, external_id: &str) -> Result<Vec<ReportRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT r.* FROM reports r
             JOIN users u ON u.id = r.user_id
             WHERE u.external_id = ?1
             ORDER BY r.created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![external_id], ReportRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a report and leaves a tombstone so in-flight syncs cannot
/// recreate it. Sections and entity mentions go with it through foreign-key
/// cascades; entity counters are left alone.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_transaction(|tx| {
        let deleted = tx.execute("DELETE FROM reports WHERE id = ?1", params![id])?;
        tx.execute(
            "INSERT OR IGNORE INTO deleted_reports (id, deleted_at) VALUES (?1, ?2)",
            params![id, now_rfc3339()],
        )?;
        Ok(deleted > 0)
    })
}

/// Whether `id` was deleted through [`delete`].
pub fn is_deleted(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| is_tombstoned(conn, id))
}

fn is_tombstoned(conn: &rusqlite::Connection, id: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM deleted_reports WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
