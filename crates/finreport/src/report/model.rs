//! Report, section and operation-log types held in the live store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::usage::UsageEntry;

/// Semantic type of a section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Text,
    Chart,
    Table,
    Metric,
    Insight,
}

impl SectionType {
    /// Infers the type from a section marker identifier such as
    /// `"revenue-chart-1"`. Falls back to `Text`.
    pub fn from_identifier(identifier: &str) -> Self {
        let id = identifier.to_ascii_lowercase();
        if id.contains("chart") {
            SectionType::Chart
        } else if id.contains("table") {
            SectionType::Table
        } else if id.contains("metric") {
            SectionType::Metric
        } else if id.contains("insight") {
            SectionType::Insight
        } else {
            SectionType::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Text => "text",
            SectionType::Chart => "chart",
            SectionType::Table => "table",
            SectionType::Metric => "metric",
            SectionType::Insight => "insight",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Some(SectionType::Text),
            "chart" => Some(SectionType::Chart),
            "table" => Some(SectionType::Table),
            "metric" => Some(SectionType::Metric),
            "insight" => Some(SectionType::Insight),
            _ => None,
        }
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Draft,
    Published,
    Archived,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Published => "published",
            ReportStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(ReportStatus::Draft),
            "published" => Some(ReportStatus::Published),
            "archived" => Some(ReportStatus::Archived),
            _ => None,
        }
    }
}

/// Direction for `reorder`. `Up` moves a section towards order 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// A prior version of a section, kept in its edit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditHistoryEntry {
    pub version: u32,
    pub content: String,
    pub editor: String,
    pub edited_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Section metadata, versioned so older shapes stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "lowercase")]
pub enum SectionMetadata {
    V1(SectionMetadataV1),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMetadataV1 {
    #[serde(default)]
    pub last_edited_by: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Marker identifier the section was parsed from, if generated.
    #[serde(default)]
    pub source_identifier: Option<String>,
}

impl SectionMetadata {
    pub fn generated(model: &str, identifier: &str) -> Self {
        SectionMetadata::V1(SectionMetadataV1 {
            last_edited_by: None,
            model: Some(model.to_string()),
            source_identifier: Some(identifier.to_string()),
        })
    }

    pub fn manual(editor: &str) -> Self {
        SectionMetadata::V1(SectionMetadataV1 {
            last_edited_by: Some(editor.to_string()),
            model: None,
            source_identifier: None,
        })
    }

    pub fn set_last_editor(&mut self, editor: &str) {
        match self {
            SectionMetadata::V1(v1) => v1.last_edited_by = Some(editor.to_string()),
        }
    }

    pub fn last_edited_by(&self) -> Option<&str> {
        match self {
            SectionMetadata::V1(v1) => v1.last_edited_by.as_deref(),
        }
    }
}

impl Default for SectionMetadata {
    fn default() -> Self {
        SectionMetadata::V1(SectionMetadataV1::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub report_id: String,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    /// Dense zero-based position within the report.
    pub order: u32,
    /// Starts at 1, incremented on every content change.
    pub version: u32,
    #[serde(default)]
    pub edit_history: Vec<EditHistoryEntry>,
    #[serde(default)]
    pub metadata: SectionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Section {
    pub fn new(
        report_id: &str,
        section_type: SectionType,
        title: &str,
        content: &str,
        order: u32,
        metadata: SectionMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            report_id: report_id.to_string(),
            section_type,
            title: title.to_string(),
            content: content.to_string(),
            order,
            version: 1,
            edit_history: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pushes the current content into history and installs `content` as the
    /// next version.
    pub fn apply_edit(&mut self, content: &str, editor: &str, prompt: Option<&str>) {
        let now = Utc::now();
        self.edit_history.push(EditHistoryEntry {
            version: self.version,
            content: std::mem::replace(&mut self.content, content.to_string()),
            editor: editor.to_string(),
            edited_at: now,
            prompt: prompt.map(str::to_string),
        });
        self.version += 1;
        self.metadata.set_last_editor(editor);
        self.updated_at = now;
    }

    /// Copy with a fresh id, fresh history and a " (Copy)" title suffix.
    pub fn duplicate(&self, order: u32, editor: &str) -> Self {
        let mut copy = Section::new(
            &self.report_id,
            self.section_type,
            &format!("{} (Copy)", self.title),
            &self.content,
            order,
            self.metadata.clone(),
        );
        copy.metadata.set_last_editor(editor);
        copy
    }
}

/// Severity of an extracted insight block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Info,
    Success,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub severity: InsightSeverity,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

/// Entry in a report's append-only operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    #[serde(flatten)]
    pub kind: OperationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum OperationKind {
    Generation {
        usage: UsageEntry,
        section_count: usize,
    },
    SectionCreated {
        section_id: String,
        order: u32,
    },
    SectionEdited {
        section_id: String,
        version: u32,
    },
    SectionReordered {
        section_id: String,
        direction: Direction,
        from: u32,
        to: u32,
    },
    SectionDuplicated {
        section_id: String,
        copy_id: String,
    },
    SectionDeleted {
        section_id: String,
        order: u32,
    },
    StatusChanged {
        from: ReportStatus,
        to: ReportStatus,
    },
    Renamed {
        title: String,
    },
}

/// The live, document-shaped representation of a report.
///
/// Sections are embedded and kept sorted by `order`; `section_refs` mirrors
/// their ids in the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// Full HTML snapshot rendered from the sections.
    pub html: String,
    pub section_refs: Vec<String>,
    pub sections: Vec<Section>,
    pub insights: Vec<Insight>,
    pub status: ReportStatus,
    /// Incremented on every mutation.
    pub version: u64,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub operations: Vec<OperationLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(user_id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            html: String::new(),
            section_refs: Vec::new(),
            sections: Vec::new(),
            insights: Vec::new(),
            status: ReportStatus::Draft,
            version: 1,
            thread_id: None,
            prompt: None,
            model: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: 0.0,
            operations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    pub fn section_mut(&mut self, section_id: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.id == section_id)
    }

    /// Appends a usage-ledger entry and folds it into the running totals.
    pub fn record_usage(&mut self, actor: &str, usage: UsageEntry, section_count: usize) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.total_cost += usage.cost;
        self.record(
            actor,
            OperationKind::Generation {
                usage,
                section_count,
            },
        );
    }

    pub fn record(&mut self, actor: &str, kind: OperationKind) {
        self.operations.push(OperationLogEntry {
            at: Utc::now(),
            actor: actor.to_string(),
            kind,
        });
    }

    /// Re-sorts sections, rebuilds back-references and the HTML snapshot.
    ///
    /// The snapshot opens with the title as `<h1>` unless a section already
    /// carries one.
    pub fn refresh_snapshot(&mut self) {
        self.sections.sort_by_key(|s| s.order);
        self.section_refs = self.sections.iter().map(|s| s.id.clone()).collect();

        let has_heading = self
            .sections
            .iter()
            .any(|s| s.content.to_ascii_lowercase().contains("<h1"));
        let heading = (!has_heading && !self.title.trim().is_empty())
            .then(|| format!("<h1>{}</h1>", crate::html::escape_text(self.title.trim())));
        self.html = heading
            .iter()
            .map(String::as_str)
            .chain(self.sections.iter().map(|s| s.content.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
    }

    /// Marks the report as mutated.
    pub fn touch(&mut self) {
        self.refresh_snapshot();
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
