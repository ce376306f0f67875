//! Report domain types, ordering primitives and the generation-output parser.

pub mod model;
pub mod ordering;
pub mod parser;

pub use model::{
    Direction, EditHistoryEntry, Insight, InsightSeverity, OperationKind, OperationLogEntry,
    Report, ReportStatus, Section, SectionMetadata, SectionMetadataV1, SectionType,
};
pub use parser::{parse_report, ParsedReport, ParsedSection};
