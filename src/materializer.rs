//! Assembles per-file extraction output into one table batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use crate::entity::Record;
use crate::offset::{Offset, OffsetPolicy, OffsetTracker};
use crate::runtime::engine::{Extraction, ExtractionWarning};
use crate::schema::{LineageColumn, Table, TableSchema};
use crate::source::FileEntry;

/// A file that could not be read, parsed or extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub modified: DateTime<Utc>,
    pub reason: String,
}

impl FileFailure {
    pub fn new(file: &FileEntry, reason: impl fmt::Display) -> Self {
        Self {
            path: file.path.clone(),
            modified: file.modified,
            reason: reason.to_string(),
        }
    }

    fn entry(&self) -> FileEntry {
        FileEntry {
            path: self.path.clone(),
            modified: self.modified,
        }
    }
}

/// Some files in a read failed; the batch holds rows from the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialBatchError {
    pub succeeded: Vec<String>,
    pub failed: Vec<FileFailure>,
}

impl fmt::Display for PartialBatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} files failed",
            self.failed.len(),
            self.failed.len() + self.succeeded.len()
        )?;
        for failure in &self.failed {
            write!(f, "; {}: {}", failure.path, failure.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialBatchError {}

/// Result of processing one candidate file.
#[derive(Debug)]
pub enum FileOutcome {
    Extracted { file: FileEntry, extraction: Extraction },
    Failed(FileFailure),
}

/// Rows for one table from one read call.
#[derive(Debug, Clone)]
pub struct TableBatch {
    pub table: Table,
    pub records: Vec<Record>,
    /// Offset to pass to the next read
    pub offset: Offset,
    pub warnings: Vec<ExtractionWarning>,
    pub partial: Option<PartialBatchError>,
    pub read_id: Uuid,
}

impl TableBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        self.partial.is_some()
    }
}

/// Merges file outcomes for one table.
pub struct TableMaterializer<'s> {
    schema: &'s TableSchema,
    extracted_at: DateTime<Utc>,
}

impl<'s> TableMaterializer<'s> {
    pub fn new(schema: &'s TableSchema, extracted_at: DateTime<Utc>) -> Self {
        Self {
            schema,
            extracted_at,
        }
    }

    /// Build the batch from outcomes in processing order.
    ///
    /// Rows keep file order, then document order within each file. The
    /// offset advances per `policy` when any file failed.
    pub fn materialize(
        &self,
        offset: &Offset,
        outcomes: Vec<FileOutcome>,
        policy: OffsetPolicy,
        read_id: Uuid,
    ) -> TableBatch {
        let mut records = Vec::new();
        let mut warnings = Vec::new();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for outcome in outcomes {
            match outcome {
                FileOutcome::Extracted { file, extraction } => {
                    records.extend(extraction.rows.into_iter().map(|mut record| {
                        self.append_lineage(&mut record, &file);
                        record
                    }));
                    warnings.extend(extraction.warnings);
                    succeeded.push(file);
                }
                FileOutcome::Failed(failure) => {
                    warn!(path = %failure.path, reason = %failure.reason, "Skipping file");
                    failed.push(failure);
                }
            }
        }

        let (offset, partial) = if failed.is_empty() {
            (OffsetTracker::advance(offset, &succeeded), None)
        } else {
            let failed_entries: Vec<FileEntry> = failed.iter().map(FileFailure::entry).collect();
            let offset =
                OffsetTracker::advance_with_failures(offset, &succeeded, &failed_entries, policy);
            let partial = PartialBatchError {
                succeeded: succeeded.iter().map(|f| f.path.clone()).collect(),
                failed,
            };
            (offset, Some(partial))
        };

        TableBatch {
            table: self.schema.table,
            records,
            offset,
            warnings,
            partial,
            read_id,
        }
    }

    fn append_lineage(&self, record: &mut Record, file: &FileEntry) {
        for column in &self.schema.lineage {
            match column {
                LineageColumn::SourceFile => record.set(column.name(), file.path.as_str()),
                LineageColumn::FileModifiedTime => record.set(column.name(), file.modified),
                LineageColumn::ExtractedAt => record.set(column.name(), self.extracted_at),
            }
        }
    }
}
