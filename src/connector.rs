//! Caller-facing connector surface.
//!
//! Wires the file source, offset tracker, extraction engine and materializer
//! together. Files are read, parsed and extracted on tokio's blocking pool
//! with a semaphore bounding how many are in flight.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::document::parse_document;
use crate::materializer::{FileFailure, FileOutcome, TableBatch, TableMaterializer};
use crate::offset::{Offset, OffsetTracker};
use crate::runtime::config_loader::{ConfigError, ConnectorOptions, TableOptions};
use crate::runtime::engine::ExtractionEngine;
use crate::schema::{ColumnDef, SchemaRegistry, Table, TableMetadata, TableSchema, UnsupportedTable};
use crate::source::{FileEntry, FileSource, LocalFileSource, SourceError};

#[derive(Debug)]
pub enum ConnectorError {
    UnsupportedTable(UnsupportedTable),
    /// Listing the source failed; nothing was read
    Source(SourceError),
    Config(ConfigError),
    /// A worker or the concurrency limiter shut down unexpectedly
    Runtime(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::UnsupportedTable(e) => write!(f, "{}", e),
            ConnectorError::Source(e) => write!(f, "File source error: {}", e),
            ConnectorError::Config(e) => write!(f, "Configuration error: {}", e),
            ConnectorError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectorError::UnsupportedTable(e) => Some(e),
            ConnectorError::Source(e) => Some(e),
            ConnectorError::Config(e) => Some(e),
            ConnectorError::Runtime(_) => None,
        }
    }
}

impl From<UnsupportedTable> for ConnectorError {
    fn from(e: UnsupportedTable) -> Self {
        ConnectorError::UnsupportedTable(e)
    }
}

impl From<SourceError> for ConnectorError {
    fn from(e: SourceError) -> Self {
        ConnectorError::Source(e)
    }
}

impl From<ConfigError> for ConnectorError {
    fn from(e: ConfigError) -> Self {
        ConnectorError::Config(e)
    }
}

/// Reads Duck Creek policy exports as normalized tables.
pub struct DuckCreekConnector {
    options: ConnectorOptions,
    registry: Arc<SchemaRegistry>,
    source: Arc<dyn FileSource>,
}

impl DuckCreekConnector {
    pub fn new(options: ConnectorOptions, source: Arc<dyn FileSource>) -> Self {
        Self::with_registry(options, Arc::new(SchemaRegistry::duck_creek()), source)
    }

    pub fn with_registry(
        options: ConnectorOptions,
        registry: Arc<SchemaRegistry>,
        source: Arc<dyn FileSource>,
    ) -> Self {
        Self {
            options,
            registry,
            source,
        }
    }

    /// Connector over the local filesystem.
    pub fn local(options: ConnectorOptions) -> Self {
        Self::new(options, Arc::new(LocalFileSource::new()))
    }

    /// Connector over the local filesystem, configured from a string map.
    ///
    /// # Errors
    /// Returns `ConnectorError::Config` if `file_path` is missing or an
    /// option value is invalid
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self, ConnectorError> {
        Ok(Self::local(ConnectorOptions::from_map(options)?))
    }

    pub fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn list_tables(&self) -> Vec<&'static str> {
        self.registry.table_names()
    }

    pub fn get_table_schema(&self, table: &str) -> Result<&[ColumnDef], ConnectorError> {
        Ok(self.registry.lookup(table)?.columns())
    }

    pub fn get_table_metadata(&self, table: &str) -> Result<&TableMetadata, ConnectorError> {
        Ok(&self.registry.lookup(table)?.metadata)
    }

    /// Read every file newer than `offset` into one batch for `table`.
    ///
    /// A file that fails to read or parse is skipped and reported in
    /// `TableBatch::partial`; the rest of the batch is still returned.
    ///
    /// # Errors
    /// Returns `UnsupportedTable` for unknown names, and `Source` if the
    /// file listing itself fails
    pub async fn read_table(
        &self,
        table: &str,
        offset: &Offset,
        table_options: &TableOptions,
    ) -> Result<TableBatch, ConnectorError> {
        let schema = self.registry.lookup(table)?;
        let read_id = Uuid::new_v4();
        let span = info_span!("read_table", table = %schema.table, read_id = %read_id);

        self.read_batch(schema, offset, table_options, read_id)
            .instrument(span)
            .await
    }

    async fn read_batch(
        &self,
        schema: &TableSchema,
        offset: &Offset,
        table_options: &TableOptions,
        read_id: Uuid,
    ) -> Result<TableBatch, ConnectorError> {
        table_options.warn_unrecognized(schema.table.as_str());

        let files = self.list_files().await?;
        let listed = files.len();
        let mut candidates = OffsetTracker::filter_candidates(files, offset);
        candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        debug!(listed, candidates = candidates.len(), offset = %offset, "Selected files");

        let outcomes = self.process_files(schema.table, candidates).await?;

        let batch = TableMaterializer::new(schema, Utc::now()).materialize(
            offset,
            outcomes,
            self.options.offset_policy,
            read_id,
        );

        info!(
            rows = batch.records.len(),
            warnings = batch.warnings.len(),
            failed = batch.partial.as_ref().map_or(0, |p| p.failed.len()),
            offset = %batch.offset,
            "Read complete"
        );
        Ok(batch)
    }

    async fn list_files(&self) -> Result<Vec<FileEntry>, ConnectorError> {
        let source = Arc::clone(&self.source);
        let base = self.options.file_path.clone();
        let pattern = self.options.file_pattern.clone();

        let listed = tokio::task::spawn_blocking(move || source.list_files(&base, &pattern))
            .await
            .map_err(|e| ConnectorError::Runtime(format!("file listing task failed: {}", e)))?;
        Ok(listed?)
    }

    /// Process candidates on the blocking pool; outcomes come back in
    /// candidate order.
    async fn process_files(
        &self,
        table: Table,
        candidates: Vec<FileEntry>,
    ) -> Result<Vec<FileOutcome>, ConnectorError> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency()));
        let mut handles = Vec::with_capacity(candidates.len());

        for file in candidates {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| ConnectorError::Runtime(e.to_string()))?;
            let source = Arc::clone(&self.source);
            let registry = Arc::clone(&self.registry);
            let task_file = file.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                process_file(source.as_ref(), &registry, table, task_file)
            });
            handles.push((file, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (file, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => FileOutcome::Failed(FileFailure::new(&file, format!("worker failed: {}", e))),
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

fn process_file(
    source: &dyn FileSource,
    registry: &SchemaRegistry,
    table: Table,
    file: FileEntry,
) -> FileOutcome {
    let bytes = match source.read_file(&file.path) {
        Ok(bytes) => bytes,
        Err(e) => return FileOutcome::Failed(FileFailure::new(&file, e)),
    };

    let tree = match parse_document(&bytes) {
        Ok(tree) => tree,
        Err(e) => return FileOutcome::Failed(FileFailure::new(&file, e)),
    };

    let extraction = ExtractionEngine::new(registry).extract(&tree, table);
    debug!(
        path = %file.path,
        elements = tree.element_count(),
        rows = extraction.rows.len(),
        warnings = extraction.warnings.len(),
        "Extracted file"
    );

    FileOutcome::Extracted { file, extraction }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFileSource;
    use chrono::{TimeZone, Utc};

    fn connector(source: MemoryFileSource) -> DuckCreekConnector {
        DuckCreekConnector::new(ConnectorOptions::new("/in"), Arc::new(source))
    }

    #[test]
    fn test_list_tables() {
        let connector = connector(MemoryFileSource::new());
        let tables = connector.list_tables();
        assert_eq!(tables.len(), 13);
        assert!(tables.contains(&"underwriter_referrals"));
    }

    #[test]
    fn test_schema_and_metadata_for_unknown_table() {
        let connector = connector(MemoryFileSource::new());
        assert!(matches!(
            connector.get_table_schema("claims"),
            Err(ConnectorError::UnsupportedTable(_))
        ));
        assert!(matches!(
            connector.get_table_metadata("claims"),
            Err(ConnectorError::UnsupportedTable(_))
        ));
    }

    #[test]
    fn test_from_map_requires_file_path() {
        let result = DuckCreekConnector::from_map(&HashMap::new());
        assert!(matches!(result, Err(ConnectorError::Config(_))));
    }

    #[tokio::test]
    async fn test_read_table_unknown_table() {
        let connector = connector(MemoryFileSource::new());
        let result = connector
            .read_table("claims", &Offset::empty(), &TableOptions::new())
            .await;
        assert!(matches!(result, Err(ConnectorError::UnsupportedTable(_))));
    }

    #[tokio::test]
    async fn test_read_table_orders_by_modified_time() {
        let source = MemoryFileSource::new();
        source.insert(
            "/in/a.xml",
            Utc.timestamp_opt(200, 0).unwrap(),
            r#"<session><data><policy id="LATE"/></data></session>"#,
        );
        source.insert(
            "/in/b.xml",
            Utc.timestamp_opt(100, 0).unwrap(),
            r#"<session><data><policy id="EARLY"/></data></session>"#,
        );

        let batch = connector(source)
            .read_table("policies", &Offset::empty(), &TableOptions::new())
            .await
            .unwrap();

        let keys: Vec<&str> = batch
            .records
            .iter()
            .filter_map(|r| r.get_str("policy_id"))
            .collect();
        assert_eq!(keys, vec!["EARLY", "LATE"]);
        assert_eq!(batch.table, Table::Policies);
    }
}
