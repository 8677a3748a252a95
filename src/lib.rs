//! # duckcreek: Duck Creek Policy Export Connector
//!
//! Reads Duck Creek property-and-casualty policy exports (deeply nested XML
//! documents) and normalizes them into thirteen relationally linked tables,
//! with an incremental cursor over file modification times.
//!
//! ## Pipeline
//!
//! - **Document parser** ([`document`]): bytes to an ordered element tree
//! - **Schema registry** ([`schema`]): table columns, keys and extraction rules
//! - **Extraction engine** ([`runtime::engine`]): one walk per document,
//!   minting keys and threading parent keys down the hierarchy
//! - **Offset tracker** ([`offset`]): which files to read, and where to resume
//! - **Table materializer** ([`materializer`]): rows plus lineage columns
//! - **Connector** ([`connector`]): `list_tables`, `get_table_schema`,
//!   `get_table_metadata` and `read_table`
//!
//! ## Example
//!
//! ```
//! use duckcreek::{parse_document, ExtractionEngine, SchemaRegistry, Table};
//!
//! let xml = br#"<session id="S-1"><data>
//!     <policy id="POL-1">
//!       <line id="LN-1"><coverage id="COV-1"/><coverage id="COV-2"/></line>
//!     </policy>
//! </data></session>"#;
//!
//! let registry = SchemaRegistry::duck_creek();
//! let tree = parse_document(xml).unwrap();
//! let coverages = ExtractionEngine::new(&registry).extract(&tree, Table::Coverages);
//!
//! assert_eq!(coverages.rows.len(), 2);
//! assert_eq!(coverages.rows[1].get_str("line_id"), Some("LN-1"));
//! ```

// Core modules
pub mod document;
pub mod entity;
pub mod extraction;
pub mod schema;
pub mod serialization;

// Document walking and options
pub mod runtime;

// Incremental reads
pub mod connector;
pub mod materializer;
pub mod offset;
pub mod source;

// Re-export key types
pub use document::{parse_document, MalformedDocument, XmlNode};
pub use entity::{CoercionError, ColumnType, FieldValue, Record};
pub use extraction::{Extractor, FieldPath};
pub use schema::{
    ColumnDef, IngestionType, SchemaRegistry, Scope, Table, TableMetadata, TableSchema,
    UnsupportedTable,
};

pub use runtime::{
    ConfigError, ConnectorOptions, Extraction, ExtractionEngine, ExtractionSet, ExtractionWarning,
    FieldCoercionWarning, TableOptions,
};

pub use connector::{ConnectorError, DuckCreekConnector};
pub use materializer::{FileFailure, PartialBatchError, TableBatch};
pub use offset::{Offset, OffsetPolicy, OffsetTracker};
pub use source::{FileEntry, FileSource, LocalFileSource, MemoryFileSource, SourceError};
pub use serialization::{JsonArrayWriter, NdjsonWriter, SerializationError};
