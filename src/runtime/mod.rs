//! Document walking and connector options.
//!
//! The engine turns a parsed document into table rows; the context carries
//! open hierarchy levels during that walk.

pub mod config_loader;
pub mod context;
pub mod engine;

// Re-export key types
pub use config_loader::{ConfigError, ConnectorOptions, TableOptions};
pub use context::{ExtractionContext, Frame};
pub use engine::{Extraction, ExtractionEngine, ExtractionSet, ExtractionWarning, FieldCoercionWarning};
