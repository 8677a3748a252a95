//! Writers for emitting table rows.
//!
//! Rows serialize as flat JSON objects in schema column order; timestamps
//! are RFC 3339 strings and nulls are explicit.

use serde::Serialize;
use std::io::Write;

use crate::entity::Record;
use crate::materializer::TableBatch;

/// Error type for serialization operations
#[derive(Debug)]
pub enum SerializationError {
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err)
    }
}

impl From<std::io::Error> for SerializationError {
    fn from(err: std::io::Error) -> Self {
        SerializationError::Io(err)
    }
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::Json(e) => write!(f, "JSON error: {}", e),
            SerializationError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(e) => Some(e),
            SerializationError::Io(e) => Some(e),
        }
    }
}

/// NDJSON (Newline Delimited JSON) writer
///
/// One row per line, so output can be streamed into a loader.
pub struct NdjsonWriter<W: Write> {
    writer: W,
    rows: usize,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, rows: 0 }
    }

    /// Write one value as a line
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), SerializationError> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_records(&mut self, records: &[Record]) -> Result<(), SerializationError> {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Write every row of a batch
    pub fn write_batch(&mut self, batch: &TableBatch) -> Result<(), SerializationError> {
        self.write_records(&batch.records)
    }

    /// Lines written so far
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<(), SerializationError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// JSON array writer
///
/// Writes rows as a single JSON array.
pub struct JsonArrayWriter<W: Write> {
    writer: W,
    first: bool,
}

impl<W: Write> JsonArrayWriter<W> {
    /// Create the writer and emit the opening bracket
    pub fn new(mut writer: W) -> Result<Self, SerializationError> {
        write!(writer, "[")?;
        Ok(Self {
            writer,
            first: true,
        })
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), SerializationError> {
        if !self.first {
            write!(self.writer, ",")?;
        }
        self.first = false;

        serde_json::to_writer(&mut self.writer, value)?;
        Ok(())
    }

    pub fn write_records(&mut self, records: &[Record]) -> Result<(), SerializationError> {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Close the array and flush
    pub fn finish(mut self) -> Result<(), SerializationError> {
        write!(self.writer, "]")?;
        self.writer.flush()?;
        Ok(())
    }
}
