//! duckcreek CLI - read Duck Creek policy exports as normalized tables
//!
//! Rows are written to stdout as NDJSON; logs, the new offset and the
//! failure summary go to stderr.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use duckcreek::{
    ConnectorOptions, DuckCreekConnector, NdjsonWriter, Offset, SchemaRegistry, TableOptions,
};

#[derive(Parser)]
#[command(name = "duckcreek")]
#[command(version, about = "Normalize Duck Creek policy XML exports into tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the supported tables
    Tables,

    /// Print a table's columns as JSON
    Schema {
        #[arg(short, long)]
        table: String,
    },

    /// Print a table's primary keys, cursor field and ingestion type
    Metadata {
        #[arg(short, long)]
        table: String,
    },

    /// Read a table from the export directory
    Read {
        #[arg(short, long)]
        table: String,

        /// Only read files modified after this RFC 3339 timestamp
        #[arg(long)]
        offset: Option<String>,

        /// Connector options file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Export directory; overrides the config file and environment
        #[arg(short, long)]
        path: Option<String>,

        /// File glob; overrides the config file and environment
        #[arg(long)]
        pattern: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Tables => list_tables(),
        Commands::Schema { table } => print_schema(&table),
        Commands::Metadata { table } => print_metadata(&table),
        Commands::Read {
            table,
            offset,
            config,
            path,
            pattern,
        } => read_table(&table, offset, config, path, pattern).await,
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn list_tables() -> Result<i32, String> {
    for table in SchemaRegistry::duck_creek().table_names() {
        println!("{}", table);
    }
    Ok(0)
}

fn print_schema(table: &str) -> Result<i32, String> {
    let registry = SchemaRegistry::duck_creek();
    let schema = registry.lookup(table).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(schema.columns())
        .map_err(|e| format!("Failed to serialize schema: {}", e))?;
    println!("{}", json);
    Ok(0)
}

fn print_metadata(table: &str) -> Result<i32, String> {
    let registry = SchemaRegistry::duck_creek();
    let schema = registry.lookup(table).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&schema.metadata)
        .map_err(|e| format!("Failed to serialize metadata: {}", e))?;
    println!("{}", json);
    Ok(0)
}

/// Resolve options: config file, else `--path`, else `DUCK_CREEK_*` env.
fn load_options(
    config: Option<PathBuf>,
    path: Option<String>,
    pattern: Option<String>,
) -> Result<ConnectorOptions, String> {
    let mut options = match (config, &path) {
        (Some(config), _) => ConnectorOptions::load_from_file(config).map_err(|e| e.to_string())?,
        (None, Some(path)) => ConnectorOptions::new(path.clone()),
        (None, None) => ConnectorOptions::from_env().map_err(|e| {
            format!("{} (pass --path, --config or set DUCK_CREEK_FILE_PATH)", e)
        })?,
    };

    if let Some(path) = path {
        options.file_path = path;
    }
    if let Some(pattern) = pattern {
        options.file_pattern = pattern;
    }
    Ok(options)
}

fn parse_offset(offset: Option<String>) -> Result<Offset, String> {
    match offset {
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|ts| Offset::at(ts.with_timezone(&Utc)))
            .map_err(|e| format!("Invalid offset '{}': {}", raw, e)),
        None => Ok(Offset::empty()),
    }
}

async fn read_table(
    table: &str,
    offset: Option<String>,
    config: Option<PathBuf>,
    path: Option<String>,
    pattern: Option<String>,
) -> Result<i32, String> {
    let options = load_options(config, path, pattern)?;
    let offset = parse_offset(offset)?;
    let connector = DuckCreekConnector::local(options);

    let batch = connector
        .read_table(table, &offset, &TableOptions::new())
        .await
        .map_err(|e| e.to_string())?;

    let stdout = io::stdout();
    let mut writer = NdjsonWriter::new(stdout.lock());
    writer.write_batch(&batch).map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())?;

    let offset_json = batch.offset.to_json().map_err(|e| e.to_string())?;
    eprintln!("offset: {}", offset_json);
    eprintln!(
        "rows: {}, warnings: {}",
        batch.records.len(),
        batch.warnings.len()
    );

    match &batch.partial {
        Some(partial) => {
            eprintln!("partial batch: {}", partial);
            Ok(2)
        }
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset(None), Ok(Offset::empty()));

        let offset = parse_offset(Some("1970-01-01T00:03:20Z".to_string())).unwrap();
        assert_eq!(offset.last_modified_time.map(|t| t.timestamp()), Some(200));

        assert!(parse_offset(Some("yesterday".to_string())).is_err());
    }

    #[test]
    fn test_path_overrides_pattern() {
        let options = load_options(None, Some("/data".to_string()), Some("*.XML".to_string())).unwrap();
        assert_eq!(options.file_path, "/data");
        assert_eq!(options.file_pattern, "*.XML");
    }
}
