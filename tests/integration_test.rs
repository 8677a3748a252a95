//! Integration tests for reading tables through the connector

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use duckcreek::{
    ConnectorError, ConnectorOptions, DuckCreekConnector, FieldValue, FileSource, MemoryFileSource,
    NdjsonWriter, Offset, OffsetPolicy, TableOptions,
};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

const POLICY_A: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<session id="SESSION-A">
  <data>
    <policy id="POL-1">
      <PolicyNumber>PN-1</PolicyNumber>
      <Premium>1000</Premium>
      <line id="LN-1" written="800" change="0">
        <Type>Property</Type>
        <coverage id="COV-1"><Premium>500</Premium></coverage>
        <coverage id="COV-2"><Premium>300</Premium></coverage>
        <lineStateTaxSurcharge><TaxState>TX</TaxState><Amount>4.5</Amount></lineStateTaxSurcharge>
      </line>
      <stateTaxSurcharge><TaxState>TX</TaxState><Amount>10</Amount></stateTaxSurcharge>
      <account id="ACC-1">
        <Name>Acme Holdings</Name>
        <address id="ADDR-1"><Latitude>30.26</Latitude></address>
        <location id="LOC-1" deleted="0">
          <address id="ADDR-2"/>
          <building id="BLD-1"/>
          <occupancy id="OCC-1"/>
        </location>
      </account>
    </policy>
  </data>
</session>"#;

const POLICY_B: &str = r#"<session id="SESSION-B">
  <data>
    <policy id="POL-2">
      <line id="LN-2"><exposure><iValue>12</iValue></exposure></line>
    </policy>
  </data>
</session>"#;

fn memory_source() -> MemoryFileSource {
    let source = MemoryFileSource::new();
    source.insert("/exports/a.xml", ts(100), POLICY_A);
    source.insert("/exports/b.xml", ts(200), POLICY_B);
    source
}

fn connector(source: impl FileSource + 'static) -> DuckCreekConnector {
    DuckCreekConnector::new(ConnectorOptions::new("/exports"), Arc::new(source))
}

fn strs<'a>(batch: &'a duckcreek::TableBatch, column: &str) -> Vec<Option<&'a str>> {
    batch.records.iter().map(|r| r.get_str(column)).collect()
}

#[tokio::test]
async fn test_offset_selects_newer_files() {
    let connector = connector(memory_source());

    let batch = connector
        .read_table("policies", &Offset::at(ts(50)), &TableOptions::new())
        .await
        .unwrap();
    assert_eq!(strs(&batch, "policy_id"), vec![Some("POL-1"), Some("POL-2")]);
    assert_eq!(batch.offset, Offset::at(ts(200)));

    let again = connector
        .read_table("policies", &batch.offset, &TableOptions::new())
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(again.offset, Offset::at(ts(200)));
}

#[tokio::test]
async fn test_policy_lineage_columns() {
    let connector = connector(memory_source());
    let batch = connector
        .read_table("policies", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();

    let first = &batch.records[0];
    assert_eq!(first.get_str("session_id"), Some("SESSION-A"));
    assert_eq!(first.get_str("source_file"), Some("/exports/a.xml"));
    assert_eq!(first.get("file_modified_time"), Some(&FieldValue::Timestamp(ts(100))));
    assert!(matches!(first.get("_extracted_at"), Some(FieldValue::Timestamp(_))));

    let columns: Vec<&str> = first.columns().collect();
    let schema: Vec<&str> = connector
        .get_table_schema("policies")
        .unwrap()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(columns, schema);
}

#[tokio::test]
async fn test_coverages_link_to_line_and_policy() {
    let connector = connector(memory_source());
    let batch = connector
        .read_table("coverages", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();

    assert_eq!(strs(&batch, "coverage_id"), vec![Some("COV-1"), Some("COV-2")]);
    assert_eq!(strs(&batch, "line_id"), vec![Some("LN-1"), Some("LN-1")]);
    assert_eq!(strs(&batch, "policy_id"), vec![Some("POL-1"), Some("POL-1")]);
}

#[tokio::test]
async fn test_tax_surcharges_attach_to_policy_or_line() {
    let connector = connector(memory_source());
    let batch = connector
        .read_table("tax_surcharges", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();

    assert_eq!(batch.len(), 2);
    let line_level = &batch.records[0];
    assert_eq!(line_level.get_str("line_id"), Some("LN-1"));
    assert_eq!(line_level.get_str("policy_id"), Some("POL-1"));

    let policy_level = &batch.records[1];
    assert_eq!(policy_level.get("line_id"), Some(&FieldValue::Null));
    assert_eq!(policy_level.get_str("policy_id"), Some("POL-1"));
    assert_eq!(policy_level.get_str("tax_id"), Some("tax_POL-1_1"));
}

#[tokio::test]
async fn test_addresses_and_locations() {
    let connector = connector(memory_source());

    let addresses = connector
        .read_table("addresses", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();
    assert_eq!(strs(&addresses, "account_id"), vec![Some("ACC-1"), None]);
    assert_eq!(strs(&addresses, "location_id"), vec![None, Some("LOC-1")]);

    let buildings = connector
        .read_table("buildings", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();
    assert_eq!(strs(&buildings, "location_id"), vec![Some("LOC-1")]);
    assert_eq!(strs(&buildings, "policy_id"), vec![Some("POL-1")]);
}

#[tokio::test]
async fn test_every_foreign_key_has_a_parent_row() {
    let connector = connector(memory_source());
    let read = |table: &'static str| {
        let connector = &connector;
        async move {
            connector
                .read_table(table, &Offset::empty(), &TableOptions::new())
                .await
                .unwrap()
        }
    };

    let policies: HashSet<String> = read("policies")
        .await
        .records
        .iter()
        .filter_map(|r| r.get_str("policy_id").map(str::to_string))
        .collect();

    for table in connector.list_tables() {
        if table == "policies" {
            continue;
        }
        let batch = read(table).await;
        for record in &batch.records {
            if let Some(policy_id) = record.get_str("policy_id") {
                assert!(policies.contains(policy_id), "{}: dangling {}", table, policy_id);
            }
        }
    }
}

#[tokio::test]
async fn test_malformed_file_yields_partial_batch() {
    let source = memory_source();
    source.insert("/exports/broken.xml", ts(150), "<session><data><policy></data>");
    let connector = connector(source);

    let batch = connector
        .read_table("policies", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();

    assert_eq!(strs(&batch, "policy_id"), vec![Some("POL-1"), Some("POL-2")]);
    let partial = batch.partial.as_ref().unwrap();
    assert_eq!(partial.failed.len(), 1);
    assert_eq!(partial.failed[0].path, "/exports/broken.xml");
    assert_eq!(partial.succeeded, vec!["/exports/a.xml", "/exports/b.xml"]);

    // The broken file is retried on the next read
    assert_eq!(batch.offset, Offset::at(ts(100)));
}

#[tokio::test]
async fn test_skip_failed_policy_moves_past_broken_file() {
    let source = memory_source();
    source.insert("/exports/broken.xml", ts(150), "not xml at all <");
    let mut options = ConnectorOptions::new("/exports");
    options.offset_policy = OffsetPolicy::SkipFailed;
    let connector = DuckCreekConnector::new(options, Arc::new(source));

    let batch = connector
        .read_table("policies", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();

    assert!(batch.is_partial());
    assert_eq!(batch.offset, Offset::at(ts(200)));
}

#[tokio::test]
async fn test_unsupported_table() {
    let connector = connector(memory_source());
    let result = connector
        .read_table("claims", &Offset::empty(), &TableOptions::new())
        .await;

    match result {
        Err(ConnectorError::UnsupportedTable(e)) => assert_eq!(e.name, "claims"),
        other => panic!("expected UnsupportedTable, got {:?}", other.map(|b| b.len())),
    }
}

#[tokio::test]
async fn test_coercion_warning_is_reported() {
    let source = MemoryFileSource::new();
    source.insert(
        "/exports/a.xml",
        ts(100),
        r#"<session><data><policy id="P"><Premium>n/a</Premium></policy></data></session>"#,
    );
    let batch = connector(source)
        .read_table("policies", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();

    assert_eq!(batch.records[0].get("premium"), Some(&FieldValue::Null));
    assert_eq!(batch.warnings.len(), 1);
    assert!(batch.warnings[0].to_string().contains("premium"));
}

#[tokio::test]
async fn test_local_source_end_to_end() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.xml"), POLICY_A).unwrap();
    fs::write(dir.path().join("ignored.txt"), "not a policy").unwrap();

    let options = ConnectorOptions::new(dir.path().to_str().unwrap());
    let connector = DuckCreekConnector::local(options);

    let batch = connector
        .read_table("lines", &Offset::empty(), &TableOptions::new())
        .await
        .unwrap();

    assert_eq!(strs(&batch, "line_id"), vec![Some("LN-1")]);
    assert!(batch.offset.last_modified_time.is_some());
    assert!(batch.records[0]
        .get_str("source_file")
        .unwrap()
        .ends_with("a.xml"));

    let mut out = Vec::new();
    let mut writer = NdjsonWriter::new(&mut out);
    writer.write_batch(&batch).unwrap();
    assert_eq!(writer.rows_written(), 1);
}

#[tokio::test]
async fn test_missing_directory_is_fatal() {
    let dir = TempDir::new().unwrap();
    let options = ConnectorOptions::new(dir.path().join("absent").to_str().unwrap());

    let result = DuckCreekConnector::local(options)
        .read_table("policies", &Offset::empty(), &TableOptions::new())
        .await;
    assert!(matches!(result, Err(ConnectorError::Source(_))));
}

#[test]
fn test_table_metadata() {
    let connector = connector(MemoryFileSource::new());

    let metadata = connector.get_table_metadata("lines").unwrap();
    assert_eq!(metadata.primary_keys, vec!["line_id", "policy_id"]);
    assert_eq!(metadata.cursor_field, "_extracted_at");

    let json = serde_json::to_value(connector.get_table_metadata("policies").unwrap()).unwrap();
    assert_eq!(json["ingestion_type"], "cdc");
    assert_eq!(json["cursor_field"], "file_modified_time");
}
