//! Incremental cursor over source-file modification times.
//!
//! The offset is the newest modification time that has been fully processed.
//! A read picks up every file strictly newer than it, then hands back the
//! advanced offset for the caller to persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::source::FileEntry;

/// Persisted read position, serialized as `{"last_modified_time": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    #[serde(default)]
    pub last_modified_time: Option<DateTime<Utc>>,
}

impl Offset {
    /// An offset that has seen nothing; every file is a candidate.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            last_modified_time: Some(timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_modified_time.is_none()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last_modified_time {
            Some(ts) => write!(f, "{}", ts.to_rfc3339()),
            None => write!(f, "<start>"),
        }
    }
}

/// What to do with the offset when some files in a read failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// Hold the offset below the earliest failed file so it is read again
    #[default]
    RetryFailed,
    /// Advance past every attempted file, failed or not
    SkipFailed,
}

impl FromStr for OffsetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry_failed" | "retry" => Ok(OffsetPolicy::RetryFailed),
            "skip_failed" | "skip" => Ok(OffsetPolicy::SkipFailed),
            other => Err(format!("unknown offset policy '{}'", other)),
        }
    }
}

/// Pure offset arithmetic; performs no I/O.
pub struct OffsetTracker;

impl OffsetTracker {
    /// Keep the files modified strictly after the offset.
    ///
    /// Every file is kept when the offset is empty.
    pub fn filter_candidates(files: Vec<FileEntry>, offset: &Offset) -> Vec<FileEntry> {
        match offset.last_modified_time {
            Some(since) => files.into_iter().filter(|f| f.modified > since).collect(),
            None => files,
        }
    }

    /// Advance to the newest processed modification time.
    ///
    /// The offset never moves backwards, and is unchanged when nothing was
    /// processed.
    pub fn advance(offset: &Offset, processed: &[FileEntry]) -> Offset {
        let newest = processed.iter().map(|f| f.modified).max();
        Offset {
            last_modified_time: later(offset.last_modified_time, newest),
        }
    }

    /// Advance after a read in which some files failed.
    ///
    /// # Arguments
    /// * `offset` - Offset the read started from
    /// * `succeeded` - Files read, parsed and extracted
    /// * `failed` - Files that could not be read or parsed
    /// * `policy` - Whether failed files should be retried by the next read
    pub fn advance_with_failures(
        offset: &Offset,
        succeeded: &[FileEntry],
        failed: &[FileEntry],
        policy: OffsetPolicy,
    ) -> Offset {
        let earliest_failure = match (policy, failed.iter().map(|f| f.modified).min()) {
            (OffsetPolicy::RetryFailed, Some(earliest)) => earliest,
            (OffsetPolicy::SkipFailed, _) => {
                let attempted: Vec<FileEntry> =
                    succeeded.iter().chain(failed.iter()).cloned().collect();
                return Self::advance(offset, &attempted);
            }
            (_, None) => return Self::advance(offset, succeeded),
        };

        let newest_safe = succeeded
            .iter()
            .map(|f| f.modified)
            .filter(|modified| *modified < earliest_failure)
            .max();

        Offset {
            last_modified_time: later(offset.last_modified_time, newest_safe),
        }
    }
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn file(path: &str, secs: i64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            modified: ts(secs),
        }
    }

    #[test]
    fn test_filter_candidates_strictly_newer() {
        let files = vec![file("a.xml", 100), file("b.xml", 200)];

        let picked = OffsetTracker::filter_candidates(files.clone(), &Offset::at(ts(50)));
        assert_eq!(picked.len(), 2);

        let picked = OffsetTracker::filter_candidates(files.clone(), &Offset::at(ts(100)));
        assert_eq!(picked, vec![file("b.xml", 200)]);

        let picked = OffsetTracker::filter_candidates(files, &Offset::at(ts(200)));
        assert!(picked.is_empty());
    }

    #[test]
    fn test_empty_offset_keeps_everything() {
        let files = vec![file("a.xml", 100)];
        assert_eq!(OffsetTracker::filter_candidates(files.clone(), &Offset::empty()), files);
    }

    #[test]
    fn test_advance() {
        let processed = vec![file("a.xml", 100), file("b.xml", 200)];
        assert_eq!(
            OffsetTracker::advance(&Offset::at(ts(50)), &processed),
            Offset::at(ts(200))
        );
        assert_eq!(
            OffsetTracker::advance(&Offset::at(ts(200)), &[]),
            Offset::at(ts(200))
        );
        assert_eq!(OffsetTracker::advance(&Offset::empty(), &[]), Offset::empty());
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let processed = vec![file("old.xml", 10)];
        assert_eq!(
            OffsetTracker::advance(&Offset::at(ts(50)), &processed),
            Offset::at(ts(50))
        );
    }

    #[test]
    fn test_retry_failed_holds_before_earliest_failure() {
        let succeeded = vec![file("a.xml", 100), file("c.xml", 300)];
        let failed = vec![file("b.xml", 200)];

        let offset = OffsetTracker::advance_with_failures(
            &Offset::at(ts(50)),
            &succeeded,
            &failed,
            OffsetPolicy::RetryFailed,
        );
        assert_eq!(offset, Offset::at(ts(100)));
    }

    #[test]
    fn test_retry_failed_first_file_keeps_offset() {
        let offset = OffsetTracker::advance_with_failures(
            &Offset::empty(),
            &[file("b.xml", 200)],
            &[file("a.xml", 100)],
            OffsetPolicy::RetryFailed,
        );
        assert!(offset.is_empty());
    }

    #[test]
    fn test_skip_failed_advances_past_failures() {
        let offset = OffsetTracker::advance_with_failures(
            &Offset::at(ts(50)),
            &[file("a.xml", 100)],
            &[file("b.xml", 200)],
            OffsetPolicy::SkipFailed,
        );
        assert_eq!(offset, Offset::at(ts(200)));
    }

    #[test]
    fn test_offset_json_round_trip() {
        let offset = Offset::at(ts(200));
        let json = offset.to_json().unwrap();
        assert!(json.contains("last_modified_time"));
        assert_eq!(Offset::from_json(&json).unwrap(), offset);

        assert_eq!(Offset::from_json("{}").unwrap(), Offset::empty());
        assert_eq!(
            Offset::from_json(r#"{"last_modified_time": null}"#).unwrap(),
            Offset::empty()
        );
    }

    #[test]
    fn test_offset_policy_from_str() {
        assert_eq!("skip_failed".parse::<OffsetPolicy>(), Ok(OffsetPolicy::SkipFailed));
        assert_eq!("Retry".parse::<OffsetPolicy>(), Ok(OffsetPolicy::RetryFailed));
        assert!("sometimes".parse::<OffsetPolicy>().is_err());
    }
}
