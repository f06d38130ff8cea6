//! Trace ingestion.
//!
//! Discovers append-only `*.jsonl` / `*.ndjson` logs under a root, parses
//! them tolerantly line by line, routes each file either to the canonical
//! event parser or to a [`TranscriptAdapter`], and groups the resulting
//! events into per-session logs sorted by `(timestamp, id)`.

pub mod transcript;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::domain::event::timestamp;
use crate::domain::{Event, EventMetrics, EventType, Result, SessionLog, TrajevalError};
use crate::metrics::METRICS;

pub use transcript::{AdapterContext, HarnessTranscriptAdapter, TranscriptAdapter};

/// File extensions treated as trace logs.
pub const LOG_EXTENSIONS: &[&str] = &["jsonl", "ndjson"];

/// How files are interpreted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceFormat {
    /// Canonical when at least one record has the canonical shape, else transcript.
    #[default]
    Auto,
    Canonical,
    Transcript,
}

impl TraceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Canonical => "canonical",
            Self::Transcript => "transcript",
        }
    }
}

impl FromStr for TraceFormat {
    type Err = TrajevalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "canonical" | "native" => Ok(Self::Canonical),
            "transcript" => Ok(Self::Transcript),
            other => Err(TrajevalError::InvalidConfiguration(format!(
                "unknown trace format {other:?} (expected auto, canonical or transcript)"
            ))),
        }
    }
}

/// Why a record was not turned into a canonical event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidJson,
    NotAnObject,
    MissingField(&'static str),
    InvalidTimestamp,
    UnknownEventType(String),
}

/// Tagged result of parsing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordParse {
    Event(Event),
    Skip(SkipReason),
}

/// Parse one log line as a canonical event.
pub fn parse_canonical_line(line: &str) -> RecordParse {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => parse_canonical_value(&value),
        Err(_) => RecordParse::Skip(SkipReason::InvalidJson),
    }
}

/// Check the canonical shape at runtime and build an [`Event`].
pub fn parse_canonical_value(value: &serde_json::Value) -> RecordParse {
    let Some(obj) = value.as_object() else {
        return RecordParse::Skip(SkipReason::NotAnObject);
    };
    let text = |key: &'static str| obj.get(key).and_then(|v| v.as_str());

    let Some(id) = text("id").filter(|s| !s.is_empty()) else {
        return RecordParse::Skip(SkipReason::MissingField("id"));
    };
    let Some(session_id) = text("sessionId").filter(|s| !s.is_empty()) else {
        return RecordParse::Skip(SkipReason::MissingField("sessionId"));
    };
    let Some(type_name) = text("type") else {
        return RecordParse::Skip(SkipReason::MissingField("type"));
    };
    let Some(event_type) = EventType::from_wire(type_name) else {
        return RecordParse::Skip(SkipReason::UnknownEventType(type_name.to_string()));
    };
    let Some(ts_value) = obj.get("timestamp") else {
        return RecordParse::Skip(SkipReason::MissingField("timestamp"));
    };
    let Some(ts) = timestamp::parse_value(ts_value) else {
        return RecordParse::Skip(SkipReason::InvalidTimestamp);
    };

    // Malformed metrics degrade to "no metrics" rather than dropping the event.
    let metrics = obj
        .get("metrics")
        .and_then(|m| serde_json::from_value::<EventMetrics>(m.clone()).ok());

    RecordParse::Event(Event {
        id: id.to_string(),
        timestamp: ts,
        session_id: session_id.to_string(),
        harness: text("harness").unwrap_or_default().to_string(),
        scope: text("scope").unwrap_or_default().to_string(),
        event_type,
        payload: obj.get("payload").cloned().unwrap_or(serde_json::Value::Null),
        metrics,
    })
}

/// Options for one ingestion pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestOptions {
    pub format: TraceFormat,
    /// Tool/harness name handed to the transcript adapter.
    pub tool_name: String,
    /// Harness label for adapted events; defaults to `tool_name`.
    pub harness: Option<String>,
    /// Scope label for adapted events; defaults to the file's parent directory.
    pub scope: Option<String>,
}

/// Scan counts reported alongside the evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanCounts {
    pub files_discovered: usize,
    pub files_canonical: usize,
    pub files_transcript: usize,
    pub files_unsupported: usize,
    pub lines_read: usize,
    pub lines_skipped: usize,
    pub events_ingested: usize,
    pub sessions: usize,
}

/// Sessions plus the scan counts that produced them.
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub sessions: Vec<SessionLog>,
    pub counts: ScanCounts,
}

/// Recursively list log files under `root`, sorted by path.
pub fn discover_log_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(if is_log_file(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        });
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() && is_log_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn is_log_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| LOG_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read JSON-object records from a file, counting lines and discards.
fn read_records(path: &Path, counts: &mut ScanCounts) -> Result<Vec<serde_json::Value>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for chunk in reader.split(b'\n') {
        let bytes = chunk?;
        let Ok(line) = std::str::from_utf8(&bytes) else {
            counts.lines_read += 1;
            counts.lines_skipped += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        counts.lines_read += 1;
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) if value.is_object() => records.push(value),
            _ => counts.lines_skipped += 1,
        }
    }
    Ok(records)
}

/// Ingest every log file under `root` into per-session logs.
///
/// Fails with [`TrajevalError::NoInputFiles`] when the root holds no log files.
pub fn ingest(
    root: &Path,
    options: &IngestOptions,
    adapter: &dyn TranscriptAdapter,
) -> Result<IngestResult> {
    let files = discover_log_files(root)?;
    if files.is_empty() {
        return Err(TrajevalError::NoInputFiles {
            root: root.to_path_buf(),
        });
    }

    let mut counts = ScanCounts {
        files_discovered: files.len(),
        ..ScanCounts::default()
    };
    let mut by_session: BTreeMap<String, Vec<Event>> = BTreeMap::new();

    for path in &files {
        METRICS.inc_files_scanned();
        let skipped_before = counts.lines_skipped;
        let records = read_records(path, &mut counts)?;

        let mut canonical = Vec::new();
        let mut non_canonical = 0usize;
        for record in &records {
            match parse_canonical_value(record) {
                RecordParse::Event(event) => canonical.push(event),
                RecordParse::Skip(_) => non_canonical += 1,
            }
        }

        let use_canonical = match options.format {
            TraceFormat::Canonical => true,
            TraceFormat::Transcript => false,
            TraceFormat::Auto => !canonical.is_empty(),
        };

        let events = if use_canonical {
            if canonical.is_empty() {
                reject(path, options.format, &mut counts);
                continue;
            }
            counts.files_canonical += 1;
            counts.lines_skipped += non_canonical;
            canonical
        } else {
            let ctx = adapter_context(path, root, &records, options);
            let adapted = adapter.convert(&records, &ctx);
            if adapted.is_empty() {
                reject(path, options.format, &mut counts);
                continue;
            }
            counts.files_transcript += 1;
            adapted
        };

        METRICS.add_lines_skipped((counts.lines_skipped - skipped_before) as u64);
        counts.events_ingested += events.len();
        for event in events {
            by_session
                .entry(event.session_id.clone())
                .or_default()
                .push(event);
        }
    }

    let sessions: Vec<SessionLog> = by_session
        .into_iter()
        .map(|(id, events)| SessionLog::new(id, events))
        .collect();
    counts.sessions = sessions.len();
    METRICS.add_events_ingested(counts.events_ingested as u64);
    crate::obs::emit_ingest_completed(root, &counts);

    Ok(IngestResult { sessions, counts })
}

fn reject(path: &Path, format: TraceFormat, counts: &mut ScanCounts) {
    counts.files_unsupported += 1;
    let err = TrajevalError::UnsupportedFormat {
        path: path.to_path_buf(),
        expected: format.as_str().to_string(),
    };
    crate::obs::emit_file_skipped(&err);
}

fn adapter_context(
    path: &Path,
    root: &Path,
    records: &[serde_json::Value],
    options: &IngestOptions,
) -> AdapterContext {
    let session_id = records
        .iter()
        .find_map(|r| {
            r.get("sessionId")
                .or_else(|| r.get("session_id"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
    let scope = options.scope.clone().unwrap_or_else(|| {
        path.parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    AdapterContext {
        session_id,
        harness: options
            .harness
            .clone()
            .unwrap_or_else(|| options.tool_name.clone()),
        scope,
        tool_name: options.tool_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_canonical_requires_fields() {
        assert_eq!(
            parse_canonical_line("not json"),
            RecordParse::Skip(SkipReason::InvalidJson)
        );
        assert_eq!(
            parse_canonical_line("[1,2]"),
            RecordParse::Skip(SkipReason::NotAnObject)
        );
        assert_eq!(
            parse_canonical_value(&json!({"id": "a", "type": "tool_call", "timestamp": 1})),
            RecordParse::Skip(SkipReason::MissingField("sessionId"))
        );
        assert_eq!(
            parse_canonical_value(&json!({"id": "a", "sessionId": "s", "type": "bogus", "timestamp": 1})),
            RecordParse::Skip(SkipReason::UnknownEventType("bogus".to_string()))
        );
        assert_eq!(
            parse_canonical_value(&json!({"id": "a", "sessionId": "s", "type": "message", "timestamp": "yesterday"})),
            RecordParse::Skip(SkipReason::InvalidTimestamp)
        );
    }

    #[test]
    fn test_parse_canonical_tolerates_bad_metrics() {
        let parsed = parse_canonical_value(&json!({
            "id": "a", "sessionId": "s", "type": "tool_result",
            "timestamp": "2026-01-01T00:00:00Z", "metrics": {"latencyMs": "fast"}
        }));
        match parsed {
            RecordParse::Event(e) => assert!(e.metrics.is_none()),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_trace_format_from_str() {
        assert_eq!("AUTO".parse::<TraceFormat>().expect("parse"), TraceFormat::Auto);
        assert_eq!("native".parse::<TraceFormat>().expect("parse"), TraceFormat::Canonical);
        assert!(matches!(
            "xml".parse::<TraceFormat>(),
            Err(TrajevalError::InvalidConfiguration(_))
        ));
    }
}
