//! Per-session event logs and their derived aggregates.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{sort_events, Event, EventType};

/// Label used when a session recorded no model identity.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Ordered events sharing one `sessionId`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLog {
    pub session_id: String,
    /// Sorted by `(timestamp, id)`.
    pub events: Vec<Event>,
}

/// Aggregates used for long-horizon eligibility and stratification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionAggregates {
    pub event_count: usize,
    pub tool_result_count: usize,
    pub checkpoint_count: usize,
    pub hint_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub total_latency_ms: f64,
    pub total_tokens: u64,
    pub models: BTreeSet<String>,
}

impl SessionLog {
    /// Build a session log, sorting the events deterministically.
    pub fn new(session_id: impl Into<String>, mut events: Vec<Event>) -> Self {
        sort_events(&mut events);
        Self {
            session_id: session_id.into(),
            events,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.timestamp)
    }

    /// Distinct model identities mentioned by model-change / message events.
    pub fn models(&self) -> BTreeSet<String> {
        self.events
            .iter()
            .filter_map(|e| e.model())
            .map(str::to_string)
            .collect()
    }

    /// Stratification label for this session's model identity.
    pub fn model_label(&self) -> String {
        model_label(&self.models())
    }

    pub fn aggregates(&self) -> SessionAggregates {
        let started_at = self.events.first().map(|e| e.timestamp);
        let ended_at = self.events.last().map(|e| e.timestamp);
        let duration_ms = match (started_at, ended_at) {
            (Some(s), Some(e)) => (e - s).num_milliseconds(),
            _ => 0,
        };
        SessionAggregates {
            event_count: self.events.len(),
            tool_result_count: self
                .events
                .iter()
                .filter(|e| e.event_type == EventType::ToolResult)
                .count(),
            checkpoint_count: self
                .events
                .iter()
                .filter(|e| e.event_type == EventType::Checkpoint)
                .count(),
            hint_count: self.events.iter().filter(|e| e.is_hint()).count(),
            started_at,
            ended_at,
            duration_ms,
            total_latency_ms: self.events.iter().map(Event::latency_ms).sum(),
            total_tokens: self
                .events
                .iter()
                .map(|e| e.tokens().total())
                .fold(0, u64::saturating_add),
            models: self.models(),
        }
    }
}

/// `unknown`, the single model, or `mixed:<a,b,...>` over a sorted set.
pub fn model_label(models: &BTreeSet<String>) -> String {
    match models.len() {
        0 => UNKNOWN_MODEL.to_string(),
        1 => models.iter().next().cloned().unwrap_or_default(),
        _ => format!(
            "mixed:{}",
            models.iter().cloned().collect::<Vec<_>>().join(",")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn event(id: &str, offset_s: i64, event_type: EventType, payload: serde_json::Value) -> Event {
        Event {
            id: id.to_string(),
            timestamp: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse")
                .with_timezone(&Utc)
                + Duration::seconds(offset_s),
            session_id: "s".to_string(),
            harness: "test".to_string(),
            scope: "repo".to_string(),
            event_type,
            payload,
            metrics: None,
        }
    }

    #[test]
    fn test_aggregates_count_and_duration() {
        let log = SessionLog::new(
            "s",
            vec![
                event("3", 90, EventType::ToolResult, json!({})),
                event("1", 0, EventType::ModelChange, json!({"model": "m-large"})),
                event("2", 30, EventType::Checkpoint, json!({"kind": "hint"})),
            ],
        );
        let agg = log.aggregates();
        assert_eq!(agg.event_count, 3);
        assert_eq!(agg.tool_result_count, 1);
        assert_eq!(agg.checkpoint_count, 1);
        assert_eq!(agg.hint_count, 1);
        assert_eq!(agg.duration_ms, 90_000);
        assert_eq!(log.events[0].id, "1");
        assert_eq!(log.model_label(), "m-large");
    }

    #[test]
    fn test_aggregates_survive_max_token_counts() {
        let raw = json!({
            "id": "big",
            "timestamp": "2026-01-01T00:00:00Z",
            "sessionId": "s",
            "type": "message",
            "payload": {},
            "metrics": {"tokens": {"inputUncached": u64::MAX, "output": 1}}
        });
        let big: Event = serde_json::from_value(raw).expect("deserialize");
        let log = SessionLog::new("s", vec![big.clone(), Event { id: "big2".to_string(), ..big }]);
        assert_eq!(log.aggregates().total_tokens, u64::MAX);
    }

    #[test]
    fn test_model_label_mixed_is_sorted() {
        let models: BTreeSet<String> = ["zeta", "alpha"].iter().map(|s| s.to_string()).collect();
        assert_eq!(model_label(&models), "mixed:alpha,zeta");
        assert_eq!(model_label(&BTreeSet::new()), UNKNOWN_MODEL);
    }
}
