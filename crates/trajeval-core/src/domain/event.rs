//! Canonical trace events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a canonical event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ToolCall,
    ToolResult,
    Checkpoint,
    ModelChange,
    Message,
}

impl EventType {
    /// Parse the wire name of an event type.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "tool_call" => Some(Self::ToolCall),
            "tool_result" => Some(Self::ToolResult),
            "checkpoint" => Some(Self::Checkpoint),
            "model_change" => Some(Self::ModelChange),
            "message" => Some(Self::Message),
            _ => None,
        }
    }
}

/// Token usage attached to an event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    pub input_uncached: u64,
    pub input_cached: u64,
    pub output: u64,
    pub thinking: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    /// Unweighted sum of every token field, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        [self.input_cached, self.output, self.thinking, self.cache_write]
            .into_iter()
            .fold(self.input_uncached, u64::saturating_add)
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_uncached = self.input_uncached.saturating_add(other.input_uncached);
        self.input_cached = self.input_cached.saturating_add(other.input_cached);
        self.output = self.output.saturating_add(other.output);
        self.thinking = self.thinking.saturating_add(other.thinking);
        self.cache_write = self.cache_write.saturating_add(other.cache_write);
    }
}

/// Optional per-event measurements.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventMetrics {
    pub latency_ms: Option<f64>,
    pub outcome: Option<String>,
    pub tokens: Option<TokenUsage>,
}

/// How a `tool_result` event resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultStatus {
    Failure,
    Success,
    Neutral,
}

/// Immutable canonical event record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default)]
    pub harness: String,
    #[serde(default)]
    pub scope: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EventMetrics>,
}

impl Event {
    /// Ordering key: timestamp ascending, lexical tie-break on id.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, self.id.as_str())
    }

    pub fn latency_ms(&self) -> f64 {
        self.metrics
            .as_ref()
            .and_then(|m| m.latency_ms)
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(0.0)
    }

    pub fn tokens(&self) -> TokenUsage {
        self.metrics
            .as_ref()
            .and_then(|m| m.tokens)
            .unwrap_or_default()
    }

    /// String field from the payload, if present and non-empty.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.payload.get("exitCode").and_then(|v| v.as_i64())
    }

    /// Interpret a `tool_result` as failure, success or neither.
    pub fn tool_result_status(&self) -> ToolResultStatus {
        if self.event_type != EventType::ToolResult {
            return ToolResultStatus::Neutral;
        }
        if let Some(outcome) = self.metrics.as_ref().and_then(|m| m.outcome.as_deref()) {
            match outcome.to_ascii_lowercase().as_str() {
                "error" | "failure" | "failed" | "timeout" => return ToolResultStatus::Failure,
                "success" | "ok" | "passed" => return ToolResultStatus::Success,
                _ => {}
            }
        }
        if let Some(is_error) = self.payload.get("isError").and_then(|v| v.as_bool()) {
            return if is_error {
                ToolResultStatus::Failure
            } else {
                ToolResultStatus::Success
            };
        }
        match self.exit_code() {
            Some(0) => ToolResultStatus::Success,
            Some(_) => ToolResultStatus::Failure,
            None => ToolResultStatus::Neutral,
        }
    }

    /// Command text carried directly by the event.
    pub fn command_text(&self) -> Option<&str> {
        self.payload_str("command").or_else(|| {
            self.payload
                .get("input")
                .and_then(|i| i.get("command"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        })
    }

    /// Error text: stderr, then error, then output.
    pub fn error_text(&self) -> Option<&str> {
        self.payload_str("stderr")
            .or_else(|| self.payload_str("error"))
            .or_else(|| self.payload_str("output"))
    }

    /// Identifier a `tool_result` uses to point back at its `tool_call`.
    pub fn tool_call_ref(&self) -> Option<&str> {
        self.payload_str("toolCallId")
    }

    /// Whether this event surfaced a hint to the agent.
    pub fn is_hint(&self) -> bool {
        matches!(
            self.event_type,
            EventType::Checkpoint | EventType::Message
        ) && (self.payload_str("kind") == Some("hint") || self.payload.get("hint").is_some())
    }

    /// Explicit `mode` declaration (`on` / `off`) on a checkpoint or message.
    pub fn declared_mode(&self) -> Option<super::episode::Mode> {
        if !matches!(
            self.event_type,
            EventType::Checkpoint | EventType::Message
        ) {
            return None;
        }
        self.payload_str("mode")
            .and_then(super::episode::Mode::from_wire)
    }

    /// Model identity carried by a `model_change` or `message` event.
    pub fn model(&self) -> Option<&str> {
        match self.event_type {
            EventType::ModelChange | EventType::Message => self
                .payload_str("model")
                .or_else(|| self.payload_str("to")),
            _ => None,
        }
    }
}

/// Sort events by `(timestamp, id)`.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Timestamps serialize as RFC 3339 and deserialize from RFC 3339 strings or
/// epoch milliseconds.
pub mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let value = serde_json::Value::deserialize(d)?;
        parse_value(&value).ok_or_else(|| de::Error::custom("invalid timestamp"))
    }

    /// Parse a JSON timestamp value.
    pub fn parse_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
        match value {
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            _ => None,
        }
    }
}
