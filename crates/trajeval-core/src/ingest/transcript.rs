//! Adapter from external harness transcripts to canonical events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::domain::event::timestamp;
use crate::domain::{Event, EventMetrics, EventType, TokenUsage};

/// Session-level labels the adapter stamps onto every event it produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterContext {
    pub session_id: String,
    pub harness: String,
    pub scope: String,
    pub tool_name: String,
}

/// Converts a batch of harness-specific records into canonical events.
pub trait TranscriptAdapter {
    fn convert(&self, records: &[Value], ctx: &AdapterContext) -> Vec<Event>;
}

/// Adapter for assistant/user transcripts with `tool_use` / `tool_result`
/// content blocks.
///
/// Records look like `{"type": "assistant", "timestamp": ..., "message":
/// {"model": ..., "content": [...], "usage": {...}}}`. A record of type
/// `hint` (or carrying a `hint` field) becomes a hint checkpoint, and a
/// top-level `mode` field becomes a mode declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarnessTranscriptAdapter;

struct Builder<'c> {
    ctx: &'c AdapterContext,
    events: Vec<Event>,
}

impl Builder<'_> {
    fn push(
        &mut self,
        ordinal: (usize, usize),
        ts: DateTime<Utc>,
        event_type: EventType,
        payload: Value,
        metrics: Option<EventMetrics>,
    ) {
        self.events.push(Event {
            // Zero-padded ordinals keep the lexical tie-break in file order.
            id: format!("{}:{:08}:{:03}", self.ctx.tool_name, ordinal.0, ordinal.1),
            timestamp: ts,
            session_id: self.ctx.session_id.clone(),
            harness: self.ctx.harness.clone(),
            scope: self.ctx.scope.clone(),
            event_type,
            payload,
            metrics,
        });
    }
}

fn usage_tokens(usage: &Value) -> TokenUsage {
    let field = |k: &str| usage.get(k).and_then(|v| v.as_u64()).unwrap_or(0);
    TokenUsage {
        input_uncached: field("input_tokens"),
        input_cached: field("cache_read_input_tokens"),
        output: field("output_tokens"),
        thinking: field("thinking_tokens"),
        cache_write: field("cache_creation_input_tokens"),
    }
}

fn block_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

impl TranscriptAdapter for HarnessTranscriptAdapter {
    fn convert(&self, records: &[Value], ctx: &AdapterContext) -> Vec<Event> {
        let mut out = Builder {
            ctx,
            events: Vec::new(),
        };
        let mut last_ts: Option<DateTime<Utc>> = None;
        let mut last_model: Option<String> = None;
        let mut calls: HashMap<String, DateTime<Utc>> = HashMap::new();

        for (i, record) in records.iter().enumerate() {
            let ts = record
                .get("timestamp")
                .and_then(timestamp::parse_value)
                .or(last_ts);
            let Some(ts) = ts else { continue };
            last_ts = Some(ts);

            let kind = record.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let mut j = 0usize;

            if let Some(mode) = record.get("mode").and_then(|v| v.as_str()) {
                out.push((i, j), ts, EventType::Checkpoint, json!({ "mode": mode }), None);
                j += 1;
            }
            if kind == "hint" || record.get("hint").is_some() {
                let hint = record.get("hint").cloned().unwrap_or(Value::Null);
                out.push(
                    (i, j),
                    ts,
                    EventType::Checkpoint,
                    json!({ "kind": "hint", "hint": hint }),
                    None,
                );
                j += 1;
            }

            let Some(message) = record.get("message") else {
                continue;
            };

            if kind == "assistant" {
                let model = message.get("model").and_then(|v| v.as_str());
                if let Some(model) = model {
                    if last_model.as_deref() != Some(model) {
                        out.push((i, j), ts, EventType::ModelChange, json!({ "model": model }), None);
                        j += 1;
                        last_model = Some(model.to_string());
                    }
                }
                if let Some(usage) = message.get("usage") {
                    out.push(
                        (i, j),
                        ts,
                        EventType::Message,
                        json!({ "role": "assistant", "model": model }),
                        Some(EventMetrics {
                            latency_ms: None,
                            outcome: None,
                            tokens: Some(usage_tokens(usage)),
                        }),
                    );
                    j += 1;
                }
            }

            let Some(blocks) = message.get("content").and_then(|c| c.as_array()) else {
                continue;
            };
            for block in blocks {
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("tool_use") => {
                        let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                        let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                        let input = block.get("input").cloned().unwrap_or(Value::Null);
                        let command = input.get("command").and_then(|v| v.as_str());
                        calls.insert(id.to_string(), ts);
                        out.push(
                            (i, j),
                            ts,
                            EventType::ToolCall,
                            json!({ "id": id, "toolName": name, "command": command, "input": input }),
                            None,
                        );
                        j += 1;
                    }
                    Some("tool_result") => {
                        let call_id = block
                            .get("tool_use_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        let is_error = block
                            .get("is_error")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false);
                        let text = block_text(block.get("content").unwrap_or(&Value::Null));
                        let stderr = record
                            .get("toolUseResult")
                            .and_then(|r| r.get("stderr"))
                            .and_then(|v| v.as_str())
                            .filter(|s| !s.is_empty())
                            .map(str::to_string);
                        let latency_ms = calls
                            .get(call_id)
                            .map(|start| (ts - *start).num_milliseconds().max(0) as f64);
                        let mut payload = json!({
                            "toolCallId": call_id,
                            "isError": is_error,
                            "output": text,
                        });
                        if let Some(stderr) = stderr {
                            payload["stderr"] = Value::String(stderr);
                        } else if is_error {
                            payload["stderr"] = payload["output"].clone();
                        }
                        out.push(
                            (i, j),
                            ts,
                            EventType::ToolResult,
                            payload,
                            Some(EventMetrics {
                                latency_ms,
                                outcome: Some(if is_error { "error" } else { "success" }.to_string()),
                                tokens: None,
                            }),
                        );
                        j += 1;
                    }
                    _ => {}
                }
            }
        }

        out.events
    }
}
