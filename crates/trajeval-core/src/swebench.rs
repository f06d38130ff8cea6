//! Benchmark lane: OFF/ON pairing straight from structured session ids.
//!
//! Session ids look like `prefix::instanceId::off|on::replicate`. Sessions
//! sharing `(instanceId, replicate)` are paired directly, bypassing family
//! clustering. Contaminated sessions (infrastructure failures in captured
//! stderr) are excluded before pairing; censored runs still pair but do not
//! qualify.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Episode, EventType, Mode, Result, SessionAggregates, SessionLog, ToolResultStatus,
    TrajevalError,
};
use crate::pairing::Pair;

/// Parsed benchmark session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweBenchSessionId {
    pub prefix: String,
    pub instance_id: String,
    pub mode: Mode,
    pub replicate: String,
}

/// Parse `prefix::instanceId::off|on::replicate`.
pub fn parse_session_id(session_id: &str) -> Option<SweBenchSessionId> {
    let parts: Vec<&str> = session_id.split("::").collect();
    let [prefix, instance_id, mode, replicate] = parts.as_slice() else {
        return None;
    };
    if [prefix, instance_id, replicate].iter().any(|p| p.trim().is_empty()) {
        return None;
    }
    Some(SweBenchSessionId {
        prefix: prefix.to_string(),
        instance_id: instance_id.to_string(),
        mode: Mode::from_wire(mode)?,
        replicate: replicate.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Contamination
// ---------------------------------------------------------------------------

pub const CONTAMINATION_POLICY_VERSION: &str = "contamination-v1";

/// Transient-infrastructure failure patterns, matched case-insensitively.
pub const DEFAULT_CONTAMINATION_PATTERNS: &[&str] = &[
    r"cannot connect to the docker daemon|docker daemon is not running",
    r"no space left on device",
    r"rate limit(ed)? exceeded|too many requests|\b429\b",
    r"overloaded_error|api is overloaded",
    r"connection reset by peer|econnreset",
    r"temporary failure in name resolution|could not resolve host",
    r"502 bad gateway|503 service unavailable|504 gateway time-?out",
];

/// Versioned list of stderr patterns that mark a run as contaminated.
#[derive(Debug, Clone)]
pub struct ContaminationPolicy {
    version: String,
    patterns: Vec<Regex>,
}

impl ContaminationPolicy {
    pub fn from_patterns<S: AsRef<str>>(version: impl Into<String>, patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p.as_ref())).map_err(|e| {
                    TrajevalError::InvalidConfiguration(format!(
                        "contamination pattern {:?}: {e}",
                        p.as_ref()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            version: version.into(),
            patterns,
        })
    }

    pub fn standard() -> Result<Self> {
        Self::from_patterns(CONTAMINATION_POLICY_VERSION, DEFAULT_CONTAMINATION_PATTERNS)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }

    /// Whether any captured stderr in the session matches a pattern.
    pub fn is_contaminated(&self, session: &SessionLog) -> bool {
        session.events.iter().any(|event| {
            let captured = event.payload_str("stderr").or_else(|| {
                (event.tool_result_status() == ToolResultStatus::Failure)
                    .then(|| event.error_text())
                    .flatten()
            });
            captured.is_some_and(|text| self.matches(text))
        })
    }
}

// ---------------------------------------------------------------------------
// Run quality
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SweBenchOptions {
    /// Runs with fewer tool results are likely censored.
    pub min_tool_results: usize,
}

impl Default for SweBenchOptions {
    fn default() -> Self {
        Self {
            min_tool_results: 1,
        }
    }
}

/// At most one event, no checkpoint, or too few tool results.
pub fn is_likely_censored(aggregates: &SessionAggregates, min_tool_results: usize) -> bool {
    aggregates.event_count <= 1
        || aggregates.checkpoint_count == 0
        || aggregates.tool_result_count < min_tool_results
}

/// Explicit `resolved` flag from the last checkpoint that carries one.
fn resolved_flag(session: &SessionLog) -> Option<bool> {
    session
        .events
        .iter()
        .rev()
        .filter(|e| e.event_type == EventType::Checkpoint)
        .find_map(|e| e.payload.get("resolved").and_then(|v| v.as_bool()))
}

/// Fold one benchmark run into a single session-level episode.
fn summarize_session(
    session: &SessionLog,
    id: &SweBenchSessionId,
    episodes: &[&Episode],
) -> Episode {
    let agg = session.aggregates();
    let started_at = agg.started_at.unwrap_or_default();

    let mut surfaces: BTreeMap<&str, usize> = BTreeMap::new();
    for e in episodes {
        *surfaces.entry(e.tool_surface.as_str()).or_default() += 1;
    }
    let tool_surface = surfaces
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(s, _)| s.to_string())
        .unwrap_or_else(|| "other".to_string());

    let sum = |f: fn(&Episode) -> u64| episodes.iter().map(|e| f(e)).fold(0, u64::saturating_add);
    let sum_f = |f: fn(&Episode) -> f64| episodes.iter().map(|e| f(e)).sum::<f64>();

    Episode {
        id: session.session_id.clone(),
        session_id: session.session_id.clone(),
        family_signature: id.instance_id.clone(),
        tool_surface,
        mode: id.mode,
        model: session.model_label(),
        started_at,
        ended_at: agg.ended_at.unwrap_or(started_at),
        total_retries: sum(|e| e.total_retries),
        harmful_retries: sum(|e| e.harmful_retries),
        benign_retries: sum(|e| e.benign_retries),
        abstained_retries: sum(|e| e.abstained_retries),
        wall_time_ms: sum_f(|e| e.wall_time_ms),
        token_count: sum(|e| e.token_count),
        token_proxy: sum_f(|e| e.token_proxy),
        cost_usd: sum_f(|e| e.cost_usd),
        success: resolved_flag(session).unwrap_or_else(|| episodes.iter().all(|e| e.success)),
        issues: episodes.iter().flat_map(|e| e.issues.iter().copied()).collect(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweBenchDiagnostics {
    pub sessions_seen: usize,
    pub unparsable_session_ids: Vec<String>,
    pub contaminated_sessions: usize,
    pub duplicate_sessions: usize,
    pub unmatched_keys: usize,
    pub pairs_built: usize,
    pub qualified_pairs: usize,
    pub censored_off: usize,
    pub censored_on: usize,
    pub contamination_policy: String,
}

#[derive(Debug, Clone, Default)]
pub struct SweBenchOutcome {
    /// Every OFF/ON pair built, qualified or not.
    pub pairs: Vec<Pair>,
    /// Pairs where neither side is likely censored.
    pub qualified_pairs: Vec<Pair>,
    /// Sessions dropped by the contamination policy.
    pub contaminated_session_ids: BTreeSet<String>,
    pub diagnostics: SweBenchDiagnostics,
}

impl SweBenchOutcome {
    /// Episodes whose session survived the contamination policy.
    pub fn clean_episodes(&self, episodes: &[Episode]) -> Vec<Episode> {
        episodes
            .iter()
            .filter(|e| !self.contaminated_session_ids.contains(&e.session_id))
            .cloned()
            .collect()
    }
}

struct Side<'s> {
    session: &'s SessionLog,
    id: SweBenchSessionId,
}

/// Pair benchmark runs by `(instanceId, replicate)`.
pub fn pair_swebench_sessions(
    sessions: &[SessionLog],
    episodes: &[Episode],
    options: &SweBenchOptions,
    policy: &ContaminationPolicy,
) -> SweBenchOutcome {
    let mut diagnostics = SweBenchDiagnostics {
        sessions_seen: sessions.len(),
        contamination_policy: policy.version().to_string(),
        ..SweBenchDiagnostics::default()
    };

    let mut by_session: HashMap<&str, Vec<&Episode>> = HashMap::new();
    for e in episodes {
        by_session.entry(e.session_id.as_str()).or_default().push(e);
    }

    let mut ordered: Vec<&SessionLog> = sessions.iter().collect();
    ordered.sort_by(|a, b| a.session_id.cmp(&b.session_id));

    let mut contaminated = BTreeSet::new();
    let mut slots: BTreeMap<(String, String), (Option<Side<'_>>, Option<Side<'_>>)> = BTreeMap::new();
    for session in ordered {
        let Some(id) = parse_session_id(&session.session_id) else {
            diagnostics.unparsable_session_ids.push(session.session_id.clone());
            continue;
        };
        if policy.is_contaminated(session) {
            diagnostics.contaminated_sessions += 1;
            contaminated.insert(session.session_id.clone());
            continue;
        }
        let slot = slots
            .entry((id.instance_id.clone(), id.replicate.clone()))
            .or_insert((None, None));
        let side = match id.mode {
            Mode::Off => &mut slot.0,
            Mode::On => &mut slot.1,
        };
        if side.is_some() {
            diagnostics.duplicate_sessions += 1;
        } else {
            *side = Some(Side { session, id });
        }
    }

    let mut outcome = SweBenchOutcome {
        contaminated_session_ids: contaminated,
        ..SweBenchOutcome::default()
    };
    for (off, on) in slots.into_values() {
        let (Some(off), Some(on)) = (off, on) else {
            diagnostics.unmatched_keys += 1;
            continue;
        };
        let summarize = |side: &Side<'_>| {
            let members = by_session
                .get(side.session.session_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();
            summarize_session(side.session, &side.id, members)
        };
        let pair = Pair::from_episodes(&summarize(&off), &summarize(&on));

        let off_censored = is_likely_censored(&off.session.aggregates(), options.min_tool_results);
        let on_censored = is_likely_censored(&on.session.aggregates(), options.min_tool_results);
        diagnostics.censored_off += usize::from(off_censored);
        diagnostics.censored_on += usize::from(on_censored);
        if !off_censored && !on_censored {
            outcome.qualified_pairs.push(pair.clone());
        }
        outcome.pairs.push(pair);
    }

    diagnostics.pairs_built = outcome.pairs.len();
    diagnostics.qualified_pairs = outcome.qualified_pairs.len();
    outcome.diagnostics = diagnostics;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Event;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn session(id: &str, events: &[(EventType, serde_json::Value)]) -> SessionLog {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let events = events
            .iter()
            .enumerate()
            .map(|(i, (event_type, payload))| Event {
                id: format!("{i:03}"),
                timestamp: t0 + Duration::seconds(i as i64),
                session_id: id.to_string(),
                harness: "swe".to_string(),
                scope: "bench".to_string(),
                event_type: *event_type,
                payload: payload.clone(),
                metrics: None,
            })
            .collect();
        SessionLog::new(id, events)
    }

    fn healthy(id: &str, resolved: bool) -> SessionLog {
        session(
            id,
            &[
                (EventType::ToolResult, json!({"exitCode": 0})),
                (EventType::Checkpoint, json!({"resolved": resolved})),
            ],
        )
    }

    #[test]
    fn test_parse_session_id() {
        let id = parse_session_id("swe::django__django-11099::on::2").expect("parse");
        assert_eq!(id.instance_id, "django__django-11099");
        assert_eq!(id.mode, Mode::On);
        assert_eq!(id.replicate, "2");
        assert!(parse_session_id("swe::x::maybe::1").is_none());
        assert!(parse_session_id("swe::x::on").is_none());
        assert!(parse_session_id("::x::on::1").is_none());
    }

    #[test]
    fn test_pairs_by_instance_and_replicate() {
        let sessions = vec![
            healthy("swe::a::off::1", false),
            healthy("swe::a::on::1", true),
            healthy("swe::a::on::2", true),
            healthy("swe::a::on::1", true),
            healthy("garbage", true),
        ];
        let policy = ContaminationPolicy::standard().expect("policy");
        let outcome = pair_swebench_sessions(&sessions, &[], &SweBenchOptions::default(), &policy);
        let d = &outcome.diagnostics;
        assert_eq!(d.sessions_seen, 5);
        assert_eq!(d.unparsable_session_ids, vec!["garbage".to_string()]);
        assert_eq!(d.duplicate_sessions, 1);
        assert_eq!(d.unmatched_keys, 1);
        assert_eq!(d.pairs_built, 1);
        assert_eq!(d.qualified_pairs, 1);
        let pair = &outcome.pairs[0];
        assert_eq!(pair.family_signature, "a");
        assert!(!pair.success_off);
        assert!(pair.success_on);
    }

    #[test]
    fn test_contaminated_sessions_are_excluded() {
        let sessions = vec![
            session(
                "swe::b::off::1",
                &[
                    (EventType::ToolResult, json!({"exitCode": 1, "stderr": "Cannot connect to the Docker daemon"})),
                    (EventType::Checkpoint, json!({})),
                ],
            ),
            healthy("swe::b::on::1", true),
        ];
        let policy = ContaminationPolicy::standard().expect("policy");
        let outcome = pair_swebench_sessions(&sessions, &[], &SweBenchOptions::default(), &policy);
        assert_eq!(outcome.diagnostics.contaminated_sessions, 1);
        assert_eq!(outcome.diagnostics.unmatched_keys, 1);
        assert!(outcome.pairs.is_empty());
        assert!(outcome.contaminated_session_ids.contains("swe::b::off::1"));
    }

    #[test]
    fn test_censored_pairs_do_not_qualify() {
        let sessions = vec![
            session("swe::c::off::1", &[(EventType::ToolResult, json!({"exitCode": 0}))]),
            healthy("swe::c::on::1", true),
        ];
        let policy = ContaminationPolicy::standard().expect("policy");
        let outcome = pair_swebench_sessions(&sessions, &[], &SweBenchOptions::default(), &policy);
        assert_eq!(outcome.diagnostics.pairs_built, 1);
        assert_eq!(outcome.diagnostics.qualified_pairs, 0);
        assert_eq!(outcome.diagnostics.censored_off, 1);
        assert_eq!(outcome.diagnostics.censored_on, 0);
    }

    #[test]
    fn test_invalid_contamination_pattern() {
        let err = ContaminationPolicy::from_patterns("v", &["("]).expect_err("bad regex");
        assert!(matches!(err, TrajevalError::InvalidConfiguration(_)));
    }
}
