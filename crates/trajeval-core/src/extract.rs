//! Episode extraction.
//!
//! Scans one session's chronological event stream with a small state
//! machine. While WATCHING there is no open failure; a failing `tool_result`
//! opens an episode (IN_EPISODE). Same-family failures accumulate as retries,
//! a same-family success closes the episode as recovered, and an unrelated
//! failure or the end of the session closes it as abandoned.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{IssueClassifier, IssueVerdict, RetryAttempt};
use crate::domain::{Episode, Event, EventType, Issue, Mode, SessionLog, TokenUsage, ToolResultStatus};
use crate::metrics::METRICS;
use crate::signature::{normalize, FamilySignature};

/// Weights turning raw token usage into the proxy metric and a USD cost.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenWeights {
    pub input_uncached: f64,
    pub input_cached: f64,
    pub cache_write: f64,
    pub output: f64,
    pub thinking: f64,
    pub usd_per_proxy_token: f64,
}

impl Default for TokenWeights {
    fn default() -> Self {
        Self {
            input_uncached: 1.0,
            input_cached: 0.1,
            cache_write: 1.25,
            output: 5.0,
            thinking: 5.0,
            usd_per_proxy_token: 3e-6,
        }
    }
}

impl TokenWeights {
    pub fn proxy(&self, tokens: &TokenUsage) -> f64 {
        tokens.input_uncached as f64 * self.input_uncached
            + tokens.input_cached as f64 * self.input_cached
            + tokens.cache_write as f64 * self.cache_write
            + tokens.output as f64 * self.output
            + tokens.thinking as f64 * self.thinking
    }
}

/// Extracts episodes using an injected issue classifier.
pub struct EpisodeExtractor<'c> {
    classifier: &'c dyn IssueClassifier,
    weights: TokenWeights,
}

struct OpenEpisode {
    signature: FamilySignature,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    total_retries: u64,
    harmful_retries: u64,
    benign_retries: u64,
    abstained_retries: u64,
    wall_time_ms: f64,
    tokens: TokenUsage,
    issues: Vec<Issue>,
    last_error: Option<String>,
}

impl OpenEpisode {
    fn absorb(&mut self, event: &Event) {
        self.wall_time_ms += event.latency_ms();
        self.tokens.add(&event.tokens());
        self.ended_at = event.timestamp;
    }

    fn record(&mut self, verdict: IssueVerdict, error_text: Option<&str>) {
        self.total_retries += 1;
        match verdict {
            IssueVerdict::Judged(issue) => {
                if issue.harmful {
                    self.harmful_retries += 1;
                } else {
                    self.benign_retries += 1;
                }
                self.issues.push(issue);
            }
            IssueVerdict::Abstain => self.abstained_retries += 1,
        }
        self.last_error = error_text.map(str::to_string);
    }
}

/// Session-scoped context the state machine carries alongside the open episode.
#[derive(Default)]
struct SessionCursor<'e> {
    commands: HashMap<&'e str, &'e str>,
    last_command: Option<&'e str>,
    declared_mode: Option<Mode>,
    hint_seen: bool,
}

impl<'e> SessionCursor<'e> {
    fn observe(&mut self, event: &'e Event) {
        if let Some(mode) = event.declared_mode() {
            self.declared_mode = Some(mode);
        }
        if event.is_hint() {
            self.hint_seen = true;
        }
        if event.event_type == EventType::ToolCall {
            let command = event
                .command_text()
                .or_else(|| event.payload_str("toolName"));
            if let Some(command) = command {
                let call_id = event.payload_str("id").unwrap_or(event.id.as_str());
                self.commands.insert(call_id, command);
                self.last_command = Some(command);
            }
        }
    }

    fn command_for(&self, result: &'e Event) -> Option<&'e str> {
        result
            .command_text()
            .or_else(|| result.tool_call_ref().and_then(|id| self.commands.get(id).copied()))
            .or(self.last_command)
            .or_else(|| result.payload_str("toolName"))
    }

    fn mode(&self) -> Mode {
        self.declared_mode.unwrap_or(if self.hint_seen {
            Mode::On
        } else {
            Mode::Off
        })
    }
}

impl<'c> EpisodeExtractor<'c> {
    pub fn new(classifier: &'c dyn IssueClassifier, weights: TokenWeights) -> Self {
        Self {
            classifier,
            weights,
        }
    }

    /// Extract every episode of one session, in start order.
    pub fn extract(&self, session: &SessionLog) -> Vec<Episode> {
        let model = session.model_label();
        let mut cursor = SessionCursor::default();
        let mut open: Option<OpenEpisode> = None;
        let mut episodes = Vec::new();

        for event in &session.events {
            cursor.observe(event);
            let status = event.tool_result_status();

            if status == ToolResultStatus::Neutral {
                if let Some(current) = open.as_mut() {
                    current.absorb(event);
                }
                continue;
            }

            let command = cursor.command_for(event);
            let error_text = event.error_text();
            let signature = match event.payload_str("familySignature") {
                Some(explicit) => FamilySignature::explicit(explicit),
                None => normalize(command, error_text, event.exit_code()),
            };

            let same_family = open
                .as_ref()
                .map(|current| current.signature.match_key == signature.match_key);

            match (status, same_family) {
                (ToolResultStatus::Failure, Some(true)) => {
                    if let Some(current) = open.as_mut() {
                        current.absorb(event);
                        let verdict = self.classify(
                            event,
                            command,
                            error_text,
                            current.total_retries + 1,
                            current.last_error.as_deref(),
                        );
                        current.record(verdict, error_text);
                    }
                }
                (ToolResultStatus::Success, Some(recovered)) => {
                    if let Some(current) = open.as_mut() {
                        current.absorb(event);
                    }
                    if recovered {
                        if let Some(done) = open.take() {
                            let ordinal = episodes.len();
                            episodes.push(self.close(session, &model, &cursor, done, true, ordinal));
                        }
                    }
                }
                (ToolResultStatus::Failure, _) => {
                    if let Some(done) = open.take() {
                        let ordinal = episodes.len();
                        episodes.push(self.close(session, &model, &cursor, done, false, ordinal));
                    }
                    // The opening failure is attempt #1; only repeats are judged.
                    let mut fresh = OpenEpisode {
                        signature,
                        started_at: event.timestamp,
                        ended_at: event.timestamp,
                        total_retries: 1,
                        harmful_retries: 0,
                        benign_retries: 0,
                        abstained_retries: 0,
                        wall_time_ms: 0.0,
                        tokens: TokenUsage::default(),
                        issues: Vec::new(),
                        last_error: error_text.map(str::to_string),
                    };
                    fresh.absorb(event);
                    open = Some(fresh);
                }
                _ => {}
            }
        }

        if let Some(done) = open.take() {
            let ordinal = episodes.len();
            episodes.push(self.close(session, &model, &cursor, done, false, ordinal));
        }

        tracing::debug!(
            event = "episodes.extracted",
            session_id = %session.session_id,
            episodes = episodes.len(),
        );
        episodes
    }

    fn classify(
        &self,
        event: &Event,
        command: Option<&str>,
        error_text: Option<&str>,
        attempt_index: u64,
        previous_error_text: Option<&str>,
    ) -> IssueVerdict {
        self.classifier.classify(&RetryAttempt {
            event,
            command,
            error_text,
            attempt_index,
            previous_error_text,
        })
    }

    fn close(
        &self,
        session: &SessionLog,
        model: &str,
        cursor: &SessionCursor<'_>,
        done: OpenEpisode,
        success: bool,
        ordinal: usize,
    ) -> Episode {
        METRICS.inc_episodes_extracted();
        let token_proxy = self.weights.proxy(&done.tokens);
        Episode {
            id: format!("{}#{}", session.session_id, ordinal),
            session_id: session.session_id.clone(),
            family_signature: done.signature.key,
            tool_surface: done.signature.surface,
            mode: cursor.mode(),
            model: model.to_string(),
            started_at: done.started_at,
            ended_at: done.ended_at,
            total_retries: done.total_retries,
            harmful_retries: done.harmful_retries,
            benign_retries: done.benign_retries,
            abstained_retries: done.abstained_retries,
            wall_time_ms: done.wall_time_ms,
            token_count: done.tokens.total(),
            token_proxy,
            cost_usd: token_proxy * self.weights.usd_per_proxy_token,
            success,
            issues: done.issues,
        }
    }
}

/// Extract episodes from every session, ordered by `(startedAt, id)`.
pub fn extract_episodes(
    sessions: &[SessionLog],
    classifier: &dyn IssueClassifier,
    weights: TokenWeights,
) -> Vec<Episode> {
    let extractor = EpisodeExtractor::new(classifier, weights);
    let mut episodes: Vec<Episode> = sessions.iter().flat_map(|s| extractor.extract(s)).collect();
    episodes.sort_by(|a, b| a.chrono_key().cmp(&b.chrono_key()));
    episodes
}
