//! Per-retry issue classification.
//!
//! Classification is policy, not structure: [`IssueClassifier`] is injected
//! into the episode extractor so rules can change without touching
//! extraction, pairing or statistics. [`HeuristicIssueClassifier`] is the
//! default, regex-driven policy.

use regex::Regex;

use crate::domain::{Event, Issue, IssueKind, Result, TrajevalError};

/// Everything a classifier may look at for one failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryAttempt<'a> {
    pub event: &'a Event,
    pub command: Option<&'a str>,
    pub error_text: Option<&'a str>,
    /// 1 for the opening failure of an episode.
    pub attempt_index: u64,
    /// Error text of the previous failed attempt in the same episode.
    pub previous_error_text: Option<&'a str>,
}

/// Outcome of classifying one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueVerdict {
    Judged(Issue),
    /// The classifier cannot judge harm for this attempt.
    Abstain,
}

/// Capability interface for issue/harm classification.
pub trait IssueClassifier {
    fn classify(&self, attempt: &RetryAttempt<'_>) -> IssueVerdict;

    /// Version tag of the policy, recorded in reports.
    fn policy_version(&self) -> &str;
}

/// What a rule's pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    ErrorText,
    Command,
}

/// One ordered classification rule.
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub kind: IssueKind,
    pub harmful: bool,
    pub target: RuleTarget,
    pub pattern: Regex,
}

impl ClassifierRule {
    pub fn new(kind: IssueKind, harmful: bool, target: RuleTarget, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            TrajevalError::InvalidConfiguration(format!("classifier pattern {pattern:?}: {e}"))
        })?;
        Ok(Self {
            kind,
            harmful,
            target,
            pattern,
        })
    }
}

/// Ordered regex rules; first match wins.
#[derive(Debug, Clone)]
pub struct HeuristicIssueClassifier {
    version: String,
    rules: Vec<ClassifierRule>,
}

pub const HEURISTIC_POLICY_VERSION: &str = "heuristic-v1";

const DEFAULT_RULES: &[(IssueKind, bool, RuleTarget, &str)] = &[
    (
        IssueKind::TransientExternal,
        false,
        RuleTarget::ErrorText,
        r"timed ?out|\b50[234]\b|connection reset|econnreset|rate.?limit|too many requests|\b429\b|temporarily unavailable|network is unreachable|could not resolve host|tls handshake",
    ),
    (
        IssueKind::BenignProbe,
        false,
        RuleTarget::Command,
        r"^\s*(which|type|test|stat|ls)\b|^\s*\[\s|^\s*command -v\b|^\s*git (status|rev-parse|remote -v)\b|\s--(version|help)\s*$",
    ),
    (
        IssueKind::CommandMismatch,
        true,
        RuleTarget::ErrorText,
        r"command not found|unknown (option|command|flag|subcommand)|unrecognized (option|argument|arguments|subcommand)|invalid (argument|option)|usage:|no such (command|subcommand)|is not a [a-z-]+ command|unexpected argument",
    ),
    (
        IssueKind::EnvironmentMismatch,
        true,
        RuleTarget::ErrorText,
        r"no such file or directory|modulenotfounderror|cannot find module|module not found|not installed|permission denied|eacces|version mismatch|requires [a-z0-9 .-]*version|unsupported (engine|version)|externally-managed-environment",
    ),
    (
        IssueKind::MissingContext,
        true,
        RuleTarget::ErrorText,
        r"rejected|non-fast-forward|conflict|not a git repository|does not exist|unauthori[sz]ed|\b401\b|\b403\b|forbidden|no upstream|pathspec|did not match any|undefined (reference|variable)|cannot find (symbol|value)",
    ),
];

impl HeuristicIssueClassifier {
    /// Build a classifier from explicit rules.
    pub fn from_rules(version: impl Into<String>, rules: Vec<ClassifierRule>) -> Self {
        Self {
            version: version.into(),
            rules,
        }
    }

    /// The default `heuristic-v1` policy.
    pub fn standard() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(kind, harmful, target, pattern)| {
                ClassifierRule::new(*kind, *harmful, *target, pattern).ok()
            })
            .collect();
        Self::from_rules(HEURISTIC_POLICY_VERSION, rules)
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }
}

impl Default for HeuristicIssueClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

impl IssueClassifier for HeuristicIssueClassifier {
    fn classify(&self, attempt: &RetryAttempt<'_>) -> IssueVerdict {
        let error_text = attempt.error_text.unwrap_or_default().to_ascii_lowercase();
        let command = attempt.command.unwrap_or_default().to_ascii_lowercase();

        for rule in &self.rules {
            let haystack = match rule.target {
                RuleTarget::ErrorText => &error_text,
                RuleTarget::Command => &command,
            };
            if !haystack.is_empty() && rule.pattern.is_match(haystack) {
                return IssueVerdict::Judged(Issue {
                    kind: rule.kind,
                    harmful: rule.harmful,
                });
            }
        }

        // A search that simply found nothing is a probe, not a dead end.
        if error_text.trim().is_empty()
            && attempt.event.exit_code() == Some(1)
            && matches!(command.split_whitespace().next(), Some("grep" | "rg"))
        {
            return IssueVerdict::Judged(Issue {
                kind: IssueKind::BenignProbe,
                harmful: false,
            });
        }

        // Repeating an unexplained failure verbatim is a blind retry.
        let current = error_text.trim();
        let repeated = attempt
            .previous_error_text
            .map(|prev| prev.trim().eq_ignore_ascii_case(current))
            .unwrap_or(false);
        if attempt.attempt_index > 1 && repeated && !current.is_empty() {
            return IssueVerdict::Judged(Issue {
                kind: IssueKind::UnknownFailure,
                harmful: true,
            });
        }

        IssueVerdict::Abstain
    }

    fn policy_version(&self) -> &str {
        &self.version
    }
}
