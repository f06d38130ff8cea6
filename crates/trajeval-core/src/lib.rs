//! Trajeval Core Library
//!
//! Offline evaluation of agent execution traces: ingest JSONL logs, extract
//! failure/retry episodes, pair OFF/ON episodes within failure families, and
//! report effect sizes with bootstrap intervals and a pass/fail gate.

pub mod aggregate;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod extract;
pub mod gate;
pub mod holdout;
pub mod ingest;
pub mod metrics;
pub mod obs;
pub mod pairing;
pub mod pipeline;
pub mod report;
pub mod signature;
pub mod stratify;
pub mod swebench;
pub mod telemetry;

pub use domain::{
    judgeable_coverage, model_label, Episode, Event, EventType, Issue, IssueKind, Mode, Result,
    SessionLog, TrajevalError,
};

pub use aggregate::{aggregate, relative_reduction, AggregateStats};
pub use bootstrap::{
    bootstrap_confidence_intervals, derive_stratum_seed, Interval, TrustOptions, TrustSummary,
};
pub use classifier::{HeuristicIssueClassifier, IssueClassifier, IssueVerdict, RetryAttempt};
pub use config::EvalConfig;
pub use extract::{extract_episodes, TokenWeights};
pub use gate::{evaluate_gate, GateResult, GateRule, Thresholds};
pub use holdout::{
    build_family_disjoint_slice, holdout_split, split_chronologically, DisjointSlice,
    HoldoutReport, HoldoutSplit, LongHorizonCriteria,
};
pub use ingest::{
    ingest, AdapterContext, HarnessTranscriptAdapter, IngestOptions, IngestResult, ScanCounts,
    TraceFormat, TranscriptAdapter,
};
pub use pairing::{pair_episodes, Pair, PairingDiagnostics, PairingOptions};
pub use pipeline::{evaluate_swebench, evaluate_trajectories, SweBenchEvaluation, TrajectoryEvaluation};
pub use report::{
    check_schema_version, read_report_json, render_report_md, write_report_json, Report,
    SweBenchReport, TrajectoryReport, SCHEMA_VERSION,
};
pub use signature::FamilySignature;
pub use stratify::{stratify, StratumDimension, Stratification};
pub use swebench::{pair_swebench_sessions, parse_session_id, ContaminationPolicy};

/// Crate version, surfaced by `trajeval --version` and the version test.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
