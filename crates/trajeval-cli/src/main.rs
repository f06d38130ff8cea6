//! Trajeval - trajectory evaluation CLI
//!
//! The `trajeval` command replays recorded agent traces into OFF/ON
//! failure-recovery evidence and gates on it.
//!
//! ## Commands
//!
//! - `trajectory`: holdout split, family pairing, intervals and gate
//! - `swebench`: pair benchmark runs by structured session id
//! - `config`: print the effective configuration (file plus flags) as JSON

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use trajeval_core::report::ReportBody;
use trajeval_core::{
    evaluate_swebench, evaluate_trajectories, render_report_md, telemetry, write_report_json,
    EvalConfig, HarnessTranscriptAdapter, HeuristicIssueClassifier, Report, TraceFormat,
};

#[derive(Parser)]
#[command(name = "trajeval")]
#[command(author = "Stevedores Org")]
#[command(version = trajeval_core::VERSION)]
#[command(about = "Offline OFF/ON evaluation of agent execution traces", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate trajectories: holdout split, family pairing, gate
    Trajectory(EvalArgs),

    /// Evaluate benchmark runs paired by `prefix::instance::off|on::replicate`
    Swebench(EvalArgs),

    /// Print the effective configuration after file and flag overrides
    Config(EvalArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct EvalArgs {
    /// Trace root: a directory of .jsonl/.ndjson files or a single file
    root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "TRAJEVAL_CONFIG")]
    config: Option<PathBuf>,

    /// Input format: auto, canonical or transcript
    #[arg(long)]
    format: Option<TraceFormat>,

    /// Tool/harness name handed to the transcript adapter
    #[arg(long)]
    tool_name: Option<String>,

    /// Fraction of long-horizon sessions held out for evaluation
    #[arg(long)]
    eval_ratio: Option<f64>,

    /// Evaluate every session (no holdout split, no family-disjoint slice)
    #[arg(long)]
    no_holdout: bool,

    /// Minimum pair count before the gate can pass
    #[arg(long)]
    min_pair_count: Option<usize>,

    /// Minimum relative harmful-retry reduction
    #[arg(long)]
    min_harmful_reduction: Option<f64>,

    /// Bootstrap resamples
    #[arg(long)]
    samples: Option<usize>,

    /// Bootstrap RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Two-sided confidence level for bootstrap intervals
    #[arg(long)]
    confidence: Option<f64>,

    /// Skip model / tool-surface stratification
    #[arg(long)]
    no_strata: bool,

    /// Write the JSON report (plus .digest sidecar) here
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print a markdown summary instead of the JSON report
    #[arg(long)]
    markdown: bool,

    /// Exit with status 1 when the gate fails
    #[arg(long)]
    strict: bool,
}

impl EvalArgs {
    /// Load the configuration file (if any) and apply command-line overrides.
    fn resolve_config(&self) -> Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => EvalConfig::load(path)
                .with_context(|| format!("Failed to load config: {:?}", path))?,
            None => EvalConfig::default(),
        };

        if let Some(root) = &self.root {
            config.ingest.root = Some(root.clone());
        }
        if let Some(format) = self.format {
            config.ingest.options.format = format;
        }
        if let Some(tool_name) = &self.tool_name {
            config.ingest.options.tool_name = tool_name.clone();
        }
        if let Some(ratio) = self.eval_ratio {
            config.holdout.eval_ratio = ratio;
        }
        if self.no_holdout {
            config.holdout.enabled = false;
        }
        if let Some(min) = self.min_pair_count {
            config.thresholds.min_pair_count = min;
        }
        if let Some(min) = self.min_harmful_reduction {
            config.thresholds.min_relative_harmful_retry_reduction = Some(min);
        }
        if let Some(samples) = self.samples {
            config.trust.bootstrap_samples = samples;
        }
        if let Some(seed) = self.seed {
            config.trust.seed = seed;
        }
        if let Some(level) = self.confidence {
            config.trust.confidence_level = level;
        }
        if self.no_strata {
            config.stratify.enabled = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let passed = match cli.command {
        Commands::Trajectory(args) => cmd_trajectory(&args)?,
        Commands::Swebench(args) => cmd_swebench(&args)?,
        Commands::Config(args) => {
            cmd_config(&args)?;
            true
        }
    };
    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// Run the trajectory lane. Returns `false` only when `--strict` and the gate failed.
fn cmd_trajectory(args: &EvalArgs) -> Result<bool> {
    let config = args.resolve_config()?;
    let classifier = HeuristicIssueClassifier::standard();
    let evaluation = evaluate_trajectories(&config, &classifier, &HarnessTranscriptAdapter)
        .context("Trajectory evaluation failed")?;
    let pass = evaluation.gate_result.pass;
    emit(args, &Report::stamp(evaluation))?;
    Ok(pass || !args.strict)
}

/// Run the benchmark lane. Returns `false` only when `--strict` and the gate failed.
fn cmd_swebench(args: &EvalArgs) -> Result<bool> {
    let config = args.resolve_config()?;
    let classifier = HeuristicIssueClassifier::standard();
    let evaluation = evaluate_swebench(&config, &classifier, &HarnessTranscriptAdapter)
        .context("Benchmark evaluation failed")?;
    let pass = evaluation.gate_result.pass;
    emit(args, &Report::stamp(evaluation))?;
    Ok(pass || !args.strict)
}

fn cmd_config(args: &EvalArgs) -> Result<()> {
    let config = args.resolve_config()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Print the report to stdout and optionally persist it.
fn emit<T>(args: &EvalArgs, report: &Report<T>) -> Result<()>
where
    T: Serialize + ReportBody,
{
    if let Some(path) = &args.out {
        write_out(path, report)?;
    }
    if args.markdown {
        print!("{}", render_report_md(report));
    } else {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    if !report.body.gate_result().pass {
        info!(
            event = "gate.failed",
            strict = args.strict,
            failures = report.body.gate_result().failures.len()
        );
    }
    Ok(())
}

fn write_out<T: Serialize>(path: &Path, report: &Report<T>) -> Result<()> {
    write_report_json(path, report)
        .with_context(|| format!("Failed to write report to {:?}", path))?;
    eprintln!("Report written to {:?}", path);
    Ok(())
}
