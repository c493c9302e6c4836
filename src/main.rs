//! `codesentinel` entrypoint: process status, anomaly scans, ancestry trees,
//! watch sessions, snapshots and safety-gated kills. Every command appends to
//! the process History Log.

use clap::{Args, Parser, Subcommand, ValueEnum};
use codesentinel_agent::{
    collectors::{MemoryTable, ProcessFilter, ProcessRecord, ProcessTreeNode, SysinfoTable},
    config::SentinelConfig,
    control::{KillOutcome, KillRequest, StdinConfirmer},
    error::{validate_pid, Result},
    logging::StructuredLogger,
    ops::{record_rejected, Sentinel, StatusReport, StatusScope},
    risk::{parse_size, SeverityRule, Thresholds},
    storage::read_snapshot,
    watch::{CancelToken, WatchOptions, WatchSample},
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info};

/// Exit code for a kill refused by the safety gate (blocked or aborted).
const EXIT_REFUSED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "codesentinel", version, about = "Process telemetry and safety-gated process control")]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true, env = "CODESENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the history log root directory
    #[arg(long, global = true)]
    history_dir: Option<PathBuf>,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show process status for a scope (default: this process and its children)
    Status(StatusArgs),
    /// Terminate a process after ancestry checks and confirmation
    Kill(KillArgs),
    /// List processes exceeding resource thresholds
    Anomalies(AnomalyArgs),
    /// Show the process tree under a pid and its ancestor chain
    Tree {
        pid: i64,
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Sample one process at a fixed interval (Ctrl+C stops early)
    Watch(WatchArgs),
    /// Capture the process table, optionally to a JSONL file
    Snapshot(SnapshotArgs),
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct StatusArgs {
    #[arg(long)]
    pid: Option<i64>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Args)]
struct KillArgs {
    pid: i64,
    /// Skip confirmation and escalate to SIGKILL after the grace period
    #[arg(long)]
    force: bool,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RankBy {
    Largest,
    Total,
}

#[derive(Debug, Args)]
struct AnomalyArgs {
    /// CPU% threshold (0 disables)
    #[arg(long)]
    cpu: Option<f64>,
    /// Memory threshold, e.g. 500MB or 2GiB (0 disables)
    #[arg(long)]
    memory: Option<String>,
    /// Minimum runtime in seconds (0 disables)
    #[arg(long)]
    min_runtime: Option<i64>,
    #[arg(long)]
    limit: Option<usize>,
    /// How overshoots rank hits violating the same number of thresholds
    #[arg(long, value_enum)]
    rank_by: Option<RankBy>,
    /// Scan a snapshot file instead of the live table
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct WatchArgs {
    pid: i64,
    #[arg(long)]
    interval: Option<u64>,
    #[arg(long)]
    duration: Option<u64>,
    /// Include full command lines in samples
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct SnapshotArgs {
    #[arg(long)]
    user: Option<String>,
    /// Case-insensitive command-line substring
    #[arg(long = "match")]
    pattern: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = SentinelConfig::resolve_path(cli.config.as_deref());
    let mut config = match SentinelConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("codesentinel: config {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = cli.history_dir.clone() {
        config.history_dir = dir;
    }

    StructuredLogger::init(&config.log);
    info!(history_dir = ?config.history_dir, "codesentinel starting");

    match run(cli, config) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("codesentinel: {e}");
            ExitCode::FAILURE
        }
    }
}

fn live(config: SentinelConfig) -> Sentinel<SysinfoTable> {
    let window = Duration::from_millis(config.sampling.cpu_window_ms);
    Sentinel::new(config, SysinfoTable::new(window))
}

fn run(cli: Cli, config: SentinelConfig) -> Result<ExitCode> {
    let json = cli.json;
    match cli.command {
        Command::Status(args) => {
            let scope = if let Some(pid) = args.pid {
                StatusScope::Pid(validate_pid(pid)?)
            } else if let Some(user) = args.user {
                StatusScope::User(user)
            } else if args.all {
                StatusScope::All
            } else {
                StatusScope::Current
            };
            let report = live(config).status(scope)?;
            output(json, &report, print_status)?;
        }
        Command::Kill(args) => {
            let request = KillRequest {
                pid: validate_pid(args.pid)?,
                force: args.force,
                reason: args.reason,
            };
            let report = live(config).kill(request, &StdinConfirmer)?;
            output(json, &report, |r| {
                if let KillOutcome::Executed { terminated, escalated } = r.outcome {
                    println!(
                        "pid {} ({}): {}{}",
                        r.pid,
                        r.name,
                        if terminated { "terminated" } else { "still running" },
                        if escalated { " (forced)" } else { "" }
                    );
                }
            })?;
            if let Err(refusal) = report.ensure_not_refused() {
                eprintln!("codesentinel: {refusal}");
                return Ok(ExitCode::from(EXIT_REFUSED));
            }
            if !report.outcome.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Anomalies(args) => {
            let (thresholds, replay) = match anomaly_inputs(&config, &args) {
                Ok(v) => v,
                Err(e) => {
                    record_rejected(&config.history_dir, "anomaly_scan", &e);
                    return Err(e);
                }
            };
            let report = match replay {
                Some(records) => {
                    Sentinel::new(config, MemoryTable::from_records(records)).anomalies(thresholds, args.limit)?
                }
                None => live(config).anomalies(thresholds, args.limit)?,
            };
            output(json, &report, |r| {
                println!("scanned {} processes, {} over threshold", r.scanned, r.total_hits);
                for hit in &r.hits {
                    let dims: Vec<String> = hit
                        .violated_thresholds
                        .iter()
                        .map(|d| format!("{d:?}").to_lowercase())
                        .collect();
                    println!(
                        "{:>7}  {:<20} cpu {:>6.1}%  mem {:>10}  [{}] +{:.0}%",
                        hit.record.pid,
                        truncate(&hit.record.name, 20),
                        hit.record.cpu_percent,
                        fmt_bytes(hit.record.memory_bytes),
                        dims.join(","),
                        hit.severity.overshoot * 100.0
                    );
                }
            })?;
        }
        Command::Tree { pid, depth } => {
            let report = live(config).tree(validate_pid(pid)?, depth)?;
            output(json, &report, |r| {
                let chain: Vec<String> = r.ancestors.iter().rev().map(|n| n.pid.to_string()).collect();
                println!("ancestors: {}", chain.join(" -> "));
                print_tree(&r.root, 0);
            })?;
        }
        Command::Watch(args) => {
            let pid = validate_pid(args.pid)?;
            let mut options = WatchOptions::from(&config);
            if let Some(secs) = args.interval {
                options.interval = Duration::from_secs(secs);
            }
            if let Some(secs) = args.duration {
                options.duration = Duration::from_secs(secs);
            }
            options.verbose = args.verbose;

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
                tracing::warn!(error = %e, "could not install Ctrl+C handler");
            }
            let stop = cancel.clone();
            let sentinel = live(config);
            let report = sentinel.watch(pid, options, cancel, |s| {
                if let Err(e) = emit_sample(json, s) {
                    debug!(error = %e, "stdout closed; stopping watch");
                    stop.cancel();
                }
            })?;
            if json {
                StructuredLogger::emit_json(&report.summary, &mut std::io::stdout())?;
            } else {
                let s = &report.summary;
                println!(
                    "{}: {} samples, cpu min/avg/max {:.1}/{:.1}/{:.1}%, peak mem {}",
                    report.end.as_str(),
                    s.samples,
                    s.cpu_min,
                    s.cpu_mean,
                    s.cpu_max,
                    fmt_bytes(s.memory_peak)
                );
            }
        }
        Command::Snapshot(args) => {
            let filter = ProcessFilter {
                owner: args.user,
                command_contains: args.pattern,
            };
            let report = live(config).snapshot(Some(&filter), args.limit, args.output)?;
            match report.path {
                // The file is the artifact; stdout only confirms.
                Some(ref path) => println!("wrote {} records to {}", report.count, path.display()),
                None => {
                    let mut out = std::io::stdout();
                    for r in &report.records {
                        if json {
                            StructuredLogger::emit_json(r, &mut out)?;
                        } else {
                            print_record(r);
                        }
                    }
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Thresholds from config plus flag overrides, and the replay records when
/// `--replay` is given.
fn anomaly_inputs(config: &SentinelConfig, args: &AnomalyArgs) -> Result<(Thresholds, Option<Vec<ProcessRecord>>)> {
    let mut thresholds = config.thresholds.clone();
    if let Some(cpu) = args.cpu {
        thresholds.cpu_percent = cpu;
    }
    if let Some(ref mem) = args.memory {
        thresholds.memory_bytes = parse_size(mem)?;
    }
    if let Some(runtime) = args.min_runtime {
        thresholds.min_runtime_seconds = runtime;
    }
    if let Some(rank) = args.rank_by {
        thresholds.severity_rule = match rank {
            RankBy::Largest => SeverityRule::LargestOvershoot,
            RankBy::Total => SeverityRule::TotalOvershoot,
        };
    }
    let replay = args.replay.as_deref().map(read_snapshot).transpose()?;
    Ok((thresholds, replay))
}

fn output<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        StructuredLogger::emit_json(value, &mut std::io::stdout())?;
    } else {
        human(value);
    }
    Ok(())
}

fn emit_sample(json: bool, s: &WatchSample) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        return StructuredLogger::emit_json(s, &mut out);
    }
    writeln!(
        out,
        "#{:<4} +{:>6}ms  cpu {:>6.1}%  mem {:>10}  {}",
        s.sequence_index,
        s.elapsed_ms,
        s.record.cpu_percent,
        fmt_bytes(s.record.memory_bytes),
        s.record.status.as_str()
    )
}

fn print_status(report: &StatusReport) {
    let s = &report.summary;
    println!(
        "{} processes ({} running, {} sleeping, {} zombie, {} unknown), {} total, cpu {:.1}%",
        s.total,
        s.running,
        s.sleeping,
        s.zombie,
        s.unknown,
        fmt_bytes(s.total_memory_bytes),
        s.total_cpu_percent
    );
    for r in &report.processes {
        print_record(r);
    }
}

fn print_record(r: &ProcessRecord) {
    println!(
        "{:>7} {:>7}  {:<12} {:<9} cpu {:>6.1}%  mem {:>10}  {}",
        r.pid,
        r.parent_pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        truncate(r.owner.as_deref().unwrap_or("?"), 12),
        r.status.as_str(),
        r.cpu_percent,
        fmt_bytes(r.memory_bytes),
        truncate(&r.command_string(), 60)
    );
}

fn print_tree(node: &ProcessTreeNode, indent: usize) {
    println!(
        "{:indent$}{} {} [{}] {}",
        "",
        node.pid,
        node.name,
        node.status.as_str(),
        fmt_bytes(node.memory_bytes),
        indent = indent * 2
    );
    for child in &node.children {
        print_tree(child, indent + 1);
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
