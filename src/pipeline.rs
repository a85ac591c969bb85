//! Corpus-level orchestration.
//!
//! Phase one runs every input file through decode, filter and sequence,
//! leaving one sorted run per (file, line). Phase two merges the runs of
//! each line, enriches, clusters per vehicle and aggregates. Both phases
//! fan out over a bounded number of blocking tasks; every task writes only
//! to paths derived from its own file index or line, so no other
//! coordination is needed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use crate::analyzers::aggregate::HourlyAggregator;
use crate::cluster::{clean_route, group_by_vehicle};
use crate::config::PipelineConfig;
use crate::features::{HolidayCalendar, enrich_sequence};
use crate::filter::filter_lines;
use crate::output::{JsonArrayWriter, file_safe, read_run, write_records, write_run};
use crate::parser::decode_file;
use crate::sequence::{merge_sorted_runs, sequence_by_line};

pub const RUNS_DIR: &str = "runs";
pub const LINES_DIR: &str = "lines";
pub const CLEANED_DIR: &str = "cleaned";
pub const AGGREGATE_FILE: &str = "hourly_means.csv";

/// Counters reported at the end of a corpus run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub files_seen: usize,
    pub files_failed: usize,
    pub records_decoded: usize,
    pub records_kept: usize,
    pub lines: usize,
    pub lines_failed: usize,
    pub groups: usize,
    pub pings_on_route: usize,
    pub pings_off_route: usize,
    pub aggregate_rows: usize,
}

struct FileOutcome {
    decoded: usize,
    kept: usize,
    runs: Vec<(String, PathBuf)>,
}

struct LineOutcome {
    aggregator: HourlyAggregator,
    groups: usize,
    on_route: usize,
    off_route: usize,
}

fn is_input_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    (name.ends_with(".json") || name.ends_with(".json.gz")) && !name.ends_with("_cleaned.json")
}

/// Lists input dumps under `dir` recursively, in path order. `skip` (the
/// output directory, when nested) is not descended into.
pub fn collect_inputs(dir: &Path, skip: Option<&Path>) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                if skip.is_some_and(|s| path.canonicalize().is_ok_and(|p| p == s)) {
                    continue;
                }
                pending.push(path);
            } else if is_input_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn sequence_file(
    index: usize,
    path: &Path,
    config: &PipelineConfig,
    runs_dir: &Path,
) -> crate::error::Result<FileOutcome> {
    let raw = decode_file(path)?;
    let kept = filter_lines(&raw, &config.monitored_lines);
    let kept_count = kept.len();
    let by_line = sequence_by_line(kept);

    let mut runs = Vec::with_capacity(by_line.len());
    for (n, (line_id, pings)) in by_line.into_iter().enumerate() {
        let run_path = runs_dir.join(format!("{index:06}_{n:04}.ndjson"));
        write_run(&run_path, &pings)?;
        runs.push((line_id, run_path));
    }

    Ok(FileOutcome {
        decoded: raw.len(),
        kept: kept_count,
        runs,
    })
}

fn process_line(
    line_id: &str,
    runs: &[PathBuf],
    config: &PipelineConfig,
    output: &Path,
) -> crate::error::Result<LineOutcome> {
    let calendar = HolidayCalendar::from_config(&config.holidays);

    let readers: Vec<_> = runs
        .iter()
        .filter_map(|run| match read_run(run) {
            Ok(reader) => Some(reader),
            Err(e) => {
                error!(run = %run.display(), error = %e, "Run unreadable, skipped");
                None
            }
        })
        .collect();

    let line_path = output
        .join(LINES_DIR)
        .join(format!("line_{}.json", file_safe(line_id)));
    let mut line_writer = JsonArrayWriter::create(&line_path)?;
    let mut enriched = Vec::new();
    for ping in enrich_sequence(merge_sorted_runs(readers), &calendar) {
        line_writer.write(&ping)?;
        enriched.push(ping);
    }
    let sequenced = line_writer.finish()?;
    debug!(records = sequenced, path = %line_path.display(), "Line sequence written");

    let (groups, anonymous) = group_by_vehicle(enriched);
    if anonymous > 0 {
        warn!(anonymous, "Pings without vehicle id left out of route cleaning");
    }

    let mut outcome = LineOutcome {
        aggregator: HourlyAggregator::new(),
        groups: groups.len(),
        on_route: 0,
        off_route: 0,
    };

    for (key, group) in groups {
        let cleaned = clean_route(&key, group, &config.clustering);
        let path = output.join(CLEANED_DIR).join(key.cleaned_file_name());
        if let Err(e) = crate::output::write_json_array(&path, &cleaned.kept) {
            error!(vehicle_id = %key.vehicle_id, error = %e, "Cleaned route not written");
            continue;
        }

        for ping in &cleaned.kept {
            outcome.aggregator.observe(ping);
        }
        outcome.on_route += cleaned.kept.len();
        outcome.off_route += cleaned.dropped;
    }

    Ok(outcome)
}

/// Runs the whole conditioning pipeline over `input`, writing artifacts
/// under `output`.
///
/// Failed files and lines are logged and skipped. An input without any
/// decodable file yields a warning and an empty summary, not an error.
#[tracing::instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub async fn run_corpus(
    input: &Path,
    output: &Path,
    config: Arc<PipelineConfig>,
) -> Result<RunSummary> {
    let runs_dir = output.join(RUNS_DIR);
    for dir in [&runs_dir, &output.join(LINES_DIR), &output.join(CLEANED_DIR)] {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let skip = output.canonicalize().ok();
    let inputs = collect_inputs(input, skip.as_deref())
        .with_context(|| format!("listing {}", input.display()))?;
    info!(files = inputs.len(), lines = config.monitored_lines.len(), "Starting corpus run");

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut summary = RunSummary {
        files_seen: inputs.len(),
        ..Default::default()
    };

    // phase one: per file
    let mut tasks = Vec::with_capacity(inputs.len());
    for (index, path) in inputs.into_iter().enumerate() {
        let sem = semaphore.clone();
        let config = config.clone();
        let runs_dir = runs_dir.clone();
        let span = tracing::info_span!("sequence_file", file = %path.display());

        tasks.push(tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                let outcome = tokio::task::spawn_blocking(move || {
                    sequence_file(index, &path, &config, &runs_dir)
                })
                .await?;
                anyhow::Ok(outcome)
            }
            .instrument(span),
        ));
    }

    // runs are collected in file order so merges break ties by arrival
    let mut runs_by_line: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut decodable = 0usize;
    for task in tasks {
        match task.await {
            Ok(Ok(Ok(outcome))) => {
                decodable += 1;
                summary.records_decoded += outcome.decoded;
                summary.records_kept += outcome.kept;
                for (line_id, run) in outcome.runs {
                    runs_by_line.entry(line_id).or_default().push(run);
                }
            }
            Ok(Ok(Err(e))) => {
                summary.files_failed += 1;
                error!(error = %e, "File skipped");
            }
            Ok(Err(e)) => {
                summary.files_failed += 1;
                error!(error = %e, "File task failed");
            }
            Err(e) => {
                summary.files_failed += 1;
                error!(error = %e, "File task panicked");
            }
        }
    }

    if decodable == 0 {
        warn!("No decodable input found, nothing to write");
    }

    // phase two: per line
    let mut line_tasks = Vec::with_capacity(runs_by_line.len());
    for (line_id, runs) in runs_by_line {
        let sem = semaphore.clone();
        let config = config.clone();
        let output = output.to_path_buf();
        let span = tracing::info_span!("process_line", line_id = %line_id, runs = runs.len());

        line_tasks.push(tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                let outcome = tokio::task::spawn_blocking(move || {
                    process_line(&line_id, &runs, &config, &output)
                })
                .await?;
                anyhow::Ok(outcome)
            }
            .instrument(span),
        ));
    }

    let mut aggregator = HourlyAggregator::new();
    for task in line_tasks {
        match task.await {
            Ok(Ok(Ok(outcome))) => {
                summary.lines += 1;
                summary.groups += outcome.groups;
                summary.pings_on_route += outcome.on_route;
                summary.pings_off_route += outcome.off_route;
                aggregator.merge(&outcome.aggregator);
            }
            Ok(Ok(Err(e))) => {
                summary.lines_failed += 1;
                error!(error = %e, "Line skipped");
            }
            Ok(Err(e)) => {
                summary.lines_failed += 1;
                error!(error = %e, "Line task failed");
            }
            Err(e) => {
                summary.lines_failed += 1;
                error!(error = %e, "Line task panicked");
            }
        }
    }

    let rows = aggregator.rows();
    summary.aggregate_rows = rows.len();
    write_records(&output.join(AGGREGATE_FILE), &rows)?;

    if let Err(e) = fs::remove_dir_all(&runs_dir) {
        warn!(dir = %runs_dir.display(), error = %e, "Could not remove sorted runs");
    }

    info!(
        files = summary.files_seen,
        failed = summary.files_failed,
        lines = summary.lines,
        groups = summary.groups,
        off_route = summary.pings_off_route,
        rows = summary.aggregate_rows,
        "Corpus run complete"
    );
    Ok(summary)
}

/// Repairs every legacy `*_sorted.json` under `dir`. Returns
/// `(repaired, failed)`.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn repair_sorted_files(dir: &Path) -> Result<(usize, usize)> {
    let mut pending = vec![dir.to_path_buf()];
    let (mut repaired, mut failed) = (0, 0);

    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_sorted = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_sorted.json"));
            if !is_sorted {
                continue;
            }
            match crate::parser::repair_file(&path) {
                Ok(()) => repaired += 1,
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "Repair failed, file left untouched");
                }
            }
        }
    }

    Ok((repaired, failed))
}
