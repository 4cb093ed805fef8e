//! # Run Reports
//!
//! The `report` command turns the consumer trace log of one run directory
//! into CDF files and prints their summaries.
//!
//! ## Outputs
//!
//! | File | Columns | Source |
//! |---|---|---|
//! | `latency.cdf` | latency (usec), fraction | latency field of every `CONSUME` |
//! | `batch_interval.cdf` | interval (msec), batch size, fraction | closed batches |
//! | `batch_size.cdf` | batch size, fraction | closed batches |
//!
//! ## Caching
//!
//! An existing output is reused unless `--force` is given. The two batching
//! files are produced together, so both are rebuilt when either is missing.
//! Summaries are always read back from the files on disk, so a cached report
//! prints exactly what a fresh one would.
//!
//! ## Output Modes
//!
//! By default each CDF file is echoed followed by a summary table. `--json`
//! prints only a [`ReportSummary`] document and `--silent` prints nothing.

use crate::batching::{Batch, BatchSegmenter, TrailingBatch};
use crate::cdf::{CdfHeader, CdfTable, Distribution, Summary};
use crate::cli::ReportArgs;
use crate::error::Result as AnalysisResult;
use crate::filenames::{BATCH_INTERVAL_FILE, BATCH_SIZE_FILE, LATENCY_DATA_FILE};
use crate::log_parser::{LogReader, TimestampConverter};
use crate::utils::{format_value, print_table_row, print_table_separator};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Validated options of the `report` command
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub dir: PathBuf,
    pub log_name: String,
    pub force: bool,
    pub silent: bool,
    pub latency: bool,
    pub batching: bool,
    pub json: bool,
    pub trailing_batch: TrailingBatch,
    pub min_batch_gap: u64,
}

impl ReportOptions {
    /// Options for a full report of `dir` with default settings.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            log_name: crate::filenames::CONSUMER_LOG.to_string(),
            force: false,
            silent: false,
            latency: true,
            batching: true,
            json: false,
            trailing_batch: TrailingBatch::Drop,
            min_batch_gap: 0,
        }
    }
}

impl From<&ReportArgs> for ReportOptions {
    fn from(args: &ReportArgs) -> Self {
        // Neither section requested means the full report
        let full_report = !args.latency && !args.batching;
        Self {
            dir: args.dirname.clone(),
            log_name: args.log_name.clone(),
            force: args.force,
            silent: args.silent,
            latency: args.latency || full_report,
            batching: args.batching || full_report,
            json: args.json,
            trailing_batch: if args.include_trailing_batch {
                TrailingBatch::Emit
            } else {
                TrailingBatch::Drop
            },
            min_batch_gap: args.min_batch_gap,
        }
    }
}

/// Summaries of the generated distributions, as printed with `--json`
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub directory: PathBuf,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub latency: Option<Summary>,
    pub batch_interval: Option<Summary>,
    pub batch_size: Option<Summary>,
}

/// Files removed (and failed to remove) by `report --clean`
#[derive(Debug, Default)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Every `CONSUME` latency in microseconds.
pub fn collect_latencies<R: BufRead>(reader: LogReader<R>) -> AnalysisResult<Vec<f64>> {
    let mut latencies = Vec::new();
    for record in reader {
        let record = record?;
        if record.is_consume() {
            latencies.push(record.latency_ns()? / 1000.0);
        }
    }
    Ok(latencies)
}

/// Batches of the `CONSUME` stream as `(interval_ms, size)` pairs.
///
/// Each interval is converted with the calibration in effect when its batch
/// closes, so a batch closed before any `CPS` record fails with
/// `CalibrationMissing`.
pub fn collect_batches<R: BufRead>(
    reader: LogReader<R>,
    mut segmenter: BatchSegmenter,
    trailing: TrailingBatch,
) -> AnalysisResult<Vec<(f64, f64)>> {
    let mut converter = TimestampConverter::new();
    let mut batches = Vec::new();
    let mut last_line = 0;

    for record in reader {
        let record = record?;
        last_line = record.line();
        if converter.observe(&record)? || !record.is_consume() {
            continue;
        }
        if let Some(batch) = segmenter.push(record.timestamp_cycles()) {
            batches.push(batch_pair(batch, &converter, record.line())?);
        }
    }

    if let Some(batch) = segmenter.finish(trailing) {
        batches.push(batch_pair(batch, &converter, last_line)?);
    }

    Ok(batches)
}

fn batch_pair(
    batch: Batch,
    converter: &TimestampConverter,
    line: usize,
) -> AnalysisResult<(f64, f64)> {
    let calibration = converter.require(line)?;
    Ok((
        calibration.span_to_millis(batch.duration_cycles),
        f64::from(batch.size),
    ))
}

/// Produces and prints the reports of one log directory.
///
/// ```rust,no_run
/// use kafkamark::report::{ReportGenerator, ReportOptions};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut options = ReportOptions::new("out/run1");
/// options.silent = true;
/// let summary = ReportGenerator::new(options).run()?;
/// println!("median latency {:?}", summary.latency.map(|s| s.median));
/// # Ok(())
/// # }
/// ```
pub struct ReportGenerator {
    options: ReportOptions,
}

impl ReportGenerator {
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    fn path(&self, name: &str) -> PathBuf {
        self.options.dir.join(name)
    }

    fn log_path(&self) -> PathBuf {
        self.path(&self.options.log_name)
    }

    fn needs_regeneration(&self, outputs: &[&Path]) -> bool {
        self.options.force || outputs.iter().any(|path| !path.is_file())
    }

    fn open_log(&self) -> Result<LogReader<std::io::BufReader<std::fs::File>>> {
        let path = self.log_path();
        LogReader::open(&path).with_context(|| format!("Failed to open log {}", path.display()))
    }

    /// Run the requested sections and print their output.
    pub fn run(&self) -> Result<ReportSummary> {
        let mut summary = ReportSummary {
            directory: self.options.dir.clone(),
            generated_at: chrono::Utc::now(),
            version: crate::VERSION.to_string(),
            latency: None,
            batch_interval: None,
            batch_size: None,
        };

        if self.options.latency {
            summary.latency = Some(self.latency()?);
        }
        if self.options.batching {
            let (interval, size) = self.batching()?;
            summary.batch_interval = Some(interval);
            summary.batch_size = Some(size);
        }

        if self.options.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else if !self.options.silent {
            print_summary_table(&summary);
        }

        Ok(summary)
    }

    /// Write `latency.cdf` if needed and return its summary.
    pub fn latency(&self) -> Result<Summary> {
        let output = self.path(LATENCY_DATA_FILE);

        if self.needs_regeneration(&[output.as_path()]) {
            info!("generating latency report from {}", self.log_path().display());
            let latencies = collect_latencies(self.open_log()?)
                .with_context(|| format!("Failed to parse {}", self.log_path().display()))?;
            let table = Distribution::new(latencies)
                .with_context(|| format!("No latency samples in {}", self.log_path().display()))?
                .cdf();
            write_table(&table, &output, &CdfHeader::LATENCY)?;
        } else {
            debug!("reusing {}", output.display());
        }

        self.echo(&output)?;
        read_summary(&output)
    }

    /// Write `batch_interval.cdf` and `batch_size.cdf` if needed and return
    /// their summaries.
    pub fn batching(&self) -> Result<(Summary, Summary)> {
        let interval_output = self.path(BATCH_INTERVAL_FILE);
        let size_output = self.path(BATCH_SIZE_FILE);

        if self.needs_regeneration(&[interval_output.as_path(), size_output.as_path()]) {
            info!("generating batching report from {}", self.log_path().display());
            let segmenter = BatchSegmenter::with_min_gap(self.options.min_batch_gap);
            let batches =
                collect_batches(self.open_log()?, segmenter, self.options.trailing_batch)
                    .with_context(|| format!("Failed to parse {}", self.log_path().display()))?;
            debug!("detected {} batches", batches.len());

            let sizes: Vec<f64> = batches.iter().map(|&(_, size)| size).collect();
            let intervals = Distribution::with_extra(batches).with_context(|| {
                format!("No complete batches in {}", self.log_path().display())
            })?;
            write_table(&intervals.cdf(), &interval_output, &CdfHeader::BATCH_INTERVAL)?;

            let sizes = Distribution::new(sizes)?;
            write_table(&sizes.cdf(), &size_output, &CdfHeader::BATCH_SIZE)?;
        } else {
            debug!(
                "reusing {} and {}",
                interval_output.display(),
                size_output.display()
            );
        }

        self.echo(&interval_output)?;
        self.echo(&size_output)?;
        Ok((read_summary(&interval_output)?, read_summary(&size_output)?))
    }

    fn echo(&self, path: &Path) -> Result<()> {
        if self.options.silent || self.options.json {
            return Ok(());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        println!("{}", contents);
        Ok(())
    }

    /// Remove the generated CDF files. Individual failures are reported and
    /// collected, not returned as errors.
    pub fn clean(&self) -> CleanReport {
        let mut report = CleanReport::default();
        for name in [LATENCY_DATA_FILE, BATCH_INTERVAL_FILE, BATCH_SIZE_FILE] {
            let path = self.path(name);
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("removed {}", path.display());
                    report.removed.push(path);
                }
                Err(e) => {
                    error!("Error: {} - {}.", path.display(), e);
                    report.failed.push(path);
                }
            }
        }
        report
    }
}

fn write_table(table: &CdfTable, path: &Path, header: &CdfHeader) -> Result<()> {
    table
        .write_file(path, header)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Summary of a CDF file on disk.
pub fn read_summary(path: &Path) -> Result<Summary> {
    CdfTable::read_file(path)
        .and_then(|table| table.summary())
        .with_context(|| format!("Failed to summarise {}", path.display()))
}

fn print_summary_table(summary: &ReportSummary) {
    let widths = [16, 8, 10, 10, 10, 10, 10, 10];
    let rows = [
        ("Latency (usec)", &summary.latency),
        ("Interval (msec)", &summary.batch_interval),
        ("Size (msg cnt)", &summary.batch_size),
    ];

    println!();
    print_table_separator(&widths);
    print_table_row(
        &["Report", "Count", "Min", "Median", "P90", "P99", "P99.9", "Max"],
        &widths,
    );
    print_table_separator(&widths);
    for (name, summary) in rows {
        if let Some(s) = summary {
            let count = s.count.to_string();
            let values = [s.min, s.median, s.p90, s.p99, s.p999, s.max].map(format_value);
            let mut columns = vec![name, count.as_str()];
            columns.extend(values.iter().map(String::as_str));
            print_table_row(&columns, &widths);
        }
    }
    print_table_separator(&widths);
}

/// The `report` command.
pub fn run_report(args: &ReportArgs) -> Result<()> {
    let generator = ReportGenerator::new(ReportOptions::from(args));
    if args.clean {
        let cleaned = generator.clean();
        info!(
            "removed {} report files from {}",
            cleaned.removed.len(),
            args.dirname.display()
        );
        return Ok(());
    }
    generator.run()?;
    Ok(())
}
