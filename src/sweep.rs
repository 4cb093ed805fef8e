//! # Parameter Sweeps
//!
//! `sweep run` repeats the `run` command once per value of a client option,
//! giving each run its own log directory `<output_dir>/<value>/`.
//! `sweep table` reads those directories back and tabulates the median,
//! p90 and p99 of one distribution against the swept value.

use crate::cdf::{CdfTable, Percentile};
use crate::cli::{SweepMetric, SweepRunArgs, SweepTableArgs};
use crate::filenames::{BATCH_INTERVAL_FILE, BATCH_SIZE_FILE, LATENCY_DATA_FILE};
use crate::params::{ClientOption, RunParameters};
use crate::report::{ReportGenerator, ReportOptions};
use crate::runner::BenchmarkRunner;
use crate::supervisor::{Interrupt, RunOutcome, Timing};
use crate::utils::{
    create_progress_indicator, format_value, print_table_row, print_table_separator,
};
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A validated `sweep run` invocation
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub output_dir: PathBuf,
    pub param: ClientOption,
    pub start: i64,
    pub end: i64,
    pub step: usize,
    pub base: RunParameters,
    pub dry_run: bool,
}

fn unknown_option(name: &str) -> anyhow::Error {
    let known: Vec<&str> = ClientOption::ALL.iter().map(|o| o.name()).collect();
    anyhow!(
        "Unknown parameter '{}'; expected one of: {}",
        name,
        known.join(", ")
    )
}

impl SweepPlan {
    /// Validate the sweep before anything runs: the parameter must be a
    /// client option other than `logDir`, the step positive, and every value
    /// in the range acceptable to the option.
    pub fn from_args(args: &SweepRunArgs) -> Result<Self> {
        let param = ClientOption::from_name(&args.param)
            .ok_or_else(|| unknown_option(&args.param))?;
        if param == ClientOption::LogDir {
            bail!("logDir is set by the sweep itself and cannot be swept");
        }
        if args.param_step <= 0 {
            bail!("--param-step must be positive, got {}", args.param_step);
        }
        let step = usize::try_from(args.param_step)
            .with_context(|| format!("--param-step {} is too large", args.param_step))?;

        let plan = Self {
            output_dir: args.output_dir.clone(),
            param,
            start: args.param_start,
            end: args.param_end,
            step,
            base: RunParameters::from_args(&args.run)?,
            dry_run: args.run.dry_run,
        };

        let mut probe = plan.base.clone();
        for value in plan.values() {
            probe.set_option(param, &value.to_string())?;
        }
        Ok(plan)
    }

    /// `start, start + step, ...` up to and including `end`.
    pub fn values(&self) -> Vec<i64> {
        (self.start..=self.end).step_by(self.step).collect()
    }

    /// Log directory of the run for `value`, with a trailing slash as the
    /// client binaries append file names to it directly.
    pub fn log_dir(&self, value: i64) -> String {
        format!(
            "{}/",
            self.output_dir.join(value.to_string()).to_string_lossy()
        )
    }

    /// Parameters of the run for `value`.
    pub fn params_for(&self, value: i64) -> Result<RunParameters> {
        let mut params = self.base.clone();
        params.set_option(self.param, &value.to_string())?;
        params.set_option(ClientOption::LogDir, &self.log_dir(value))?;
        Ok(params)
    }

    /// Run every value in order. Stops after a run the harness was
    /// interrupted in; `interrupt` is shared by all the runs.
    pub async fn run(
        &self,
        timing: Timing,
        interrupt: &Interrupt,
    ) -> Result<Vec<(i64, RunOutcome)>> {
        let values = self.values();
        if values.is_empty() {
            warn!("empty sweep range {}..={}", self.start, self.end);
        }

        let mut outcomes = Vec::with_capacity(values.len());
        for (index, &value) in values.iter().enumerate() {
            let params = self.params_for(value)?;
            let log_dir = self.log_dir(value);
            if !self.dry_run {
                std::fs::create_dir_all(&log_dir)
                    .with_context(|| format!("Failed to create log directory {}", log_dir))?;
            }

            info!("###### {} = {} ######", self.param, value);
            info!(
                "[{}] {}/{}",
                create_progress_indicator(index, values.len(), 20),
                index + 1,
                values.len()
            );

            let outcome = BenchmarkRunner::new(params, self.dry_run)
                .with_timing(timing)
                .with_interrupt(interrupt.clone())
                .run()
                .await
                .with_context(|| format!("Sweep run {} = {} failed", self.param, value))?;
            let cancelled = outcome.cancelled;
            outcomes.push((value, outcome));
            if cancelled {
                warn!("sweep interrupted after {} = {}", self.param, value);
                break;
            }
        }
        Ok(outcomes)
    }
}

/// One row of a sweep table
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRow {
    pub dir: PathBuf,
    /// The swept option as written in the parameter file
    pub label: String,
    pub value: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

fn metric_file(metric: SweepMetric) -> &'static str {
    match metric {
        SweepMetric::Latency => LATENCY_DATA_FILE,
        SweepMetric::BatchInterval => BATCH_INTERVAL_FILE,
        SweepMetric::BatchSize => BATCH_SIZE_FILE,
    }
}

fn table_row(dir: &Path, param: ClientOption, metric: SweepMetric) -> Result<SweepRow> {
    let params = RunParameters::load_from_dir(dir)?;
    let label = params
        .options
        .get(param)
        .ok_or_else(|| anyhow!("{} was not set for the run in {}", param, dir.display()))?;
    let value = label
        .parse::<f64>()
        .with_context(|| format!("{} = '{}' in {} is not numeric", param, label, dir.display()))?;

    let latency = metric == SweepMetric::Latency;
    ReportGenerator::new(ReportOptions {
        silent: true,
        latency,
        batching: !latency,
        ..ReportOptions::new(dir)
    })
    .run()?;

    let path = dir.join(metric_file(metric));
    let table = CdfTable::read_file(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(SweepRow {
        dir: dir.to_path_buf(),
        label,
        value,
        p50: table.percentile(Percentile::MEDIAN)?,
        p90: table.percentile(Percentile::P90)?,
        p99: table.percentile(Percentile::P99)?,
    })
}

/// Collect the table rows of `dirs`, sorted by the swept value.
pub fn build_table(dirs: &[PathBuf], param: &str, metric: SweepMetric) -> Result<Vec<SweepRow>> {
    let param = ClientOption::from_name(param).ok_or_else(|| unknown_option(param))?;
    let mut rows = dirs
        .iter()
        .map(|dir| table_row(dir, param, metric))
        .collect::<Result<Vec<_>>>()?;
    rows.sort_by(|a, b| a.value.total_cmp(&b.value));
    Ok(rows)
}

/// The `sweep table` command.
pub fn print_table(args: &SweepTableArgs) -> Result<()> {
    let rows = build_table(&args.input_dirs, &args.param, args.metric)?;

    let widths = [24, 12, 12, 12];
    println!("{}", args.metric);
    print_table_separator(&widths);
    print_table_row(&[args.param.as_str(), "P50", "P90", "P99"], &widths);
    print_table_separator(&widths);
    for row in &rows {
        let values = [row.p50, row.p90, row.p99].map(format_value);
        let mut columns = vec![row.label.as_str()];
        columns.extend(values.iter().map(String::as_str));
        print_table_row(&columns, &widths);
    }
    print_table_separator(&widths);
    Ok(())
}

/// The `sweep run` command.
pub async fn run_sweep(args: &SweepRunArgs) -> Result<()> {
    let plan = SweepPlan::from_args(args)?;
    let outcomes = plan.run(Timing::default(), &Interrupt::listen()).await?;
    info!("sweep complete: {} runs", outcomes.len());
    Ok(())
}
