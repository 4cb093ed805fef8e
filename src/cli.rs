use crate::params::ClientOptions;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Kafkamark - run message-queue benchmarks and report latency and batching
#[derive(Parser, Debug)]
#[clap(name = "kafkamark", version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Verbose output
    #[clap(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Also write harness logs to this file
    #[clap(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a raw log in a human-readable format
    Format(FormatArgs),

    /// Generate a benchmark report from the benchmark logs
    Report(ReportArgs),

    /// Run the benchmark
    Run(RunArgs),

    /// Benchmark over a range of configurations
    Sweep(SweepArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct FormatArgs {
    /// Log file to format
    pub filename: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReportArgs {
    /// Directory holding the consumer log
    pub dirname: PathBuf,

    /// Force the report to generate from the raw data
    #[clap(short = 'f', long, default_value_t = false)]
    pub force: bool,

    /// Don't output to standard out
    #[clap(short = 's', long, default_value_t = false)]
    pub silent: bool,

    /// Print the 'batching' section of the report
    #[clap(short = 'b', long, default_value_t = false)]
    pub batching: bool,

    /// Print the 'latency' section of the report
    #[clap(short = 'l', long, default_value_t = false)]
    pub latency: bool,

    /// Remove generated output files
    #[clap(long, default_value_t = false)]
    pub clean: bool,

    /// Print the summary as JSON instead of a table
    #[clap(long, default_value_t = false)]
    pub json: bool,

    /// Count the batch still open at the end of the log
    #[clap(long, default_value_t = false)]
    pub include_trailing_batch: bool,

    /// Gaps of at most this many cycles never start a new batch
    #[clap(long, default_value_t = 0)]
    pub min_batch_gap: u64,

    /// Name of the consumer log inside the directory
    #[clap(long, default_value = crate::filenames::CONSUMER_LOG)]
    pub log_name: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Duration of the experiment (seconds unless suffixed with ms, s, m or h)
    #[clap(short = 'r', long, default_value = "0", value_parser = parse_duration)]
    pub run_time: Duration,

    /// Command run before the benchmark runs
    #[clap(long)]
    pub pre_run: Option<String>,

    /// Command run after the benchmark runs
    #[clap(long)]
    pub post_run: Option<String>,

    /// Show what will be run without actual execution
    #[clap(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    /// Re-run a previous execution using the options from the provided param file
    #[clap(long)]
    pub re_run: Option<PathBuf>,

    #[clap(flatten)]
    pub client: ClientArgs,

    /// Directory containing the consumer and producer binaries
    pub bindir: PathBuf,
}

/// Options forwarded to the consumer and producer binaries
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ClientArgs {
    /// Destination log directory for log output
    #[clap(short = 'L', long = "logDir", help_heading = "General Client Options")]
    pub log_dir: Option<String>,

    /// Broker address
    #[clap(short = 'b', long, help_heading = "General Client Options")]
    pub brokers: Option<String>,

    /// Topic to fetch / produce
    #[clap(short = 't', long, help_heading = "General Client Options")]
    pub topic: Option<String>,

    /// Client group id string; clients sharing a group.id belong to the same group
    #[clap(short = 'g', long = "group.id", help_heading = "General Client Options")]
    pub group_id: Option<String>,

    /// Maximum time the broker may wait to fill the response with fetch.min.bytes
    #[clap(long = "fetch.wait.max.ms", help_heading = "Consumer Client Options")]
    pub fetch_wait_max_ms: Option<u64>,

    /// Operations per second the producer should attempt to offer
    #[clap(long = "throughput.ops", help_heading = "Producer Client Options")]
    pub throughput_ops: Option<f64>,

    /// Maximum time, in milliseconds, for buffering data on the producer queue
    #[clap(long = "queue.buffering.max.ms", help_heading = "Producer Client Options")]
    pub queue_buffering_max_ms: Option<u64>,
}

impl From<&ClientArgs> for ClientOptions {
    fn from(args: &ClientArgs) -> Self {
        Self {
            log_dir: args.log_dir.clone(),
            brokers: args.brokers.clone(),
            topic: args.topic.clone(),
            group_id: args.group_id.clone(),
            fetch_wait_max_ms: args.fetch_wait_max_ms,
            throughput_ops: args.throughput_ops,
            queue_buffering_max_ms: args.queue_buffering_max_ms,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct SweepArgs {
    #[clap(subcommand)]
    pub command: SweepCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SweepCommand {
    /// Run a set of benchmarks with a varying parameter
    Run(SweepRunArgs),

    /// Tabulate percentiles of a benchmark sweep
    Table(SweepTableArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct SweepRunArgs {
    /// Directory receiving one log directory per parameter value
    pub output_dir: PathBuf,

    /// Name of the parameter that should be varied
    #[clap(long)]
    pub param: String,

    /// First parameter value in the sweep range
    #[clap(long, allow_negative_numbers = true)]
    pub param_start: i64,

    /// Last parameter value in the sweep range
    #[clap(long, allow_negative_numbers = true)]
    pub param_end: i64,

    /// Parameter value increment
    #[clap(long, default_value_t = 1)]
    pub param_step: i64,

    #[clap(flatten)]
    pub run: RunArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SweepTableArgs {
    /// Log directories produced by `sweep run`
    #[clap(required = true, num_args = 1..)]
    pub input_dirs: Vec<PathBuf>,

    /// Name of the parameter that was varied
    #[clap(long)]
    pub param: String,

    /// Distribution to tabulate
    #[clap(long, value_enum, default_value_t = SweepMetric::Latency)]
    pub metric: SweepMetric,
}

/// Distributions a sweep can be tabulated over
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SweepMetric {
    /// End-to-end message latency
    Latency,

    /// Interval between consecutive batch starts
    BatchInterval,

    /// Messages per batch
    BatchSize,
}

impl std::fmt::Display for SweepMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepMetric::Latency => write!(f, "Latency (usec)"),
            SweepMetric::BatchInterval => write!(f, "Batch Interval (msec)"),
            SweepMetric::BatchSize => write!(f, "Batch Size (msg cnt)"),
        }
    }
}

/// Parse duration from string (e.g., "10", "10s", "500ms", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("Duration out of range: {}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-3").is_err());
        assert!(parse_duration("1e20").is_err());
        assert!(parse_duration("1e16h").is_err());
    }

    #[test]
    fn test_oversized_run_time_is_a_usage_error() {
        let err = Args::try_parse_from(["kafkamark", "run", "-r", "1e20"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert!(Args::try_parse_from(["kafkamark", "run", "-r", "1e6"]).is_ok());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let args = Args::try_parse_from([
            "kafkamark",
            "run",
            "-r",
            "30",
            "--logDir",
            "/tmp/logs/",
            "--group.id",
            "g1",
            "--throughput.ops",
            "5000",
            "-n",
            "build/bin/",
        ])
        .unwrap();

        match args.command {
            Command::Run(run) => {
                assert_eq!(run.run_time, Duration::from_secs(30));
                assert!(run.dry_run);
                assert_eq!(run.bindir, PathBuf::from("build/bin/"));
                assert_eq!(run.client.log_dir.as_deref(), Some("/tmp/logs/"));
                assert_eq!(run.client.group_id.as_deref(), Some("g1"));
                assert_eq!(run.client.throughput_ops, Some(5000.0));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_report_defaults() {
        let args = Args::try_parse_from(["kafkamark", "report", "out/run1"]).unwrap();
        match args.command {
            Command::Report(report) => {
                assert_eq!(report.dirname, PathBuf::from("out/run1"));
                assert!(!report.force && !report.latency && !report.batching);
                assert_eq!(report.log_name, crate::filenames::CONSUMER_LOG);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_sweep_run_arguments() {
        let args = Args::try_parse_from([
            "kafkamark",
            "sweep",
            "run",
            "out",
            "--param",
            "fetch.wait.max.ms",
            "--param-start",
            "0",
            "--param-end",
            "20",
            "--param-step",
            "5",
            "-r",
            "2",
            "bin",
        ])
        .unwrap();

        match args.command {
            Command::Sweep(SweepArgs {
                command: SweepCommand::Run(sweep),
            }) => {
                assert_eq!(sweep.output_dir, PathBuf::from("out"));
                assert_eq!(sweep.param_end, 20);
                assert_eq!(sweep.param_step, 5);
                assert_eq!(sweep.run.bindir, PathBuf::from("bin"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_sweep_metric_display() {
        assert_eq!(SweepMetric::Latency.to_string(), "Latency (usec)");
        assert_eq!(SweepMetric::BatchSize.to_string(), "Batch Size (msg cnt)");
    }
}
