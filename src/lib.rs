//! # Kafkamark Library
//!
//! A benchmarking harness for message-queue clients. It launches an external
//! consumer and producer, lets them write pipe-delimited trace logs, and
//! reduces those logs into latency and batching distributions.
//!
//! ## Architecture Overview
//!
//! - `log_parser`: trace log records and cycle-counter clock calibration
//! - `cdf`: nearest-rank distributions and the CDF text files
//! - `batching`: consumer batch detection over `CONSUME` timestamps
//! - `supervisor`: consumer/producer lifecycle with guaranteed cleanup
//! - `params`: run configuration, client option assembly and persistence
//! - `runner`, `report`, `format`, `sweep`: the four commands
//! - `cli`, `logging`, `utils`: command line, tracing setup and helpers
//!
//! ## Usage Example
//!
//! ```rust
//! use kafkamark::log_parser::{LogReader, TimestampConverter};
//! use kafkamark::cdf::Distribution;
//! use std::io::Cursor;
//!
//! let log = "0|CPS|1000000000\n500|CONSUME|m1|2000\n900|CONSUME|m2|4000\n";
//! let mut converter = TimestampConverter::new();
//! let mut latencies = Vec::new();
//! for record in LogReader::new(Cursor::new(log)) {
//!     let record = record?;
//!     converter.observe(&record)?;
//!     if record.is_consume() {
//!         assert!(converter.to_nanos(&record)? >= 500.0);
//!         latencies.push(record.latency_ns()? / 1000.0);
//!     }
//! }
//! let summary = Distribution::new(latencies)?.summary();
//! assert_eq!(summary.max, 4.0);
//! # Ok::<(), kafkamark::error::AnalysisError>(())
//! ```

/// Consumer batch detection
pub mod batching;

/// Empirical distributions, percentile lookups and CDF files
pub mod cdf;

/// Command-line interface
///
/// Argument parsing with clap. Every command carries its own argument
/// struct which the command modules turn into validated configuration.
pub mod cli;

pub mod error;

/// The `format` command
pub mod format;

/// Trace log parsing and clock calibration
///
/// Lines are `cycles|TAG|fields...`. `CPS` records calibrate the cycle
/// counter, `CONSUME` records carry a latency sample.
pub mod log_parser;

pub mod logging;

/// Run configuration and the parameter file
pub mod params;

/// The `report` command
///
/// Builds latency and batching CDF files in a run's log directory and
/// prints their summaries.
pub mod report;

/// The `run` command
pub mod runner;

/// Consumer/producer supervision
pub mod supervisor;

/// The `sweep` command
pub mod sweep;

pub mod utils;

pub use cdf::{CdfTable, Distribution, Percentile, Summary};
pub use cli::{Args, Command};
pub use error::AnalysisError;
pub use log_parser::{ClockCalibration, LogReader, LogRecord, TimestampConverter};
pub use params::RunParameters;
pub use report::ReportGenerator;
pub use runner::BenchmarkRunner;
pub use supervisor::{supervise, Interrupt, SupervisorContext};

/// The current version of kafkamark
///
/// Populated from Cargo.toml and embedded in JSON report output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default timing of a supervised run
pub mod defaults {
    use std::time::Duration;

    /// Time the consumer gets to subscribe before the producer starts
    ///
    /// There is no readiness probe; the consumer is simply given a head start.
    pub const STARTUP_DELAY: Duration = Duration::from_secs(1);

    /// Upper bound on the wait for both clients to exit after SIGINT
    pub const FLUSH_GRACE: Duration = Duration::from_secs(1);

    /// Liveness polling interval while waiting on the clients
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
}

/// File names inside a run's log directory
pub mod filenames {
    /// Trace log written by the consumer binary
    pub const CONSUMER_LOG: &str = "consumer.log";

    pub const LATENCY_DATA_FILE: &str = "latency.cdf";
    pub const BATCH_INTERVAL_FILE: &str = "batch_interval.cdf";
    pub const BATCH_SIZE_FILE: &str = "batch_size.cdf";

    /// Run parameters saved by `run`, read by `run --re-run` and `sweep table`
    pub const PARAM_FILE: &str = "params.json";
}
