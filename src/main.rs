//! # Kafkamark - Main Entry Point
//!
//! Parses the command line, installs logging and dispatches to one of the
//! four commands:
//!
//! - `format`: print a consumer trace log in human-readable form
//! - `report`: build latency and batching CDFs from a run's log directory
//! - `run`: launch the consumer and producer for one benchmark run
//! - `sweep`: repeat `run` over a parameter range, or tabulate such a sweep
//!
//! Any error ends the process with a non-zero exit status and a message
//! naming the failing file or operation.

use anyhow::Result;
use clap::Parser;
use kafkamark::{
    cli::{Args, Command, SweepCommand},
    format, logging, report,
    params::RunParameters,
    runner::BenchmarkRunner,
    supervisor::Interrupt,
    sweep,
};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file writer flushes
    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;
    debug!("Configuration: {:?}", args);

    match args.command {
        Command::Format(ref format_args) => format::format_file(&format_args.filename)?,
        Command::Report(ref report_args) => report::run_report(report_args)?,
        Command::Run(ref run_args) => {
            let params = RunParameters::from_args(run_args)?;
            let outcome = BenchmarkRunner::new(params, run_args.dry_run)
                .with_interrupt(Interrupt::listen())
                .run()
                .await?;
            if outcome.cancelled {
                info!("run cancelled");
            }
        }
        Command::Sweep(ref sweep_args) => match sweep_args.command {
            SweepCommand::Run(ref sweep_run) => sweep::run_sweep(sweep_run).await?,
            SweepCommand::Table(ref table) => sweep::print_table(table)?,
        },
    }

    Ok(())
}
