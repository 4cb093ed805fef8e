//! # Benchmark Runner
//!
//! One `run` command from start to finish:
//!
//! 1. the `--pre-run` hook, through `sh -c`; a non-zero exit only warns
//! 2. `params.json` in the log directory, for `--re-run` and `sweep table`
//! 3. the supervised consumer/producer run
//!
//! With `--dry-run` each step is logged and nothing is executed or written.
//! A Ctrl-C latched before the clients are launched ends the run there,
//! reported as cancelled.

use crate::params::RunParameters;
use crate::supervisor::{run_shell, supervise, Interrupt, RunOutcome, Timing};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Executes one benchmark run: pre-run hook, parameter file, supervision.
pub struct BenchmarkRunner {
    params: RunParameters,
    dry_run: bool,
    timing: Timing,
    interrupt: Interrupt,
}

impl BenchmarkRunner {
    /// Create a runner with the default supervisor timing
    ///
    /// With `dry_run` every command is logged but nothing is spawned,
    /// slept on or written.
    pub fn new(params: RunParameters, dry_run: bool) -> Self {
        Self {
            params,
            dry_run,
            timing: Timing::default(),
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Share a Ctrl-C latch with the caller, e.g. across the runs of a sweep.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn params(&self) -> &RunParameters {
        &self.params
    }

    /// Run the benchmark to completion.
    pub async fn run(&self) -> Result<RunOutcome> {
        let execute = !self.dry_run;
        let cancelled = RunOutcome {
            cancelled: true,
            ..RunOutcome::default()
        };
        if self.interrupt.is_set() {
            return Ok(cancelled);
        }

        if let Some(ref command) = self.params.pre_run {
            info!("running pre-run command");
            info!("{}", command);
            if execute {
                let status = run_shell(command).await?;
                if !status.success() {
                    warn!("pre-run command exited with {}", status);
                }
            }
        }
        if self.interrupt.is_set() {
            warn!("interrupted during the pre-run command, clients not started");
            return Ok(cancelled);
        }

        if execute {
            match self.params.save()? {
                Some(path) => debug!("saved run parameters to {}", path.display()),
                None => debug!("no log directory set, run parameters not saved"),
            }
        } else if let Some(path) = self.params.param_file_path() {
            info!("would save run parameters to {}", path.display());
        }

        let plan = self.params.launch_plan(execute);
        let outcome = supervise(&plan, self.timing, &self.interrupt).await?;

        if outcome.ended_early {
            warn!("run ended before the configured run time");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ClientOptions;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn params(bindir: &Path, log_dir: &Path, marker: &Path) -> RunParameters {
        RunParameters {
            bindir: bindir.to_path_buf(),
            run_time: Duration::from_secs(30),
            pre_run: Some(format!("touch {}", marker.display())),
            post_run: None,
            options: ClientOptions {
                log_dir: Some(log_dir.to_string_lossy().into_owned()),
                ..ClientOptions::default()
            },
        }
    }

    fn fast_timing() -> Timing {
        Timing {
            startup_delay: Duration::ZERO,
            flush_grace: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let marker = dir.path().join("pre-run-marker");

        let runner = BenchmarkRunner::new(
            params(&PathBuf::from("/nonexistent/bin"), &log_dir, &marker),
            true,
        );
        let outcome = runner.run().await.unwrap();

        assert!(!outcome.ended_early);
        assert!(outcome.killed.is_empty());
        assert!(!marker.exists());
        assert!(!log_dir.exists());
    }

    #[tokio::test]
    async fn test_interrupt_during_pre_run_launches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let marker = dir.path().join("pre-run-marker");

        let interrupt = Interrupt::new();
        let latch = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            latch.trigger();
        });

        let mut params = params(dir.path(), &log_dir, &marker);
        params.pre_run = Some(format!("sleep 0.3; touch {}", marker.display()));
        let outcome = BenchmarkRunner::new(params, false)
            .with_timing(fast_timing())
            .with_interrupt(interrupt)
            .run()
            .await
            .unwrap();

        // The missing client binaries would have failed the run had it launched
        assert!(outcome.cancelled);
        assert!(marker.exists());
        assert!(!log_dir.exists());
    }

    #[tokio::test]
    async fn test_launch_failure_after_pre_run() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let marker = dir.path().join("pre-run-marker");

        let runner = BenchmarkRunner::new(params(dir.path(), &log_dir, &marker), false)
            .with_timing(fast_timing());
        let err = runner.run().await.unwrap_err();

        assert!(format!("{:#}", err).contains("consumer"), "{:#}", err);
        assert!(marker.exists());
        assert!(log_dir.join(crate::filenames::PARAM_FILE).exists());
    }
}
