//! # Consumer/Producer Supervision
//!
//! Drives one benchmark run: start the consumer, give it a second to
//! subscribe, start the producer, let both run for the configured time, then
//! interrupt them so they flush their trace logs.
//!
//! ```text
//! Idle -> ConsumerStarting -> ConsumerRunning -> ProducerStarting
//!      -> BothRunning -> Stopping -> Terminated
//! ```
//!
//! The [`SupervisorContext`] owns both child handles. Its `cleanup` kills
//! whatever is still alive and runs the post-run command; it is called at the
//! end of a normal run and again from `Drop`, so every exit path (error
//! return, panic unwinding, early exit) leaves no child behind. Every signal
//! is preceded by a liveness check, which makes repeated cleanup a no-op.
//!
//! The supervisor never touches the children's stdio; they write their logs
//! into the log directory themselves.
//!
//! Ctrl-C on the harness is latched by an [`Interrupt`] for the whole
//! command, so an interrupt during the start delay, the run wait or the
//! flush wait all end in the same stop sequence and a `cancelled` outcome.

use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// A program and its argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    Producer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Consumer => write!(f, "consumer"),
            Role::Producer => write!(f, "producer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    ConsumerStarting,
    ConsumerRunning,
    ProducerStarting,
    BothRunning,
    Stopping,
    Terminated,
}

/// Fixed delays of the run sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause between starting the consumer and starting the producer
    pub startup_delay: Duration,
    /// Upper bound on the wait for both children to exit after SIGINT
    pub flush_grace: Duration,
    /// Liveness polling period while waiting
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            startup_delay: crate::defaults::STARTUP_DELAY,
            flush_grace: crate::defaults::FLUSH_GRACE,
            poll_interval: crate::defaults::POLL_INTERVAL,
        }
    }
}

/// What to launch and for how long
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub consumer: CommandSpec,
    pub producer: CommandSpec,
    pub run_time: Duration,
    pub post_run: Option<String>,
    /// `false` for a dry run: log every step, spawn and sleep nothing
    pub execute: bool,
}

/// How a supervised run ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// A child exited before the run time elapsed
    pub ended_early: bool,
    /// The harness itself received Ctrl-C during the run
    pub cancelled: bool,
    /// Children that ignored SIGINT and had to be killed
    pub killed: Vec<Role>,
}

/// What a cleanup pass actually did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub killed: Vec<Role>,
    pub post_run_ran: bool,
}

/// Latched Ctrl-C of the harness.
///
/// Clones share the latch. [`Interrupt::listen`] arms it from a background
/// task; an `Interrupt::new()` latch only trips through [`Interrupt::trigger`].
#[derive(Debug, Clone)]
pub struct Interrupt {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// A latch tripped by the first Ctrl-C. Must be called inside a runtime.
    ///
    /// Once the listener is installed Ctrl-C no longer terminates the
    /// process; the commands check the latch between steps instead.
    pub fn listen() -> Self {
        let interrupt = Self::new();
        let latch = interrupt.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupted, stopping");
                    latch.trigger();
                }
                Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
            }
        });
        interrupt
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once the latch is set; pending forever if it never is.
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A launched client process.
pub struct ProcessHandle {
    role: Role,
    pid: u32,
    child: Child,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn spawn(role: Role, spec: &CommandSpec) -> Result<Self> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| {
                format!("Failed to spawn {} process {}", role, spec.program.display())
            })?;
        let pid = child.id();
        debug!("{} started with pid {}", role, pid);

        Ok(Self {
            role,
            pid,
            child,
            status: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Poll the child, reaping it if it has exited.
    pub fn is_running(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("{} ({}) exited: {}", self.role, self.pid, status);
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to poll {} ({}): {}", self.role, self.pid, e);
                false
            }
        }
    }

    /// Send SIGINT if the child is still alive. Returns whether a signal was sent.
    pub fn interrupt(&mut self) -> Result<bool> {
        if !self.is_running() {
            return Ok(false);
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            kill(Pid::from_raw(self.pid as i32), Signal::SIGINT).with_context(|| {
                format!("Failed to interrupt {} ({})", self.role, self.pid)
            })?;
        }
        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .with_context(|| format!("Failed to stop {} ({})", self.role, self.pid))?;
        }

        debug!("sent SIGINT to {} ({})", self.role, self.pid);
        Ok(true)
    }

    /// Kill and reap the child if it is still alive. Returns whether it was killed.
    pub fn kill(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        if let Err(e) = self.child.kill() {
            error!("Failed to kill {} ({}): {}", self.role, self.pid, e);
            return false;
        }
        match self.child.wait() {
            Ok(status) => self.status = Some(status),
            Err(e) => warn!("Failed to reap {} ({}): {}", self.role, self.pid, e),
        }
        true
    }
}

/// Run a command line through `sh -c`, as the pre/post-run hooks are given.
pub async fn run_shell(command: &str) -> Result<ExitStatus> {
    tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .await
        .with_context(|| format!("Failed to run shell command: {}", command))
}

/// `run_shell` for the `Drop` path, where nothing can be awaited.
fn run_shell_blocking(command: &str) -> Result<ExitStatus> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .with_context(|| format!("Failed to run shell command: {}", command))
}

fn report_post_run(result: Result<ExitStatus>) {
    match result {
        Ok(status) if !status.success() => warn!("post-run command exited with {}", status),
        Ok(_) => {}
        Err(e) => error!("{:#}", e),
    }
}

/// Owner of the two client processes for the duration of one run.
pub struct SupervisorContext {
    state: SupervisorState,
    timing: Timing,
    consumer: Option<ProcessHandle>,
    producer: Option<ProcessHandle>,
    post_run: Option<String>,
    execute: bool,
    interrupt: Interrupt,
}

impl SupervisorContext {
    pub fn new(timing: Timing) -> Self {
        Self {
            state: SupervisorState::Idle,
            timing,
            consumer: None,
            producer: None,
            post_run: None,
            execute: true,
            interrupt: Interrupt::new(),
        }
    }

    /// Stop the run early once `interrupt` is set.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!("supervisor: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn slot(&mut self, role: Role) -> &mut Option<ProcessHandle> {
        match role {
            Role::Consumer => &mut self.consumer,
            Role::Producer => &mut self.producer,
        }
    }

    /// Spawn `spec` in the given role's slot.
    pub fn launch(&mut self, role: Role, spec: &CommandSpec) -> Result<u32> {
        let handle = ProcessHandle::spawn(role, spec)?;
        let pid = handle.pid();
        *self.slot(role) = Some(handle);
        Ok(pid)
    }

    pub fn is_running(&mut self, role: Role) -> bool {
        self.slot(role)
            .as_mut()
            .map(ProcessHandle::is_running)
            .unwrap_or(false)
    }

    fn both_running(&mut self) -> bool {
        // Poll both so an exited child is reaped even if the other one is gone
        let producer = self.is_running(Role::Producer);
        let consumer = self.is_running(Role::Consumer);
        producer && consumer
    }

    fn any_running(&mut self) -> bool {
        let producer = self.is_running(Role::Producer);
        let consumer = self.is_running(Role::Consumer);
        producer || consumer
    }

    /// Register the post-run command that `cleanup` runs once.
    pub fn set_post_run(&mut self, command: Option<String>, execute: bool) {
        self.post_run = command;
        self.execute = execute;
    }

    /// Execute the whole run sequence.
    ///
    /// An interrupt during the start delay skips the producer; one during
    /// the run wait ends it. Either way the stop sequence and cleanup run
    /// as usual and the outcome is marked `cancelled`.
    pub async fn run(&mut self, plan: &LaunchPlan) -> Result<RunOutcome> {
        self.set_post_run(plan.post_run.clone(), plan.execute);
        let execute = plan.execute;
        let mut outcome = RunOutcome::default();

        self.transition(SupervisorState::ConsumerStarting);
        info!("starting consumer...");
        info!("{}", plan.consumer);
        if execute {
            self.launch(Role::Consumer, &plan.consumer)?;
        }

        self.transition(SupervisorState::ConsumerRunning);
        if execute {
            let interrupt = self.interrupt.clone();
            tokio::select! {
                _ = sleep(self.timing.startup_delay) => {}
                _ = interrupt.wait() => outcome.cancelled = true,
            }
        }

        if !outcome.cancelled {
            self.transition(SupervisorState::ProducerStarting);
            info!("starting producer...");
            info!("{}", plan.producer);
            if execute {
                self.launch(Role::Producer, &plan.producer)?;
            }

            self.transition(SupervisorState::BothRunning);
            info!(
                "run timer start ({})",
                crate::utils::format_duration(plan.run_time)
            );
            if execute {
                self.wait_for_run(plan.run_time, &mut outcome).await;
            }
            info!("run complete");
        }

        self.transition(SupervisorState::Stopping);
        if execute {
            self.interrupt_all()?;
        }
        info!("wait for output flush");
        if execute {
            self.wait_for_exit(self.timing.flush_grace).await;
        }

        outcome.cancelled |= self.interrupt.is_set();
        outcome.killed = self.shutdown().await.killed;
        Ok(outcome)
    }

    /// Sleep for the run time, ending early if a child exits or the harness
    /// is interrupted. Skipped entirely when a child is already gone.
    async fn wait_for_run(&mut self, run_time: Duration, outcome: &mut RunOutcome) {
        if !self.both_running() {
            warn!("a client exited before the run timer started");
            outcome.ended_early = true;
            return;
        }

        let deadline = Instant::now() + run_time;
        let interrupt = self.interrupt.clone();
        let interrupted = interrupt.wait();
        tokio::pin!(interrupted);

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let tick = self.timing.poll_interval.min(deadline - now);

            tokio::select! {
                _ = sleep(tick) => {}
                _ = &mut interrupted => {
                    warn!("stopping the run early");
                    outcome.cancelled = true;
                    break;
                }
            }

            if !self.both_running() {
                warn!("a client exited before the run time elapsed");
                outcome.ended_early = true;
                break;
            }
        }
    }

    /// SIGINT the producer, then the consumer, skipping any already gone.
    fn interrupt_all(&mut self) -> Result<()> {
        for role in [Role::Producer, Role::Consumer] {
            if let Some(handle) = self.slot(role).as_mut() {
                handle.interrupt()?;
            }
        }
        Ok(())
    }

    /// Wait until both children have exited, at most `grace`.
    async fn wait_for_exit(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while self.any_running() {
            let now = Instant::now();
            if now >= deadline {
                debug!("flush grace period elapsed with clients still running");
                break;
            }
            sleep(self.timing.poll_interval.min(deadline - now)).await;
        }
    }

    fn kill_survivors(&mut self) -> Vec<Role> {
        let mut killed = Vec::new();
        for role in [Role::Producer, Role::Consumer] {
            if let Some(mut handle) = self.slot(role).take() {
                if handle.kill() {
                    info!("{} ({}) killed", role, handle.pid());
                    killed.push(role);
                }
            }
        }
        killed
    }

    /// The post-run command to execute now, if it has not run yet. On a dry
    /// run it is only logged.
    fn take_post_run(&mut self) -> Option<String> {
        let command = self.post_run.take()?;
        info!("running post-run command");
        info!("{}", command);
        Some(command)
    }

    fn finish_cleanup(&mut self) {
        if self.state != SupervisorState::Idle {
            self.transition(SupervisorState::Terminated);
        }
    }

    /// Kill surviving children and run the post-run command.
    ///
    /// Safe to call any number of times; only the first call after a launch
    /// can kill anything, and the post-run command runs at most once. Blocks
    /// on the post-run command, so async callers use [`SupervisorContext::shutdown`].
    pub fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport {
            killed: self.kill_survivors(),
            post_run_ran: false,
        };
        if let Some(command) = self.take_post_run() {
            if self.execute {
                report_post_run(run_shell_blocking(&command));
            }
            report.post_run_ran = true;
        }
        self.finish_cleanup();
        report
    }

    /// [`SupervisorContext::cleanup`] with the post-run command awaited on
    /// the runtime instead of blocking it.
    pub async fn shutdown(&mut self) -> CleanupReport {
        let mut report = CleanupReport {
            killed: self.kill_survivors(),
            post_run_ran: false,
        };
        if let Some(command) = self.take_post_run() {
            if self.execute {
                report_post_run(run_shell(&command).await);
            }
            report.post_run_ran = true;
        }
        self.finish_cleanup();
        report
    }
}

impl Drop for SupervisorContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Run `plan` under a fresh context. The context is cleaned up on every
/// return path, including errors from launching either client.
pub async fn supervise(
    plan: &LaunchPlan,
    timing: Timing,
    interrupt: &Interrupt,
) -> Result<RunOutcome> {
    let mut context = SupervisorContext::new(timing).with_interrupt(interrupt.clone());
    context.run(plan).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_timing() -> Timing {
        Timing {
            startup_delay: Duration::from_millis(10),
            flush_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new(
            PathBuf::from("bin/consumer"),
            vec!["--topic".to_string(), "t".to_string()],
        );
        assert_eq!(spec.to_string(), "bin/consumer --topic t");
    }

    #[test]
    fn test_cleanup_kills_live_children_once() {
        let mut context = SupervisorContext::new(quick_timing());
        context.launch(Role::Consumer, &sh("exec sleep 30")).unwrap();
        context.launch(Role::Producer, &sh("exec sleep 30")).unwrap();
        assert!(context.is_running(Role::Consumer));

        let first = context.cleanup();
        assert_eq!(first.killed, vec![Role::Producer, Role::Consumer]);

        let second = context.cleanup();
        assert!(second.killed.is_empty());
        assert!(!context.is_running(Role::Consumer));
    }

    #[test]
    fn test_cleanup_on_exited_children_sends_nothing() {
        let mut context = SupervisorContext::new(quick_timing());
        context.launch(Role::Consumer, &sh("exit 0")).unwrap();
        context.launch(Role::Producer, &sh("exit 0")).unwrap();

        while context.is_running(Role::Consumer) || context.is_running(Role::Producer) {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(context.cleanup(), CleanupReport::default());
        assert_eq!(context.cleanup(), CleanupReport::default());
    }

    #[test]
    fn test_post_run_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("post-run");
        let mut context = SupervisorContext::new(quick_timing());
        context.set_post_run(Some(format!("echo ran >> {}", marker.display())), true);

        assert!(context.cleanup().post_run_ran);
        assert!(!context.cleanup().post_run_ran);
        drop(context);

        let contents = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_spawns_nothing() {
        let plan = LaunchPlan {
            consumer: CommandSpec::new(PathBuf::from("/nonexistent/consumer"), vec![]),
            producer: CommandSpec::new(PathBuf::from("/nonexistent/producer"), vec![]),
            run_time: Duration::from_secs(3600),
            post_run: Some("exit 1".to_string()),
            execute: false,
        };

        let mut context = SupervisorContext::new(quick_timing());
        let outcome = context.run(&plan).await.unwrap();
        assert_eq!(outcome, RunOutcome::default());
        assert_eq!(context.state(), SupervisorState::Terminated);
    }

    #[tokio::test]
    async fn test_run_ends_early_when_a_client_exits() {
        let plan = LaunchPlan {
            consumer: sh("exec sleep 30"),
            producer: sh("exit 3"),
            run_time: Duration::from_secs(30),
            post_run: None,
            execute: true,
        };

        let started = std::time::Instant::now();
        let outcome = supervise(&plan, quick_timing(), &Interrupt::new()).await.unwrap();

        assert!(outcome.ended_early);
        assert!(!outcome.cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_interrupt_latch_is_shared_by_clones() {
        let interrupt = Interrupt::new();
        let other = interrupt.clone();
        assert!(!interrupt.is_set());

        other.trigger();
        assert!(interrupt.is_set());
        tokio::time::timeout(Duration::from_secs(1), interrupt.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_during_startup_skips_producer() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("producer-ran");
        let plan = LaunchPlan {
            consumer: sh("exec sleep 30"),
            producer: sh(&format!("touch {}", marker.display())),
            run_time: Duration::from_secs(30),
            post_run: None,
            execute: true,
        };
        let timing = Timing {
            startup_delay: Duration::from_secs(20),
            ..quick_timing()
        };
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let started = std::time::Instant::now();
        let mut context = SupervisorContext::new(timing).with_interrupt(interrupt);
        let outcome = context.run(&plan).await.unwrap();

        assert!(outcome.cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!marker.exists());
        assert!(!context.is_running(Role::Consumer));
        assert_eq!(context.state(), SupervisorState::Terminated);
    }

    #[tokio::test]
    async fn test_interrupt_ends_run_wait() {
        let plan = LaunchPlan {
            consumer: sh("exec sleep 30"),
            producer: sh("exec sleep 30"),
            run_time: Duration::from_secs(30),
            post_run: None,
            execute: true,
        };
        let interrupt = Interrupt::new();
        let latch = interrupt.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            latch.trigger();
        });

        let started = std::time::Instant::now();
        let outcome = supervise(&plan, quick_timing(), &interrupt).await.unwrap();

        assert!(outcome.cancelled);
        assert!(!outcome.ended_early);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shutdown_keeps_runtime_responsive() {
        let mut context = SupervisorContext::new(quick_timing());
        context.set_post_run(Some("sleep 0.5".to_string()), true);

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let report = context.shutdown().await;
        ticker.abort();

        assert!(report.post_run_ran);
        assert!(ticks.load(Ordering::SeqCst) >= 5);
        assert!(!context.cleanup().post_run_ran);
    }

    #[tokio::test]
    async fn test_launch_failure_propagates() {
        let plan = LaunchPlan {
            consumer: sh("exec sleep 30"),
            producer: CommandSpec::new(PathBuf::from("/nonexistent/producer"), vec![]),
            run_time: Duration::from_secs(1),
            post_run: None,
            execute: true,
        };

        let err = supervise(&plan, quick_timing(), &Interrupt::new()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("producer"));
    }
}
