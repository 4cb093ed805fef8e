//! # Run Parameters
//!
//! The validated configuration of a single benchmark run, how it turns into
//! consumer/producer command lines, and how it is persisted next to the run's
//! logs so the run can be replayed (`run --re-run`) or correlated with its
//! sweep parameter (`sweep table`).

use crate::cli::RunArgs;
use crate::filenames::PARAM_FILE;
use crate::supervisor::{CommandSpec, LaunchPlan};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which of the two client binaries receives an option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionScope {
    General,
    Consumer,
    Producer,
}

/// Options forwarded to the client binaries, in command-line order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOption {
    LogDir,
    Brokers,
    Topic,
    GroupId,
    FetchWaitMaxMs,
    ThroughputOps,
    QueueBufferingMaxMs,
}

impl ClientOption {
    pub const ALL: [ClientOption; 7] = [
        ClientOption::LogDir,
        ClientOption::Brokers,
        ClientOption::Topic,
        ClientOption::GroupId,
        ClientOption::FetchWaitMaxMs,
        ClientOption::ThroughputOps,
        ClientOption::QueueBufferingMaxMs,
    ];

    /// Option name as the client binaries spell it, without dashes
    pub fn name(self) -> &'static str {
        match self {
            ClientOption::LogDir => "logDir",
            ClientOption::Brokers => "brokers",
            ClientOption::Topic => "topic",
            ClientOption::GroupId => "group.id",
            ClientOption::FetchWaitMaxMs => "fetch.wait.max.ms",
            ClientOption::ThroughputOps => "throughput.ops",
            ClientOption::QueueBufferingMaxMs => "queue.buffering.max.ms",
        }
    }

    pub fn flag(self) -> String {
        format!("--{}", self.name())
    }

    pub fn scope(self) -> OptionScope {
        match self {
            ClientOption::LogDir
            | ClientOption::Brokers
            | ClientOption::Topic
            | ClientOption::GroupId => OptionScope::General,
            ClientOption::FetchWaitMaxMs => OptionScope::Consumer,
            ClientOption::ThroughputOps | ClientOption::QueueBufferingMaxMs => {
                OptionScope::Producer
            }
        }
    }

    /// Look an option up by name, with or without leading dashes.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches('-');
        Self::ALL.into_iter().find(|option| option.name() == name)
    }
}

impl std::fmt::Display for ClientOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Values for the client options; unset options are not passed at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub log_dir: Option<String>,
    pub brokers: Option<String>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub fetch_wait_max_ms: Option<u64>,
    pub throughput_ops: Option<f64>,
    pub queue_buffering_max_ms: Option<u64>,
}

impl ClientOptions {
    pub fn get(&self, option: ClientOption) -> Option<String> {
        match option {
            ClientOption::LogDir => self.log_dir.clone(),
            ClientOption::Brokers => self.brokers.clone(),
            ClientOption::Topic => self.topic.clone(),
            ClientOption::GroupId => self.group_id.clone(),
            ClientOption::FetchWaitMaxMs => self.fetch_wait_max_ms.map(|v| v.to_string()),
            ClientOption::ThroughputOps => self.throughput_ops.map(|v| v.to_string()),
            ClientOption::QueueBufferingMaxMs => {
                self.queue_buffering_max_ms.map(|v| v.to_string())
            }
        }
    }

    /// Set an option from its textual value, checking numeric options parse.
    pub fn set(&mut self, option: ClientOption, value: &str) -> Result<()> {
        let invalid = |e: &dyn std::fmt::Display| {
            anyhow!("Invalid value '{}' for --{}: {}", value, option.name(), e)
        };
        match option {
            ClientOption::LogDir => self.log_dir = Some(value.to_string()),
            ClientOption::Brokers => self.brokers = Some(value.to_string()),
            ClientOption::Topic => self.topic = Some(value.to_string()),
            ClientOption::GroupId => self.group_id = Some(value.to_string()),
            ClientOption::FetchWaitMaxMs => {
                self.fetch_wait_max_ms = Some(value.parse().map_err(|e| invalid(&e))?)
            }
            ClientOption::ThroughputOps => {
                self.throughput_ops = Some(value.parse().map_err(|e| invalid(&e))?)
            }
            ClientOption::QueueBufferingMaxMs => {
                self.queue_buffering_max_ms = Some(value.parse().map_err(|e| invalid(&e))?)
            }
        }
        Ok(())
    }

    fn args_for(&self, scope: OptionScope) -> Vec<String> {
        let mut args = Vec::new();
        for option in ClientOption::ALL {
            if option.scope() != scope {
                continue;
            }
            if let Some(value) = self.get(option) {
                args.push(option.flag());
                args.push(value);
            }
        }
        args
    }

    /// General options followed by the consumer-only ones
    pub fn consumer_args(&self) -> Vec<String> {
        let mut args = self.args_for(OptionScope::General);
        args.extend(self.args_for(OptionScope::Consumer));
        args
    }

    /// General options followed by the producer-only ones
    pub fn producer_args(&self) -> Vec<String> {
        let mut args = self.args_for(OptionScope::General);
        args.extend(self.args_for(OptionScope::Producer));
        args
    }
}

/// Everything needed to launch (or re-launch) one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub bindir: PathBuf,
    pub run_time: Duration,
    pub pre_run: Option<String>,
    pub post_run: Option<String>,
    pub options: ClientOptions,
}

impl RunParameters {
    /// Build parameters from the command line, or load them from the
    /// `--re-run` file when one is given.
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        if let Some(ref path) = args.re_run {
            return Self::load(path);
        }

        Ok(Self {
            bindir: args.bindir.clone(),
            run_time: args.run_time,
            pre_run: args.pre_run.clone(),
            post_run: args.post_run.clone(),
            options: ClientOptions::from(&args.client),
        })
    }

    /// `<bindir>/consumer` with the general options, then the consumer ones.
    ///
    /// ```rust
    /// use kafkamark::params::{ClientOptions, RunParameters};
    /// use std::time::Duration;
    ///
    /// let params = RunParameters {
    ///     bindir: "build/bin".into(),
    ///     run_time: Duration::from_secs(30),
    ///     pre_run: None,
    ///     post_run: None,
    ///     options: ClientOptions {
    ///         topic: Some("bench".to_string()),
    ///         fetch_wait_max_ms: Some(5),
    ///         throughput_ops: Some(1000.0),
    ///         ..ClientOptions::default()
    ///     },
    /// };
    /// assert_eq!(
    ///     params.consumer_command().to_string(),
    ///     "build/bin/consumer --topic bench --fetch.wait.max.ms 5"
    /// );
    /// assert_eq!(
    ///     params.producer_command().to_string(),
    ///     "build/bin/producer --topic bench --throughput.ops 1000"
    /// );
    /// ```
    pub fn consumer_command(&self) -> CommandSpec {
        CommandSpec::new(self.bindir.join("consumer"), self.options.consumer_args())
    }

    pub fn producer_command(&self) -> CommandSpec {
        CommandSpec::new(self.bindir.join("producer"), self.options.producer_args())
    }

    /// Everything the supervisor needs for this run. `execute` is `false`
    /// for a dry run.
    pub fn launch_plan(&self, execute: bool) -> LaunchPlan {
        LaunchPlan {
            consumer: self.consumer_command(),
            producer: self.producer_command(),
            run_time: self.run_time,
            post_run: self.post_run.clone(),
            execute,
        }
    }

    /// Where `save` writes, if a log directory is configured.
    pub fn param_file_path(&self) -> Option<PathBuf> {
        self.options
            .log_dir
            .as_deref()
            .map(|dir| Path::new(dir).join(PARAM_FILE))
    }

    /// Persist into the log directory. Returns the written path, or `None`
    /// when no log directory is configured.
    pub fn save(&self) -> Result<Option<PathBuf>> {
        let path = match self.param_file_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write parameter file {}", path.display()))?;
        Ok(Some(path))
    }

    /// Read a parameter file written by [`RunParameters::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse parameter file {}", path.display()))
    }

    /// Load the parameters saved in a run's log directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(PARAM_FILE))
    }

    /// Override one client option, as `sweep run` does per value. An empty
    /// log directory is rejected.
    pub fn set_option(&mut self, option: ClientOption, value: &str) -> Result<()> {
        if option == ClientOption::LogDir && value.is_empty() {
            bail!("--logDir cannot be empty");
        }
        self.options.set(option, value)
    }
}
