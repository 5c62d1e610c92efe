use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reading or writing a single-value pseudo-file
#[derive(Error, Debug)]
pub enum SysfsError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} does not contain an integer (found {content:?})")]
    Parse { path: PathBuf, content: String },

    #[error("{value} is too large to write to {path}")]
    OutOfRange { path: PathBuf, value: u64 },
}

/// Failure running an external command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Status {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// A frequency write that failed on one or more CPUs
#[derive(Error, Debug)]
#[error("failed to set max frequency {hz} on {}", describe_failures(.failures))]
pub struct CpuFrequencyError {
    pub hz: u64,
    pub failures: Vec<(usize, SysfsError)>,
}

impl CpuFrequencyError {
    pub fn failed_cpus(&self) -> Vec<usize> {
        self.failures.iter().map(|(cpu, _)| *cpu).collect()
    }
}

fn describe_failures(failures: &[(usize, SysfsError)]) -> String {
    failures
        .iter()
        .map(|(cpu, e)| format!("cpu{cpu} ({e})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why a quantity produced no fresh value this tick
#[derive(Error, Debug)]
pub enum SampleError {
    #[error(transparent)]
    Sysfs(#[from] SysfsError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unexpected output {0:?}, expected `key: value`")]
    Format(String),
}

/// A rule action that failed while entering its state
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Frequency(#[from] CpuFrequencyError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Invalid configuration or rule table, detected before the loop starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{field} {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid predicate {input:?}: {reason}")]
    Predicate { input: String, reason: String },

    #[error("rule `{rule}`: {reason}")]
    Rule { rule: String, reason: String },
}

/// Top-level error returned to the command line
#[derive(Error, Debug)]
pub enum CustodianError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sysfs(#[from] SysfsError),

    #[error(transparent)]
    Frequency(#[from] CpuFrequencyError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("cannot serialize configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = CustodianError> = std::result::Result<T, E>;
