//! Error types for test-flows
//!
//! Only environment-level problems travel through [`Error`]. A broken
//! assertion is counted by [`crate::runner::Checks`] instead, with
//! [`Error::StopOnFailure`] as the single exception used to abort a run.

use thiserror::Error;

/// Result type alias for test-flows operations
pub type Result<T> = std::result::Result<T, Error>;

/// Test orchestration error types
#[derive(Error, Debug)]
pub enum Error {
    /// A spawned command failed or could not be started
    #[error("Command execution error: {0}")]
    Exec(#[from] command_executor::Error),

    /// The controller's connection map output did not have the expected shape
    #[error("Malformed connection map at line {line}: {reason}")]
    ConnMap {
        /// 1-based line number in the status output
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The device control channel refused a command or replied with garbage
    #[error("CAPI command `{command}` failed: {reason}")]
    Capi {
        /// Command name as sent
        command: String,
        /// Error message
        reason: String,
    },

    /// The docker test environment could not be brought up or inspected
    #[error("Environment error: {0}")]
    Environment(String),

    /// Test names that are not registered
    #[error("Unknown tests: {}", .0.join(", "))]
    UnknownTests(Vec<String>),

    /// A test name registered twice
    #[error("Test registered twice: {0}")]
    DuplicateTest(String),

    /// A string that should have been a hardware address
    #[error("Invalid MAC address: {0:?}")]
    InvalidMac(String),

    /// An assertion failed while stop-on-failure is active
    #[error("Stopping on first failure")]
    StopOnFailure,

    /// Invalid log pattern
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Settings file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// JSON from an external tool could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a CAPI error
    pub fn capi(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capi {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create an environment error
    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment(message.into())
    }

    /// Create a connection map error
    pub fn conn_map(line: usize, reason: impl Into<String>) -> Self {
        Self::ConnMap {
            line,
            reason: reason.into(),
        }
    }
}
