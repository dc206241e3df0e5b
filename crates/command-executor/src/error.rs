//! Error types for command execution

use thiserror::Error;

/// Unified error type for command execution
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// The process ran but exited unsuccessfully
    #[error("command `{command}` exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    NonZeroExit {
        /// Rendered command line
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Create a non-zero exit error from captured output
    pub fn non_zero_exit(command: impl Into<String>, code: Option<i32>, stderr: &[u8]) -> Self {
        Self::NonZeroExit {
            command: command.into(),
            code,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_message() {
        let err = Error::non_zero_exit("docker exec gw true", Some(3), b"no such container\n");
        assert_eq!(
            err.to_string(),
            "command `docker exec gw true` exited with 3: no such container"
        );
    }

    #[test]
    fn test_non_zero_exit_by_signal() {
        let err = Error::non_zero_exit("sleep 10", None, b"");
        assert!(err.to_string().contains("exited with a signal"));
    }
}
