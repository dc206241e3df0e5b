//! Process management traits and types

use crate::error::Result;
use async_trait::async_trait;

/// A handle to control a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> Option<u32>;

    /// Check without blocking whether the process has exited
    fn try_status(&mut self) -> Result<Option<ExitStatus>>;

    /// Wait for the process to complete and return its exit status
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Send SIGTERM (or equivalent) for graceful shutdown
    async fn terminate(&mut self) -> Result<()>;

    /// Send SIGKILL (or equivalent) to forcefully stop the process
    async fn kill(&mut self) -> Result<()>;
}

/// Process exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        ExitStatus {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        }
    }
}

/// Captured result of a command run to completion
#[derive(Debug, Clone)]
pub struct Output {
    /// How the process ended
    pub status: ExitStatus,
    /// Everything written to stdout
    pub stdout: Vec<u8>,
    /// Everything written to stderr
    pub stderr: Vec<u8>,
}

impl Output {
    /// Stdout decoded lossily as UTF-8
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}
