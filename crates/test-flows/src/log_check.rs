//! Log-based assertions
//!
//! Devices write one log file per program under `<log root>/<device>/`. The
//! checker greps those files for a pattern, either once or until a deadline.
//! A missing file is normal early in a run and is never an `Err`; it shows up
//! as a failed check instead.

use crate::runner::Checks;
use crate::Result;
use regex::Regex;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Delay before a one-shot check, to let a message sent just before reach the
/// receiving side. Papers over propagation latency; it does not guarantee it.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

/// Interval between reads while waiting for a pattern
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The log of one program on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHandle {
    device: String,
    program: String,
}

impl LogHandle {
    /// Identify the log of `program` on `device`
    pub fn new(device: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            program: program.into(),
        }
    }

    /// `<root>/<device>/<program>.log`
    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(&self.device).join(format!("{}.log", self.program))
    }
}

impl fmt::Display for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log of {} on {}", self.program, self.device)
    }
}

/// Searches device logs, reporting misses through [`Checks`]
#[derive(Debug, Clone)]
pub struct LogChecker {
    root: PathBuf,
    grace: Duration,
    poll_interval: Duration,
}

impl LogChecker {
    /// Checker for logs below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            grace: DEFAULT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the delay before one-shot checks
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Override the polling interval of [`wait_for`](Self::wait_for)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Resolved path of `handle`
    pub fn path(&self, handle: &LogHandle) -> PathBuf {
        handle.path_in(&self.root)
    }

    /// Read the whole log and look for a line matching `pattern`
    pub async fn search(&self, handle: &LogHandle, pattern: &Regex) -> io::Result<bool> {
        let path = self.path(handle);
        let content = async_fs::read(&path).await?;
        let found = String::from_utf8_lossy(&content)
            .lines()
            .any(|line| pattern.is_match(line));
        if found {
            debug!("Found '{}'\n\tin {}", pattern, path.display());
        }
        Ok(found)
    }

    /// Check once, after the grace delay, that the log contains `pattern`.
    ///
    /// Returns `Ok(false)` when the pattern or the file is missing; the miss is
    /// recorded in `checks`.
    pub async fn check_once(
        &self,
        checks: &mut Checks,
        handle: &LogHandle,
        pattern: &Regex,
    ) -> Result<bool> {
        smol::Timer::after(self.grace).await;
        match self.search(handle, pattern).await {
            Ok(true) => Ok(true),
            Ok(false) => checks.fail(format!("'{}'\n\tin {}", pattern, handle)),
            Err(e) => checks.fail(format!("Can't read {}: {}", handle, e)),
        }
    }

    /// Poll the log until `pattern` shows up or `timeout` elapses.
    ///
    /// An unreadable file only means "not yet"; the last read error is
    /// mentioned in the failure message if the deadline passes.
    pub async fn wait_for(
        &self,
        checks: &mut Checks,
        handle: &LogHandle,
        pattern: &Regex,
        timeout: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut last_error = None;

        loop {
            match self.search(handle, pattern).await {
                Ok(true) => return Ok(true),
                Ok(false) => last_error = None,
                Err(e) => last_error = Some(e),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            smol::Timer::after(self.poll_interval.min(deadline - now)).await;
        }

        match last_error {
            Some(e) => checks.fail(format!(
                "Can't read {} after {:?}: {}",
                handle, timeout, e
            )),
            None => checks.fail(format!(
                "'{}'\n\tin {} after {:?}",
                pattern, handle, timeout
            )),
        }
    }
}
