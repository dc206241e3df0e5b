//! Local process execution backend
//!
//! Containers are reached through the local `docker` client, so this backend
//! covers both [`Target::Local`] and [`Target::DockerExec`].

use async_process::{Child, ChildStderr, Stdio};
use async_trait::async_trait;
use futures_lite::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::launcher::Launcher;
use crate::process::{ExitStatus, Output, ProcessHandle};
use crate::target::Target;

/// Line stream over a child's standard error
pub type StderrLines = Lines<BufReader<ChildStderr>>;

/// Launcher for executing processes locally
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// A handle to control a local process
pub struct LocalProcessHandle {
    /// The underlying child process
    child: Child,
    /// Diagnostic stream, until the caller takes it
    stderr: Option<StderrLines>,
}

impl LocalProcessHandle {
    /// Take the stderr line stream. Dropping it closes the pipe, after which
    /// the child can no longer block on a full stderr buffer.
    pub fn take_stderr(&mut self) -> Option<StderrLines> {
        self.stderr.take()
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        use nix::sys::signal;
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.child.id() as i32);
        signal::kill(pid, signal).map_err(|e| Error::signal_failed(signal as i32, e.to_string()))
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    type Handle = LocalProcessHandle;

    async fn launch(&self, target: &Target, command: Command) -> Result<Self::Handle> {
        let resolved = target.resolve(&command);
        debug!("Launching `{}`", resolved);

        let mut async_cmd = resolved.prepare();
        async_cmd.stdin(Stdio::null());
        async_cmd.stdout(Stdio::null());
        async_cmd.stderr(Stdio::piped());

        let mut child = async_cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("`{}`: {}", resolved, e)))?;

        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        Ok(LocalProcessHandle { child, stderr })
    }

    async fn output(&self, target: &Target, command: Command) -> Result<Output> {
        let resolved = target.resolve(&command);
        debug!("Running `{}`", resolved);

        let mut async_cmd = resolved.prepare();
        async_cmd.stdin(Stdio::null());

        let output = async_cmd
            .output()
            .await
            .map_err(|e| Error::spawn_failed(format!("`{}`: {}", resolved, e)))?;

        Ok(Output {
            status: output.status.into(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_status()?.map(ExitStatus::from))
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self
            .child
            .status()
            .await
            .map_err(|e| Error::spawn_failed(format!("Failed to wait for process: {}", e)))?;
        Ok(status.into())
    }

    async fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal(nix::sys::signal::Signal::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))
        }
    }

    async fn kill(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal(nix::sys::signal::Signal::SIGKILL)
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))
        }
    }
}

impl Drop for LocalProcessHandle {
    fn drop(&mut self) {
        // async-process reaps the child in the background once dropped
        let _ = self.child.kill();
    }
}
