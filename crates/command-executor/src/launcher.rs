//! Launcher trait for executing commands on different targets

use crate::command::Command;
use crate::error::{Error, Result};
use crate::process::{Output, ProcessHandle};
use crate::target::Target;
use async_trait::async_trait;

/// A launcher that can execute commands on a [`Target`]
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// The process handle type this launcher produces
    type Handle: ProcessHandle;

    /// Spawn a long-running command, keeping its stderr available for
    /// line-by-line draining through the returned handle
    async fn launch(&self, target: &Target, command: Command) -> Result<Self::Handle>;

    /// Run a command to completion and capture its output, regardless of exit status
    async fn output(&self, target: &Target, command: Command) -> Result<Output>;

    /// Run a command to completion, failing with [`Error::NonZeroExit`] if it
    /// does not exit successfully
    async fn execute(&self, target: &Target, command: Command) -> Result<Output> {
        let rendered = target.resolve(&command).to_string();
        let output = self.output(target, command).await?;
        if !output.status.success() {
            return Err(Error::non_zero_exit(
                rendered,
                output.status.code,
                &output.stderr,
            ));
        }
        Ok(output)
    }
}
