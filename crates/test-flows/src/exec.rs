//! Running commands on devices

use crate::Result;
use async_trait::async_trait;
use command_executor::{Command, Launcher, LocalLauncher, Target};

/// Runs commands inside a device's isolated environment
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command` on `device` and return its stdout.
    ///
    /// A non-zero exit is an error: it means the environment is broken.
    async fn run(&self, device: &str, command: Command) -> Result<Vec<u8>>;
}

/// Devices are docker containers named after the device label
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerRunner {
    launcher: LocalLauncher,
}

impl DockerRunner {
    /// Create a runner using the local docker client
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessRunner for DockerRunner {
    async fn run(&self, device: &str, command: Command) -> Result<Vec<u8>> {
        let output = self
            .launcher
            .execute(&Target::docker(device), command)
            .await?;
        Ok(output.stdout)
    }
}
