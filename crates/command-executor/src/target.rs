//! Execution target types
//!
//! Targets define WHERE a [`Command`] runs. A command is always described as if
//! it ran locally; [`Target::resolve`] rewrites it for the chosen location.

use crate::command::Command;

/// Target types that can be executed by launchers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    /// Run directly on the test host
    #[default]
    Local,
    /// Run inside an already running container via `docker exec`
    DockerExec(DockerExec),
}

impl Target {
    /// Shorthand for a `docker exec` target into `container`
    pub fn docker(container: impl Into<String>) -> Self {
        Target::DockerExec(DockerExec::new(container))
    }

    /// Rewrite `command` so that it executes on this target
    pub fn resolve(&self, command: &Command) -> Command {
        match self {
            Target::Local => command.clone(),
            Target::DockerExec(exec) => exec.wrap(command),
        }
    }
}

/// Execute inside a running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerExec {
    container: String,
}

impl DockerExec {
    /// Create a new `docker exec` target for the named container
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
        }
    }

    /// Build the `docker exec` invocation for `command`.
    ///
    /// Environment and working directory are forwarded with `-e`/`-w` so they
    /// apply inside the container rather than to the docker client.
    pub fn wrap(&self, command: &Command) -> Command {
        let mut docker = Command::new("docker");
        docker.arg("exec");

        for (key, value) in command.get_envs() {
            let mut pair = key.clone();
            pair.push("=");
            pair.push(value);
            docker.arg("-e").arg(pair);
        }
        if let Some(dir) = command.get_current_dir() {
            docker.arg("-w").arg(dir);
        }

        docker.arg(&self.container);
        docker.arg(command.get_program());
        docker.args(command.get_args());
        docker
    }
}
