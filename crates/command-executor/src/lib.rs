//! Runtime-agnostic command execution library
//!
//! This crate provides a unified interface for executing commands on the test
//! host or inside the containers that play the role of mesh devices. Commands
//! are described once with [`Command`] and routed through a [`Target`], so the
//! caller never assembles `docker exec` argument vectors by hand.

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod launcher;
pub mod process;
pub mod target;

pub use backends::local::{LocalLauncher, LocalProcessHandle, StderrLines};
pub use command::Command;
pub use error::{Error, Result};
pub use launcher::Launcher;
pub use process::{ExitStatus, Output, ProcessHandle};
pub use target::{DockerExec, Target};
