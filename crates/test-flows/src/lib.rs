//! Black-box test flows for a Multi-AP mesh
//!
//! A controller and two agents run in docker containers. Test cases drive
//! them through each device's CAPI control channel, the controller CLI and the
//! simulated wireless driver, then verify the outcome by searching the
//! per-program device logs and the controller's connection map.
//!
//! ```text
//! environment ──► FlowContext ──► TestRunner ──► flows::*
//!      │               │               │
//!  AlEntity/Radio   LogChecker    PacketCapture
//! ```

#![warn(missing_docs)]

pub mod capi;
pub mod capture;
pub mod commands;
pub mod config;
pub mod conn_map;
pub mod context;
pub mod environment;
pub mod error;
pub mod exec;
pub mod flows;
pub mod log_check;
pub mod runner;
pub mod topology;

pub use capi::{BssCredentials, BssInfo, CapiCommand, CapiReply, ControlChannel, Tlv, UccSocket};
pub use capture::PacketCapture;
pub use commands::{BwlEvent, CliCommand};
pub use config::{RunOptions, Settings};
pub use conn_map::{ConnMap, MapDevice, MapRadio, MapVap, Ssid};
pub use context::FlowContext;
pub use environment::{Docker, Environment};
pub use error::{Error, Result};
pub use exec::{DockerRunner, ProcessRunner};
pub use log_check::{LogChecker, LogHandle};
pub use runner::{CaseResult, Checks, RunSummary, TestFn, TestRegistry, TestRunner};
pub use topology::{AlEntity, MacAddr, Radio};
