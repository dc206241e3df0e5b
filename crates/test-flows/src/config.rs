//! Run configuration
//!
//! [`Settings`] describes the environment (paths, timings, interface names)
//! and can be loaded from a YAML file; every field has a default so an empty
//! file, or no file at all, is valid. [`RunOptions`] carries what the user
//! chose on the command line for this particular run.

use crate::log_check::LogChecker;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Checkout root; relative paths below are resolved against it
    pub root_dir: PathBuf,
    /// Per-device log tree, default `<root>/logs`
    pub log_dir: Option<PathBuf>,
    /// Where packet captures are written, default `<root>/logs`
    pub capture_dir: Option<PathBuf>,
    /// Installed prplMesh tree, default `<root>/build/install`
    pub install_dir: Option<PathBuf>,
    /// Prefix of every log file name, e.g. `beerocks_` for `beerocks_agent.log`
    pub log_program_prefix: String,
    /// Grace delay before a one-shot log check, in milliseconds
    pub check_grace_ms: u64,
    /// Polling interval while waiting for a log line, in milliseconds
    pub poll_interval_ms: u64,
    /// How long to wait for a CAPI reply, in seconds
    pub capi_timeout_secs: u64,
    /// Bridge inside each device that carries its IP address
    pub bridge_name: String,
    /// Radio interfaces of every device, in radio order
    pub radio_interfaces: Vec<String>,
    /// Packet capture program
    pub capture_program: String,
    /// Script that creates and starts the device containers
    pub launch_script: PathBuf,
    /// Delay passed to the launch script, in seconds
    pub launch_delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            log_dir: None,
            capture_dir: None,
            install_dir: None,
            log_program_prefix: "beerocks_".to_string(),
            check_grace_ms: 100,
            poll_interval_ms: 1000,
            capi_timeout_secs: 10,
            bridge_name: "br-lan".to_string(),
            radio_interfaces: vec!["wlan0".to_string(), "wlan2".to_string()],
            capture_program: "tcpdump".to_string(),
            launch_script: PathBuf::from("tests/test_gw_repeater.sh"),
            launch_delay_secs: 7,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse settings from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn under_root(&self, path: Option<&Path>, default: &str) -> PathBuf {
        match path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.root_dir.join(p),
            None => self.root_dir.join(default),
        }
    }

    /// Resolved log tree
    pub fn log_dir(&self) -> PathBuf {
        self.under_root(self.log_dir.as_deref(), "logs")
    }

    /// Resolved capture directory
    pub fn capture_dir(&self) -> PathBuf {
        self.under_root(self.capture_dir.as_deref(), "logs")
    }

    /// Resolved install tree
    pub fn install_dir(&self) -> PathBuf {
        self.under_root(self.install_dir.as_deref(), "build/install")
    }

    /// Resolved launch script
    pub fn launch_script(&self) -> PathBuf {
        self.under_root(Some(self.launch_script.as_path()), "")
    }

    /// Path of the controller CLI binary, valid inside the containers
    pub fn cli_path(&self) -> PathBuf {
        self.install_dir().join("bin").join("beerocks_cli")
    }

    /// CAPI reply timeout
    pub fn capi_timeout(&self) -> Duration {
        Duration::from_secs(self.capi_timeout_secs)
    }

    /// Log checker configured with these settings
    pub fn log_checker(&self) -> LogChecker {
        LogChecker::new(self.log_dir())
            .with_grace(Duration::from_millis(self.check_grace_ms))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

/// Choices made for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Capture packets on the device network during each test
    pub tcpdump: bool,
    /// Abort the whole run on the first failed check
    pub stop_on_failure: bool,
    /// Suffix of every container and network name
    pub unique_id: String,
    /// Attach to running containers instead of launching them
    pub skip_init: bool,
    /// Tests to run; empty means all
    pub tests: Vec<String>,
}
