//! Packet capture scoped to a test case
//!
//! A [`PacketCapture`] owns at most one `tcpdump` child. `start` returns once
//! tcpdump reports that it is listening (or has died), so packets sent right
//! after it are in the capture. `stop` is safe to call at any time.
//!
//! The stderr stream is not closed after the readiness line. tcpdump prints
//! its statistics there on exit, and with the pipe closed it would die of
//! SIGPIPE before flushing the capture file.

use crate::Result;
use command_executor::{
    Command, Launcher, LocalLauncher, LocalProcessHandle, ProcessHandle, StderrLines, Target,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// tcpdump prints this, followed by the interface name, once it captures
pub const READY_PREFIX: &str = "tcpdump: listening on ";

/// How long a terminated capture may take to flush before it is killed
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervised packet capture on one interface
pub struct PacketCapture {
    interface: String,
    output_dir: PathBuf,
    enabled: bool,
    program: Command,
    launcher: LocalLauncher,
    process: Option<(LocalProcessHandle, StderrLines)>,
}

impl PacketCapture {
    /// Capture on `interface`, writing `<output_dir>/<label>.pcap` files.
    /// A disabled capture accepts every call and does nothing.
    pub fn new(interface: impl Into<String>, output_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            interface: interface.into(),
            output_dir: output_dir.into(),
            enabled,
            program: Command::new("tcpdump"),
            launcher: LocalLauncher,
            process: None,
        }
    }

    /// A capture that never runs
    pub fn disabled() -> Self {
        Self::new("", "", false)
    }

    /// Use another capture program; `-i <iface> -w <file>` is appended to it
    pub fn with_program(mut self, program: Command) -> Self {
        self.program = program;
        self
    }

    /// Whether a capture process is currently running
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// PID of the running capture process
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|(p, _)| p.pid())
    }

    /// File a capture labelled `label` is written to
    pub fn output_path(&self, label: &str) -> PathBuf {
        self.output_dir.join(format!("{}.pcap", label))
    }

    /// Start capturing into the file for `label`.
    ///
    /// Does nothing when disabled or already running. If the capture program
    /// exits before it reports readiness the error is logged and the capture
    /// stays idle; only a failure to spawn it at all is returned as `Err`.
    pub async fn start(&mut self, label: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.process.is_some() {
            debug!("Capture on {} already running", self.interface);
            return Ok(());
        }

        let output = self.output_path(label);
        debug!("Starting tcpdump, output file {}", output.display());

        let mut command = self.program.clone();
        command
            .arg("-i")
            .arg(&self.interface)
            .arg("-w")
            .arg(&output);
        let mut handle = self.launcher.launch(&Target::Local, command).await?;

        if let Some(stderr) = wait_until_listening(&mut handle, &self.interface).await {
            self.process = Some((handle, stderr));
        } else {
            let status = handle.wait().await;
            error!("tcpdump terminated: {:?}", status);
        }
        Ok(())
    }

    /// Terminate the capture, if any, and wait briefly for it to flush
    pub async fn stop(&mut self) {
        let Some((mut handle, _stderr)) = self.process.take() else {
            return;
        };

        info!("Terminating tcpdump");
        if let Err(e) = handle.terminate().await {
            warn!("Failed to terminate tcpdump: {}", e);
            return;
        }

        let exited = smol::future::or(async { handle.wait().await.is_ok() }, async {
            smol::Timer::after(STOP_TIMEOUT).await;
            false
        })
        .await;
        if !exited {
            warn!("tcpdump did not exit within {:?}, killing it", STOP_TIMEOUT);
        }
        // Dropping the handle kills whatever is left
    }

}

/// Read stderr until the readiness line. The stream is handed back so the
/// pipe stays open while the capture runs; tcpdump reports its statistics
/// there on exit.
async fn wait_until_listening(
    handle: &mut LocalProcessHandle,
    interface: &str,
) -> Option<StderrLines> {
    let mut lines = handle.take_stderr()?;
    let ready = format!("{}{}", READY_PREFIX, interface);

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                debug!("{}", line);
                if line.starts_with(&ready) {
                    return Some(lines);
                }
            }
            Err(e) => {
                warn!("Failed to read tcpdump output: {}", e);
                return None;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Stand-in for tcpdump: announces itself on the interface given as `$2`
    fn fake_tcpdump() -> Command {
        Command::builder("sh")
            .arg("-c")
            .arg(r#"echo "tcpdump: listening on $2, link-type EN10MB" >&2; exec sleep 30"#)
            .arg("fake-tcpdump")
            .build()
    }

    #[smol_potat::test]
    async fn test_stop_before_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut capture = PacketCapture::new("test0", dir.path(), true);

        capture.stop().await;
        assert!(!capture.is_running());
        assert_eq!(capture.pid(), None);
    }

    #[smol_potat::test]
    async fn test_start_twice_spawns_once() {
        let dir = TempDir::new().unwrap();
        let mut capture = PacketCapture::new("test0", dir.path(), true).with_program(fake_tcpdump());

        capture.start("test_topology").await.unwrap();
        assert!(capture.is_running());
        let pid = capture.pid();

        capture.start("test_topology").await.unwrap();
        assert_eq!(capture.pid(), pid);

        capture.stop().await;
        assert!(!capture.is_running());
        capture.stop().await;
    }

    #[smol_potat::test]
    async fn test_early_exit_leaves_capture_idle() {
        let dir = TempDir::new().unwrap();
        let program = Command::builder("sh")
            .arg("-c")
            .arg(r#"echo "tcpdump: $2: No such device exists" >&2; exit 1"#)
            .arg("fake-tcpdump")
            .build();
        let mut capture = PacketCapture::new("test0", dir.path(), true).with_program(program);

        capture.start("init").await.unwrap();
        assert!(!capture.is_running());
    }

    #[smol_potat::test]
    async fn test_readiness_must_name_our_interface() {
        let dir = TempDir::new().unwrap();
        let program = Command::builder("sh")
            .arg("-c")
            .arg(r#"echo "tcpdump: listening on other0" >&2; exit 0"#)
            .arg("fake-tcpdump")
            .build();
        let mut capture = PacketCapture::new("test0", dir.path(), true).with_program(program);

        capture.start("init").await.unwrap();
        assert!(!capture.is_running());
    }

    #[smol_potat::test]
    async fn test_disabled_capture_never_spawns() {
        let mut capture = PacketCapture::disabled().with_program(fake_tcpdump());
        capture.start("init").await.unwrap();
        assert!(!capture.is_running());
    }

    #[smol_potat::test]
    async fn test_missing_program_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut capture = PacketCapture::new("test0", dir.path(), true)
            .with_program(Command::new("this_capture_program_does_not_exist_12345"));

        assert!(capture.start("init").await.is_err());
        assert!(!capture.is_running());
    }

    #[test]
    fn test_output_path() {
        let capture = PacketCapture::new("br-1234", "/tmp/logs", true);
        assert_eq!(capture.output_path("test_topology"), Path::new("/tmp/logs/test_topology.pcap"));
    }
}
