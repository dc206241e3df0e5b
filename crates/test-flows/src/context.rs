//! What a test case sees of the environment
//!
//! [`FlowContext`] holds the device handles set up at startup together with
//! the per-case failure counter, and wraps the actions cases combine: log
//! checks, controller CLI commands and simulated driver events.

use crate::commands::{BwlEvent, CliCommand};
use crate::config::Settings;
use crate::conn_map::ConnMap;
use crate::exec::ProcessRunner;
use crate::log_check::{LogChecker, LogHandle};
use crate::runner::Checks;
use crate::topology::{AlEntity, MacAddr};
use crate::{Error, Result};
use command_executor::Command;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Devices, collaborators and failure bookkeeping shared by all cases
pub struct FlowContext {
    controller: Arc<AlEntity>,
    agents: Vec<Arc<AlEntity>>,
    runner: Arc<dyn ProcessRunner>,
    settings: Settings,
    checker: LogChecker,
    checks: Checks,
    running: String,
}

impl FlowContext {
    /// Assemble a context from an already running environment
    pub fn new(
        controller: Arc<AlEntity>,
        agents: Vec<Arc<AlEntity>>,
        runner: Arc<dyn ProcessRunner>,
        settings: Settings,
        checks: Checks,
    ) -> Self {
        let checker = settings.log_checker();
        Self {
            controller,
            agents,
            runner,
            settings,
            checker,
            checks,
            running: String::new(),
        }
    }

    /// The controller entity
    pub fn controller(&self) -> Arc<AlEntity> {
        Arc::clone(&self.controller)
    }

    /// Agent at `index`, in launch order
    pub fn agent(&self, index: usize) -> Result<Arc<AlEntity>> {
        self.agents
            .get(index)
            .cloned()
            .ok_or_else(|| Error::environment(format!("no agent #{}", index)))
    }

    /// Radio MAC of radio `radio` on agent `agent`
    pub fn radio_mac(&self, agent: usize, radio: usize) -> Result<MacAddr> {
        Ok(self.agent(agent)?.radio(radio)?.mac().clone())
    }

    /// Settings of this run
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Failure counter of the current case
    pub fn checks(&self) -> &Checks {
        &self.checks
    }

    /// Name of the case currently running
    pub fn running(&self) -> &str {
        &self.running
    }

    /// Mark `name` as running with a fresh failure count
    pub fn start_case(&mut self, name: &str) {
        self.running = name.to_string();
        self.checks.reset();
        info!("{} starting", name);
    }

    /// Record a failed check. See [`Checks::fail`].
    pub fn fail(&mut self, message: impl fmt::Display) -> Result<bool> {
        self.checks.fail(message)
    }

    fn log_handle(&self, device: &AlEntity, program: &str) -> LogHandle {
        LogHandle::new(
            device.name(),
            format!("{}{}", self.settings.log_program_prefix, program),
        )
    }

    /// Check once that the log of `program` on `device` has a line matching
    /// `pattern`. `program` omits the common log prefix, e.g. `agent_wlan0`.
    pub async fn check_log(&mut self, device: &AlEntity, program: &str, pattern: &str) -> Result<bool> {
        let pattern = Regex::new(pattern)?;
        let handle = self.log_handle(device, program);
        self.checker
            .check_once(&mut self.checks, &handle, &pattern)
            .await
    }

    /// Like [`check_log`](Self::check_log) but keep looking until `timeout`
    pub async fn wait_for_log(
        &mut self,
        device: &AlEntity,
        program: &str,
        pattern: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let pattern = Regex::new(pattern)?;
        let handle = self.log_handle(device, program);
        self.checker
            .wait_for(&mut self.checks, &handle, &pattern, timeout)
            .await
    }

    /// Run a controller CLI command on the controller device
    pub async fn beerocks_cli(&self, command: &CliCommand) -> Result<Vec<u8>> {
        debug!("Send CLI command {}", command);
        let mut cli = Command::new(self.settings.cli_path());
        cli.arg("-c").arg(command.to_string());
        let output = self.runner.run(self.controller.name(), cli).await?;
        debug!("  Response: {}", String::from_utf8_lossy(&output).trim());
        Ok(output)
    }

    /// Fetch and parse a fresh connection map from the controller
    pub async fn conn_map(&self) -> Result<ConnMap> {
        let output = self.beerocks_cli(&CliCommand::ConnMap).await?;
        ConnMap::parse(&output)
    }

    /// Inject `event` into the dummy driver of `iface` on `device`
    pub async fn send_bwl_event(&self, device: &AlEntity, iface: &str, event: &BwlEvent) -> Result<()> {
        debug!("Send BWL event to {} {}: {}", device.name(), iface, event);
        let command = Command::builder("sh")
            .arg("-c")
            .arg(event.shell_script(iface))
            .build();
        self.runner.run(device.name(), command).await?;
        Ok(())
    }

    /// Give the devices time to react
    pub async fn sleep(&self, duration: Duration) {
        smol::Timer::after(duration).await;
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("controller", &self.controller)
            .field("agents", &self.agents)
            .field("running", &self.running)
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capi::tests::ScriptedChannel;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every command and answers with fixed output
    struct RecordingRunner {
        calls: Mutex<Vec<(String, String)>>,
        output: Vec<u8>,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(&self, device: &str, command: Command) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .unwrap()
                .push((device.to_string(), command.to_string()));
            Ok(self.output.clone())
        }
    }

    fn context(root: &std::path::Path, output: &[u8]) -> (FlowContext, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
            output: output.to_vec(),
        });
        let settings = Settings {
            root_dir: root.to_path_buf(),
            check_grace_ms: 0,
            poll_interval_ms: 20,
            ..Settings::default()
        };
        let gateway = AlEntity::new(
            "gateway-ci",
            "02:42:c0:a8:64:02".parse().unwrap(),
            true,
            ScriptedChannel::boxed([]),
        );
        let mut repeater = AlEntity::new(
            "repeater1-ci",
            "02:42:c0:a8:64:03".parse().unwrap(),
            false,
            ScriptedChannel::boxed([]),
        );
        repeater.add_radio("wlan0", "02:42:c0:a8:64:10".parse().unwrap());
        let ctx = FlowContext::new(
            Arc::new(gateway),
            vec![Arc::new(repeater)],
            runner.clone(),
            settings,
            Checks::new(false),
        );
        (ctx, runner)
    }

    #[smol_potat::test]
    async fn test_check_log_uses_program_prefix() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs").join("repeater1-ci");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(
            log_dir.join("beerocks_agent_wlan0.log"),
            "WSC Global authentication success\n",
        )
        .unwrap();

        let (mut ctx, _) = context(dir.path(), b"");
        let repeater = ctx.agent(0).unwrap();

        assert!(ctx
            .check_log(&repeater, "agent_wlan0", "WSC Global authentication success")
            .await
            .unwrap());
        assert!(!ctx
            .check_log(&repeater, "agent_wlan2", "WSC Global authentication success")
            .await
            .unwrap());
        assert_eq!(ctx.checks().count(), 1);
    }

    #[smol_potat::test]
    async fn test_wait_for_log_sees_late_line() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs").join("gateway-ci");
        std::fs::create_dir_all(&log_dir).unwrap();
        let (mut ctx, _) = context(dir.path(), b"");
        let controller = ctx.controller();

        let writer = smol::spawn(async move {
            smol::Timer::after(Duration::from_millis(100)).await;
            std::fs::write(
                log_dir.join("beerocks_controller.log"),
                "steering successful for sta 11:22:33:44:55:66\n",
            )
            .unwrap();
        });

        assert!(ctx
            .wait_for_log(
                &controller,
                "controller",
                "steering successful for sta 11:22:33:44:55:66",
                Duration::from_secs(2),
            )
            .await
            .unwrap());
        assert_eq!(ctx.checks().count(), 0);
        writer.await;

        assert!(!ctx
            .wait_for_log(&controller, "controller", "never", Duration::from_millis(50))
            .await
            .unwrap());
        assert_eq!(ctx.checks().count(), 1);
    }

    #[smol_potat::test]
    async fn test_invalid_pattern_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (mut ctx, _) = context(dir.path(), b"");
        let controller = ctx.controller();
        assert!(matches!(
            ctx.check_log(&controller, "controller", "(unclosed").await,
            Err(Error::Pattern(_))
        ));
    }

    #[smol_potat::test]
    async fn test_cli_runs_on_controller() {
        let dir = TempDir::new().unwrap();
        let (ctx, runner) = context(dir.path(), b"");
        let sta: MacAddr = "11:22:33:44:55:66".parse().unwrap();
        let bssid = ctx.radio_mac(0, 0).unwrap();

        ctx.beerocks_cli(&CliCommand::ClientAllow { sta, bssid })
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "gateway-ci");
        assert!(calls[0]
            .1
            .ends_with("build/install/bin/beerocks_cli -c 'client_allow 11:22:33:44:55:66 02:42:c0:a8:64:10'"));
    }

    #[smol_potat::test]
    async fn test_bwl_event_goes_to_device_shell() {
        let dir = TempDir::new().unwrap();
        let (ctx, runner) = context(dir.path(), b"");
        let repeater = ctx.agent(0).unwrap();
        let sta: MacAddr = "11:22:33:44:55:66".parse().unwrap();

        ctx.send_bwl_event(&repeater, "wlan0", &BwlEvent::StaConnected(sta))
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, "repeater1-ci");
        assert!(calls[0].1.starts_with("sh -c "));
        assert!(calls[0].1.contains("/tmp/$USER/beerocks/wlan0/EVENT"));
    }

    #[smol_potat::test]
    async fn test_conn_map_is_parsed_from_cli_output() {
        let dir = TempDir::new().unwrap();
        let output = [
            format!("{}IRE_BRIDGE: name: repeater1, mac: 02:42:c0:a8:64:03, ipv4: 192.168.100.3", " ".repeat(12)),
            format!("{}RADIO: mac: 02:42:c0:a8:64:10, ch: 1", " ".repeat(16)),
        ]
        .join("\n");
        let (ctx, _) = context(dir.path(), output.as_bytes());

        let map = ctx.conn_map().await.unwrap();
        let device = map.device(&"02:42:C0:A8:64:03".parse().unwrap()).unwrap();
        assert_eq!(device.radios.len(), 1);
    }

    #[test]
    fn test_missing_agent_is_an_environment_error() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(dir.path(), b"");
        assert!(matches!(ctx.agent(3), Err(Error::Environment(_))));
        assert!(ctx.radio_mac(0, 1).is_err());
    }
}
