//! Docker test environment
//!
//! One gateway (running the controller) and two repeaters are containers on
//! a private docker network named after the run's unique id. The network's
//! bridge interface on the host is where packets are captured.

use crate::capi::{ControlChannel, UccSocket};
use crate::capture::PacketCapture;
use crate::config::{RunOptions, Settings};
use crate::exec::ProcessRunner;
use crate::topology::{AlEntity, MAC_PATTERN, MacAddr};
use crate::{Error, Result};
use command_executor::{Command, Launcher, LocalLauncher, Target};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static UCC_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ucc_listener_port=(?P<port>[0-9]+)").expect("valid regex"));
static INET_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"inet (?P<ip>[0-9.]+)").expect("valid regex"));
static LINK_ETHER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"link/ether {}", MAC_PATTERN)).expect("valid regex")
});

/// Container names of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNames {
    /// Gateway running the controller
    pub gateway: String,
    /// Repeaters, in agent order
    pub repeaters: [String; 2],
}

impl DeviceNames {
    /// Names for the run identified by `unique_id`
    pub fn new(unique_id: &str) -> Self {
        Self {
            gateway: format!("gateway-{}", unique_id),
            repeaters: [
                format!("repeater1-{}", unique_id),
                format!("repeater2-{}", unique_id),
            ],
        }
    }
}

/// Name of the docker network of a run
pub fn network_name(unique_id: &str) -> String {
    format!("prplMesh-net-{}", unique_id)
}

#[derive(Debug, Deserialize)]
struct NetworkInspect {
    #[serde(rename = "Id", default)]
    id: Option<String>,
    #[serde(default)]
    plugins: Option<Vec<NetworkPlugin>>,
}

#[derive(Debug, Deserialize)]
struct NetworkPlugin {
    bridge: Option<String>,
}

/// Host interface of the bridge described by `docker network inspect` output.
///
/// podman reports it under `plugins`; docker does not report it at all, but
/// names it `br-` followed by the first 12 characters of the network id.
pub fn bridge_from_inspect(json: &[u8]) -> Result<String> {
    let networks: Vec<NetworkInspect> = serde_json::from_slice(json)?;
    let network = networks
        .into_iter()
        .next()
        .ok_or_else(|| Error::environment("network inspect returned no network"))?;

    if let Some(plugins) = network.plugins {
        return plugins
            .into_iter()
            .next()
            .and_then(|p| p.bridge)
            .ok_or_else(|| Error::environment("network plugins carry no bridge"));
    }

    let id = network
        .id
        .ok_or_else(|| Error::environment("network inspect lacks Id"))?;
    let short: String = id.chars().take(12).collect();
    Ok(format!("br-{}", short))
}

/// Port of the CAPI listener in a beerocks configuration file
pub fn ucc_port(config: &str) -> Result<u16> {
    let caps = UCC_PORT
        .captures(config)
        .ok_or_else(|| Error::environment("no ucc_listener_port in configuration"))?;
    caps["port"]
        .parse()
        .map_err(|e| Error::environment(format!("bad ucc_listener_port: {}", e)))
}

/// First IPv4 address in `ip addr show` output
pub fn inet_address(output: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(output);
    INET_ADDR
        .captures(&text)
        .map(|caps| caps["ip"].to_string())
        .ok_or_else(|| Error::environment(format!("no inet address in {:?}", text.trim())))
}

/// Hardware address in `ip -o link list` output
pub fn link_mac(output: &[u8]) -> Result<MacAddr> {
    let text = String::from_utf8_lossy(output);
    let caps = LINK_ETHER
        .captures(&text)
        .ok_or_else(|| Error::environment(format!("no link/ether in {:?}", text.trim())))?;
    caps["mac"].parse()
}

/// Host-side docker operations
#[derive(Debug, Clone)]
pub struct Docker {
    program: String,
    launcher: LocalLauncher,
}

impl Default for Docker {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl Docker {
    /// Use `program` as the docker client (e.g. `podman`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            launcher: LocalLauncher,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args);
        command
    }

    /// Bridge interface of `network`, creating the network if needed.
    ///
    /// The launch script normally creates the network, but capturing the
    /// bring-up needs the bridge before that.
    pub async fn find_bridge(&self, network: &str) -> Result<String> {
        let inspect = self.command(&["network", "inspect", network]);
        let output = self.launcher.output(&Target::Local, inspect.clone()).await?;
        let stdout = if output.status.success() {
            output.stdout
        } else {
            info!("Creating docker network {}", network);
            self.launcher
                .execute(&Target::Local, self.command(&["network", "create", network]))
                .await?;
            self.launcher.execute(&Target::Local, inspect).await?.stdout
        };
        bridge_from_inspect(&stdout)
    }
}

/// Start the containers with the launch script, capturing the bring-up
/// under the `init` label. The capture is stopped whether or not the script
/// succeeds.
pub async fn launch_devices(
    settings: &Settings,
    names: &DeviceNames,
    unique_id: &str,
    capture: &mut PacketCapture,
) -> Result<()> {
    let mut script = Command::new(settings.launch_script());
    script
        .args(["-f", "-u", unique_id, "-g", names.gateway.as_str()])
        .args(["-r", names.repeaters[0].as_str(), "-r", names.repeaters[1].as_str()])
        .arg("-d")
        .arg(settings.launch_delay_secs.to_string());

    capture.start("init").await?;
    info!("Launching devices: {}", script);
    let result = LocalLauncher.execute(&Target::Local, script).await;
    capture.stop().await;
    result?;
    Ok(())
}

/// Build the entity for container `name` from its installed configuration
/// and its live network state
pub async fn docker_entity(
    runner: &dyn ProcessRunner,
    settings: &Settings,
    name: &str,
    is_controller: bool,
) -> Result<AlEntity> {
    let config_name = if is_controller {
        "beerocks_controller.conf"
    } else {
        "beerocks_agent.conf"
    };
    let config_path = settings.install_dir().join("config").join(config_name);
    let config = async_fs::read_to_string(&config_path).await.map_err(|e| {
        Error::environment(format!("Can't read {}: {}", config_path.display(), e))
    })?;
    let port = ucc_port(&config)?;

    let mut ip = Command::new("ip");
    ip.args(["-f", "inet", "addr", "show", settings.bridge_name.as_str()]);
    let address = inet_address(&runner.run(name, ip).await?)?;

    let socket = UccSocket::new(address, port, settings.capi_timeout());
    let mac: MacAddr = socket.get_parameter("ALid", &[]).await?.parse()?;
    let mut entity = AlEntity::new(name, mac, is_controller, Box::new(socket));

    for iface in &settings.radio_interfaces {
        let mut link = Command::new("ip");
        link.args(["-o", "link", "list", "dev", iface.as_str()]);
        let radio_mac = link_mac(&runner.run(name, link).await?)?;
        debug!("{} {}: {}", name, iface, radio_mac);
        entity.add_radio(iface.clone(), radio_mac);
    }

    debug!("{}: {}", name, entity.mac());
    Ok(entity)
}

/// A running environment
pub struct Environment {
    /// The controller
    pub controller: Arc<AlEntity>,
    /// The agents, in launch order
    pub agents: Vec<Arc<AlEntity>>,
    /// Capture on the network's bridge, for the test cases to reuse
    pub capture: PacketCapture,
}

impl Environment {
    /// Bring up (or, with `skip_init`, attach to) the environment of a run
    pub async fn start(
        docker: &Docker,
        runner: &dyn ProcessRunner,
        settings: &Settings,
        options: &RunOptions,
    ) -> Result<Self> {
        let names = DeviceNames::new(&options.unique_id);
        let bridge = docker.find_bridge(&network_name(&options.unique_id)).await?;
        debug!("Capture interface: {}", bridge);

        let mut capture = PacketCapture::new(bridge, settings.capture_dir(), options.tcpdump)
            .with_program(Command::new(&settings.capture_program));

        if !options.skip_init {
            launch_devices(settings, &names, &options.unique_id, &mut capture).await?;
        }

        let controller = docker_entity(runner, settings, &names.gateway, true).await?;
        let mut agents = Vec::with_capacity(names.repeaters.len());
        for name in &names.repeaters {
            agents.push(Arc::new(docker_entity(runner, settings, name, false).await?));
        }

        Ok(Self {
            controller: Arc::new(controller),
            agents,
            capture,
        })
    }
}
