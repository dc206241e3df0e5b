//! Typed commands for the controller CLI and the simulated wireless driver

use crate::topology::MacAddr;
use std::fmt;

/// A `beerocks_cli -c` command executed on the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Dump the connection map
    ConnMap,
    /// Allow `sta` to associate with `bssid`
    ClientAllow {
        /// Station MAC
        sta: MacAddr,
        /// Target BSSID
        bssid: MacAddr,
    },
    /// Block `sta` from `bssid`
    ClientDisallow {
        /// Station MAC
        sta: MacAddr,
        /// Blocked BSSID
        bssid: MacAddr,
    },
    /// Steer `sta` towards `bssid`
    SteerClient {
        /// Station MAC
        sta: MacAddr,
        /// Target BSSID
        bssid: MacAddr,
    },
}

impl fmt::Display for CliCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliCommand::ConnMap => f.write_str("bml_conn_map"),
            CliCommand::ClientAllow { sta, bssid } => write!(f, "client_allow {} {}", sta, bssid),
            CliCommand::ClientDisallow { sta, bssid } => {
                write!(f, "client_disallow {} {}", sta, bssid)
            }
            CliCommand::SteerClient { sta, bssid } => write!(f, "steer_client {} {}", sta, bssid),
        }
    }
}

/// An event injected into a radio's dummy BWL driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BwlEvent {
    /// A station associated
    StaConnected(MacAddr),
    /// A station left
    StaDisconnected(MacAddr),
}

impl fmt::Display for BwlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BwlEvent::StaConnected(sta) => write!(f, "EVENT AP-STA-CONNECTED {}", sta),
            BwlEvent::StaDisconnected(sta) => write!(f, "EVENT AP-STA-DISCONNECTED {}", sta),
        }
    }
}

impl BwlEvent {
    /// Shell snippet writing the event to the radio's event FIFO.
    ///
    /// The FIFO path depends on `$USER` inside the container, hence the shell.
    /// The event text only ever contains fixed words and MAC addresses.
    pub fn shell_script(&self, iface: &str) -> String {
        format!("echo \"{}\" > /tmp/$USER/beerocks/{}/EVENT", self, iface)
    }
}
