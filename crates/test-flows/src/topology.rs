//! Devices and radios under test
//!
//! An [`AlEntity`] is created once when the environment comes up and keeps its
//! identity for the whole run. Hardware addresses are held as [`MacAddr`],
//! which normalizes case so that comparisons never depend on how a tool
//! happened to print an address.

use crate::capi::{CapiCommand, CapiReply, ControlChannel, Tlv};
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Regular expression fragment matching a MAC address in a named `mac` group
pub const MAC_PATTERN: &str = r"(?P<mac>(?:[0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2})";

/// A 48-bit hardware address in colon notation, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(String);

impl MacAddr {
    /// Lowercase colon notation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Uppercase colon notation
    pub fn to_uppercase(&self) -> String {
        self.0.to_uppercase()
    }

    /// `0x`-prefixed hex without separators, as CAPI expects for radio UIDs
    pub fn to_hex(&self) -> String {
        format!("0x{}", self.0.replace(':', ""))
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let octets: Vec<&str> = s.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(Error::InvalidMac(s.to_string()));
        }
        Ok(MacAddr(s.to_ascii_lowercase()))
    }
}

impl TryFrom<&[u8]> for MacAddr {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidMac(String::from_utf8_lossy(bytes).into_owned()))?
            .parse()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A radio on an agent
#[derive(Debug, Clone)]
pub struct Radio {
    agent: MacAddr,
    iface: String,
    mac: MacAddr,
}

impl Radio {
    /// AL MAC of the device this radio belongs to
    pub fn agent(&self) -> &MacAddr {
        &self.agent
    }

    /// Interface label used to address the radio in commands (e.g. `wlan0`)
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Radio MAC, also its UID in the connection map
    pub fn mac(&self) -> &MacAddr {
        &self.mac
    }
}

/// A Multi-AP device (1905.1 AL entity).
///
/// A device running both agent and controller is modelled as two entities
/// sharing the same MAC, each with its own control channel.
pub struct AlEntity {
    name: String,
    mac: MacAddr,
    is_controller: bool,
    radios: Vec<Radio>,
    channel: Box<dyn ControlChannel>,
}

impl AlEntity {
    /// Create an entity reachable through `channel`
    pub fn new(
        name: impl Into<String>,
        mac: MacAddr,
        is_controller: bool,
        channel: Box<dyn ControlChannel>,
    ) -> Self {
        Self {
            name: name.into(),
            mac,
            is_controller,
            radios: Vec::new(),
            channel,
        }
    }

    /// Device label, used both for command dispatch and the log directory
    pub fn name(&self) -> &str {
        &self.name
    }

    /// AL MAC address
    pub fn mac(&self) -> &MacAddr {
        &self.mac
    }

    /// Whether this entity is the controller
    pub fn is_controller(&self) -> bool {
        self.is_controller
    }

    /// Append a radio. Duplicates are not checked.
    pub fn add_radio(&mut self, iface: impl Into<String>, mac: MacAddr) -> &Radio {
        self.radios.push(Radio {
            agent: self.mac.clone(),
            iface: iface.into(),
            mac,
        });
        &self.radios[self.radios.len() - 1]
    }

    /// Radios in the order they were added
    pub fn radios(&self) -> &[Radio] {
        &self.radios
    }

    /// Radio at `index`
    pub fn radio(&self, index: usize) -> Result<&Radio> {
        self.radios.get(index).ok_or_else(|| {
            Error::environment(format!("{} has no radio #{}", self.name, index))
        })
    }

    /// The control channel to this entity
    pub fn channel(&self) -> &dyn ControlChannel {
        self.channel.as_ref()
    }

    /// Send a CAPI command and return its reply
    pub async fn cmd_reply(&self, command: &CapiCommand) -> Result<CapiReply> {
        self.channel.send_command(command).await
    }

    /// Query a device parameter
    pub async fn dev_get_parameter(&self, name: &str, qualifiers: &[(&str, &str)]) -> Result<String> {
        self.channel.get_parameter(name, qualifiers).await
    }

    /// Send a 1905 message and return its message id
    pub async fn dev_send_1905(&self, dest: &MacAddr, message_type: u16, tlvs: &[Tlv]) -> Result<u16> {
        self.channel
            .send_protocol_message(dest, message_type, tlvs)
            .await
    }
}

impl fmt::Debug for AlEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlEntity")
            .field("name", &self.name)
            .field("mac", &self.mac)
            .field("is_controller", &self.is_controller)
            .field("radios", &self.radios)
            .finish_non_exhaustive()
    }
}
