//! Connection map: the controller's current view of the mesh
//!
//! The map is rebuilt from the controller CLI's `bml_conn_map` output on
//! every query. Nothing is cached between snapshots, so a VAP that vanished
//! from the output is gone from the next [`ConnMap`] as well.
//!
//! Only three kinds of lines are meaningful, distinguished by indentation:
//!
//! ```text
//!             IRE_BRIDGE: name: repeater1, mac: 02:42:c0:a8:64:03, ipv4: 192.168.100.3
//!                 RADIO: mac: 02:42:c0:a8:64:10, ch: 1, bw: 20, freq: 2412
//!                     fVAP[0]: vap_id: 0, bssid: 02:42:c0:a8:64:11, ssid: Multi-AP-24G-1
//! ```

use crate::topology::{MAC_PATTERN, MacAddr};
use crate::{Error, Result};
use indexmap::IndexMap;
use regex::bytes::Regex;
use std::fmt;
use std::sync::LazyLock;

static DEVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^ {{8,}}IRE_BRIDGE: .* mac: {}", MAC_PATTERN)).expect("valid regex")
});
static RADIO_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^ {{16}}RADIO: .* mac: {}", MAC_PATTERN)).expect("valid regex")
});
static VAP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^ {{20}}fVAP.* bssid: {}, ssid: (?P<ssid>(?-u:.)*)$",
        MAC_PATTERN
    ))
    .expect("valid regex")
});

/// SSID of a VAP as printed by the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ssid {
    /// The `N/A` marker: the VAP exists but carries no configuration
    NotConfigured,
    /// Raw SSID bytes; not necessarily UTF-8
    Named(Vec<u8>),
}

impl Ssid {
    /// Literal the controller prints for an unconfigured VAP
    pub const NOT_CONFIGURED: &'static [u8] = b"N/A";

    /// Interpret raw SSID bytes from the status output
    pub fn from_bytes(raw: &[u8]) -> Self {
        if raw == Self::NOT_CONFIGURED {
            Ssid::NotConfigured
        } else {
            Ssid::Named(raw.to_vec())
        }
    }

    /// The bytes exactly as they appeared in the output
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Ssid::NotConfigured => Self::NOT_CONFIGURED,
            Ssid::Named(bytes) => bytes,
        }
    }

    /// True for the `N/A` marker
    pub fn is_configured(&self) -> bool {
        !matches!(self, Ssid::NotConfigured)
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// A VAP in the connection map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapVap {
    /// BSSID of the VAP
    pub bssid: MacAddr,
    /// Its SSID
    pub ssid: Ssid,
}

/// A radio in the connection map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRadio {
    /// Radio UID
    pub uid: MacAddr,
    /// VAPs keyed by BSSID
    pub vaps: IndexMap<MacAddr, MapVap>,
}

impl MapRadio {
    fn new(uid: MacAddr) -> Self {
        Self {
            uid,
            vaps: IndexMap::new(),
        }
    }

    fn add_vap(&mut self, bssid: MacAddr, ssid: Ssid) {
        self.vaps.insert(bssid.clone(), MapVap { bssid, ssid });
    }
}

/// A device in the connection map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDevice {
    /// AL MAC of the device
    pub mac: MacAddr,
    /// Radios keyed by UID
    pub radios: IndexMap<MacAddr, MapRadio>,
}

impl MapDevice {
    fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            radios: IndexMap::new(),
        }
    }

    /// Radio with the given UID
    pub fn radio(&self, uid: &MacAddr) -> Option<&MapRadio> {
        self.radios.get(uid)
    }
}

/// Point-in-time snapshot of the topology as seen by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnMap {
    devices: IndexMap<MacAddr, MapDevice>,
}

impl ConnMap {
    /// Parse `bml_conn_map` output.
    ///
    /// A radio line before any device, or a VAP line before any radio, means
    /// the output does not have the expected nesting and is rejected.
    pub fn parse(output: &[u8]) -> Result<Self> {
        let mut devices: IndexMap<MacAddr, MapDevice> = IndexMap::new();
        let mut cur_device: Option<MacAddr> = None;
        let mut cur_radio: Option<MacAddr> = None;

        for (index, line) in output.split(|b| *b == b'\n').enumerate() {
            let lineno = index + 1;

            if let Some(caps) = DEVICE_LINE.captures(line) {
                let mac = MacAddr::try_from(&caps["mac"])?;
                devices.insert(mac.clone(), MapDevice::new(mac.clone()));
                cur_device = Some(mac);
                cur_radio = None;
            } else if let Some(caps) = RADIO_LINE.captures(line) {
                let device = cur_device
                    .as_ref()
                    .and_then(|mac| devices.get_mut(mac))
                    .ok_or_else(|| Error::conn_map(lineno, "radio outside of any device"))?;
                let uid = MacAddr::try_from(&caps["mac"])?;
                device.radios.insert(uid.clone(), MapRadio::new(uid.clone()));
                cur_radio = Some(uid);
            } else if let Some(caps) = VAP_LINE.captures(line) {
                let radio = match (&cur_device, &cur_radio) {
                    (Some(dev), Some(uid)) => devices
                        .get_mut(dev)
                        .and_then(|d| d.radios.get_mut(uid)),
                    _ => None,
                }
                .ok_or_else(|| Error::conn_map(lineno, "VAP outside of any radio"))?;
                let bssid = MacAddr::try_from(&caps["mac"])?;
                radio.add_vap(bssid, Ssid::from_bytes(&caps["ssid"]));
            }
        }

        Ok(Self { devices })
    }

    /// Device with the given AL MAC
    pub fn device(&self, mac: &MacAddr) -> Option<&MapDevice> {
        self.devices.get(mac)
    }

    /// All devices in output order
    pub fn devices(&self) -> impl Iterator<Item = &MapDevice> {
        self.devices.values()
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if no device line was found
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &[u8] = b"\
bml_connection_map:
    GW_BRIDGE: name: gateway, mac: 02:42:c0:a8:64:02, ipv4: 192.168.100.2
        ETHERNET: mac: 02:42:c0:a8:64:02
            IRE_BRIDGE: name: repeater1, mac: 02:42:C0:A8:64:03, ipv4: 192.168.100.3
                RADIO: mac: 02:42:c0:a8:64:10, ch: 1, bw: 20, freq: 2412
                    fVAP[0]: vap_id: 0, bssid: 02:42:c0:a8:64:11, ssid: Multi-AP-24G-1
                RADIO: mac: 02:42:c0:a8:64:20, ch: 149, bw: 80, freq: 5745
                    fVAP[0]: vap_id: 0, bssid: 02:42:c0:a8:64:21, ssid: N/A
";

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_device_with_two_radios() {
        let map = ConnMap::parse(FIXTURE).unwrap();
        assert_eq!(map.len(), 1);

        let repeater = map.device(&mac("02:42:c0:a8:64:03")).unwrap();
        assert_eq!(repeater.radios.len(), 2);

        let wlan0 = repeater.radio(&mac("02:42:c0:a8:64:10")).unwrap();
        assert_eq!(wlan0.vaps.len(), 1);
        let vap = &wlan0.vaps[&mac("02:42:c0:a8:64:11")];
        assert_eq!(vap.ssid, Ssid::Named(b"Multi-AP-24G-1".to_vec()));

        let wlan2 = repeater.radio(&mac("02:42:C0:A8:64:20")).unwrap();
        assert_eq!(wlan2.vaps.len(), 1);
        let vap = wlan2.vaps.values().next().unwrap();
        assert_eq!(vap.ssid, Ssid::NotConfigured);
        assert!(!vap.ssid.is_configured());
        assert_eq!(vap.ssid.as_bytes(), b"N/A");
    }

    #[test]
    fn test_reparse_is_independent() {
        let first = ConnMap::parse(FIXTURE).unwrap();
        let mut second = ConnMap::parse(FIXTURE).unwrap();
        assert_eq!(first, second);

        second.devices.clear();
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_ssid_bytes_round_trip() {
        let output = b"            IRE_BRIDGE: name: r, mac: 02:00:00:00:00:01, ipv4: x
                RADIO: mac: 02:00:00:00:01:00, ch: 1
                    fVAP[0]: vap_id: 0, bssid: 02:00:00:00:01:01, ssid: caf\xc3\xa9 \xff, with comma
";
        let map = ConnMap::parse(output).unwrap();
        let device = map.devices().next().unwrap();
        let vap = device.radios[0].vaps.values().next().unwrap();
        assert_eq!(vap.ssid.as_bytes(), b"caf\xc3\xa9 \xff, with comma");
    }

    #[test]
    fn test_radio_depth_is_exact() {
        let output = b"            IRE_BRIDGE: name: r, mac: 02:00:00:00:00:01, ipv4: x
                  RADIO: mac: 02:00:00:00:01:00, ch: 1
";
        let map = ConnMap::parse(output).unwrap();
        assert!(map.devices().next().unwrap().radios.is_empty());
    }

    #[test]
    fn test_orphan_lines_are_rejected() {
        let orphan_radio = b"                RADIO: mac: 02:00:00:00:01:00, ch: 1\n";
        match ConnMap::parse(orphan_radio) {
            Err(Error::ConnMap { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected ConnMap error, got {:?}", other),
        }

        let orphan_vap = b"            IRE_BRIDGE: name: r, mac: 02:00:00:00:00:01, ipv4: x
                    fVAP[0]: vap_id: 0, bssid: 02:00:00:00:01:01, ssid: x
";
        assert!(matches!(
            ConnMap::parse(orphan_vap),
            Err(Error::ConnMap { line: 2, .. })
        ));
    }

    #[test]
    fn test_irrelevant_text_is_ignored() {
        let map = ConnMap::parse(b"bml_connection_map:\nnothing to see\n").unwrap();
        assert!(map.is_empty());
    }
}
