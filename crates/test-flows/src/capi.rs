//! Device control channel (Wi-Fi Alliance CAPI over the UCC socket)
//!
//! Every command is built with [`CapiCommand`] instead of string formatting so
//! that a stray separator in an SSID or TLV value is caught before it reaches
//! the device. The wire format is one line per command:
//!
//! ```text
//! > DEV_SEND_1905,DestALid,02:42:c0:a8:64:03,MessageTypeValue,0x8004
//! < status,RUNNING
//! < status,COMPLETE,MID,0x00a1
//! ```

use crate::topology::MacAddr;
use crate::{Error, Result};
use async_net::TcpStream;
use async_trait::async_trait;
use futures::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use futures::StreamExt;
use indexmap::IndexMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// A CAPI command: a name followed by ordered parameter/value pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapiCommand {
    name: String,
    params: Vec<(String, String)>,
}

impl CapiCommand {
    /// Start a command without parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// `dev_get_parameter` for `name`, narrowed by qualifiers such as `ruid`
    pub fn get_parameter(name: &str, qualifiers: &[(&str, &str)]) -> Self {
        let mut command = CapiCommand::new("dev_get_parameter")
            .param("program", "map")
            .param("parameter", name);
        for (key, value) in qualifiers {
            command = command.param(*key, value);
        }
        command
    }

    /// `DEV_SEND_1905` of `message_type` to `dest` carrying `tlvs`
    pub fn send_1905(dest: &MacAddr, message_type: u16, tlvs: &[Tlv]) -> Self {
        let mut command = CapiCommand::new("DEV_SEND_1905")
            .param("DestALid", dest)
            .param("MessageTypeValue", format!("0x{:04x}", message_type));

        if let [tlv] = tlvs {
            command = command
                .param("tlv_type", format!("0x{:02x}", tlv.tlv_type))
                .param("tlv_length", format!("0x{:04x}", tlv.length))
                .param("tlv_value", &tlv.value);
        } else {
            for (i, tlv) in tlvs.iter().enumerate() {
                let n = i + 1;
                command = command
                    .param(format!("tlv_type{}", n), format!("0x{:02x}", tlv.tlv_type))
                    .param(format!("tlv_length{}", n), format!("0x{:04x}", tlv.length))
                    .param(format!("tlv_value{}", n), &tlv.value);
            }
        }
        command
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the wire line (without terminator).
    ///
    /// Fails if any field contains the `,` separator or a line break, which
    /// would silently shift every following parameter.
    pub fn encode(&self) -> Result<String> {
        let fields = std::iter::once(self.name.as_str())
            .chain(self.params.iter().flat_map(|(k, v)| [k.as_str(), v.as_str()]));

        let mut line = String::new();
        for (i, field) in fields.enumerate() {
            if field.contains([',', '\n', '\r']) {
                return Err(Error::capi(
                    &self.name,
                    format!("field {:?} contains a separator", field),
                ));
            }
            if i > 0 {
                line.push(',');
            }
            line.push_str(field);
        }
        Ok(line)
    }
}

/// A TLV given to `DEV_SEND_1905`; the value uses CAPI's `{...}`/`0x..` notation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// TLV type
    pub tlv_type: u8,
    /// Declared payload length
    pub length: u16,
    /// Payload in CAPI notation
    pub value: String,
}

impl Tlv {
    /// Create a TLV
    pub fn new(tlv_type: u8, length: u16, value: impl Into<String>) -> Self {
        Self {
            tlv_type,
            length,
            value: value.into(),
        }
    }
}

/// Credentials part of a `bss_info` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssCredentials {
    /// SSID to configure
    pub ssid: String,
    /// Authentication type bitmap, e.g. `0x0020` for WPA2-PSK
    pub auth_type: u16,
    /// Encryption type bitmap, e.g. `0x0008` for AES
    pub encryption_type: u16,
    /// Network key
    pub network_key: String,
    /// Backhaul BSS flag
    pub backhaul: bool,
    /// Fronthaul BSS flag
    pub fronthaul: bool,
}

/// One `bss_infoN` value of `DEV_SET_CONFIG`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssInfo {
    al_mac: MacAddr,
    uppercase_mac: bool,
    operating_class: String,
    credentials: Option<BssCredentials>,
}

impl BssInfo {
    /// Configure a BSS on the agent `al_mac` for `operating_class` (e.g. `8x`)
    pub fn new(al_mac: &MacAddr, operating_class: impl Into<String>, credentials: BssCredentials) -> Self {
        Self {
            al_mac: al_mac.clone(),
            uppercase_mac: false,
            operating_class: operating_class.into(),
            credentials: Some(credentials),
        }
    }

    /// Tear down every BSS of `operating_class` on the agent
    pub fn tear_down(al_mac: &MacAddr, operating_class: impl Into<String>) -> Self {
        Self {
            al_mac: al_mac.clone(),
            uppercase_mac: false,
            operating_class: operating_class.into(),
            credentials: None,
        }
    }

    /// Print the AL MAC in uppercase
    pub fn with_uppercase_mac(mut self) -> Self {
        self.uppercase_mac = true;
        self
    }
}

impl fmt::Display for BssInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uppercase_mac {
            write!(f, "{} {}", self.al_mac.to_uppercase(), self.operating_class)?;
        } else {
            write!(f, "{} {}", self.al_mac, self.operating_class)?;
        }
        if let Some(c) = &self.credentials {
            write!(
                f,
                " {} 0x{:04x} 0x{:04x} {} {} {}",
                c.ssid,
                c.auth_type,
                c.encryption_type,
                c.network_key,
                u8::from(c.backhaul),
                u8::from(c.fronthaul)
            )?;
        }
        Ok(())
    }
}

/// Key/value pairs of a `status,COMPLETE` reply, in reply order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapiReply {
    params: IndexMap<String, String>,
}

impl CapiReply {
    /// Parse a final reply line for `command`
    pub fn parse(command: &str, line: &str) -> Result<Self> {
        let line = line.trim();
        let mut fields = line.split(',');
        if fields.next() != Some("status") {
            return Err(Error::capi(command, format!("unexpected reply {:?}", line)));
        }
        match fields.next() {
            Some("COMPLETE") => {}
            Some(status) => {
                let detail: Vec<&str> = fields.collect();
                return Err(Error::capi(
                    command,
                    format!("status {} {}", status, detail.join(",")),
                ));
            }
            None => return Err(Error::capi(command, "empty status")),
        }

        let rest: Vec<&str> = fields.collect();
        if rest.len() % 2 != 0 {
            return Err(Error::capi(command, format!("unpaired reply fields in {:?}", line)));
        }
        let params = rest
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();
        Ok(Self { params })
    }

    /// Value of `key`, matched case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Request/reply channel to a device.
///
/// Implementors only provide [`send_command`](ControlChannel::send_command);
/// the parameter and 1905 helpers are expressed in terms of it.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Send a command and wait for its final reply
    async fn send_command(&self, command: &CapiCommand) -> Result<CapiReply>;

    /// Read a device parameter such as `ALid` or `macaddr`
    async fn get_parameter(&self, name: &str, qualifiers: &[(&str, &str)]) -> Result<String> {
        let command = CapiCommand::get_parameter(name, qualifiers);
        let reply = self.send_command(&command).await?;
        reply
            .get(name)
            .map(str::to_string)
            .ok_or_else(|| Error::capi(command.name(), format!("reply lacks `{}`", name)))
    }

    /// Send a 1905 message and return the message id assigned by the device
    async fn send_protocol_message(&self, dest: &MacAddr, message_type: u16, tlvs: &[Tlv]) -> Result<u16> {
        let command = CapiCommand::send_1905(dest, message_type, tlvs);
        let reply = self.send_command(&command).await?;
        let mid = reply
            .get("mid")
            .ok_or_else(|| Error::capi(command.name(), "reply lacks MID"))?;
        let digits = mid.trim_start_matches("0x").trim_start_matches("0X");
        u16::from_str_radix(digits, 16)
            .map_err(|e| Error::capi(command.name(), format!("bad MID {:?}: {}", mid, e)))
    }
}

/// CAPI client over the device's UCC listener. One TCP connection per command.
#[derive(Debug, Clone)]
pub struct UccSocket {
    host: String,
    port: u16,
    timeout: Duration,
}

impl UccSocket {
    /// Create a client for `host:port`
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    async fn exchange(&self, command: &CapiCommand, line: String) -> Result<CapiReply> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let mut writer = stream.clone();
        writer.write_all(format!("{}\n", line).as_bytes()).await?;
        writer.flush().await?;

        let mut lines = BufReader::new(stream).lines();
        while let Some(reply) = lines.next().await {
            let reply = reply?;
            let reply = reply.trim();
            if reply.is_empty() || reply.starts_with("status,RUNNING") {
                continue;
            }
            debug!("  Reply: {}", reply);
            return CapiReply::parse(command.name(), reply);
        }
        Err(Error::capi(command.name(), "connection closed before reply"))
    }
}

#[async_trait]
impl ControlChannel for UccSocket {
    async fn send_command(&self, command: &CapiCommand) -> Result<CapiReply> {
        let line = command.encode()?;
        debug!("Send CAPI command to {}:{}: {}", self.host, self.port, line);

        let timeout = self.timeout;
        smol::future::or(self.exchange(command, line), async move {
            smol::Timer::after(timeout).await;
            Err(Error::capi(
                command.name(),
                format!("no reply within {:?}", timeout),
            ))
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Channel that records encoded commands and answers from a script;
    /// once the script runs out every command completes without parameters.
    pub(crate) struct ScriptedChannel {
        pub(crate) sent: Mutex<Vec<String>>,
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedChannel {
        pub(crate) fn new<const N: usize>(replies: [&str; N]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }
        }

        pub(crate) fn boxed<const N: usize>(replies: [&str; N]) -> Box<dyn ControlChannel> {
            Box::new(Self::new(replies))
        }
    }

    #[async_trait]
    impl ControlChannel for ScriptedChannel {
        async fn send_command(&self, command: &CapiCommand) -> Result<CapiReply> {
            self.sent.lock().unwrap().push(command.encode()?);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "status,COMPLETE".to_string());
            CapiReply::parse(command.name(), &reply)
        }
    }

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_encode_single_tlv() {
        let cmd = CapiCommand::send_1905(
            &mac("02:42:C0:A8:64:03"),
            0x0005,
            &[Tlv::new(0x08, 0x0002, "0x00 0x02")],
        );
        assert_eq!(
            cmd.encode().unwrap(),
            "DEV_SEND_1905,DestALid,02:42:c0:a8:64:03,MessageTypeValue,0x0005,\
             tlv_type,0x08,tlv_length,0x0002,tlv_value,0x00 0x02"
        );
    }

    #[test]
    fn test_encode_numbers_multiple_tlvs() {
        let cmd = CapiCommand::send_1905(
            &mac("02:42:c0:a8:64:03"),
            0x000A,
            &[
                Tlv::new(0x01, 0x0006, "{02:42:c0:a8:64:02}"),
                Tlv::new(0x0F, 0x0001, "{0x00}"),
            ],
        );
        let line = cmd.encode().unwrap();
        assert!(line.ends_with(
            "tlv_type1,0x01,tlv_length1,0x0006,tlv_value1,{02:42:c0:a8:64:02},\
             tlv_type2,0x0f,tlv_length2,0x0001,tlv_value2,{0x00}"
        ));
    }

    #[test]
    fn test_encode_without_tlvs() {
        let cmd = CapiCommand::send_1905(&mac("02:42:c0:a8:64:03"), 0x8004, &[]);
        assert_eq!(
            cmd.encode().unwrap(),
            "DEV_SEND_1905,DestALid,02:42:c0:a8:64:03,MessageTypeValue,0x8004"
        );
    }

    #[test]
    fn test_encode_rejects_separator_in_value() {
        let cmd = CapiCommand::new("DEV_SET_CONFIG").param("bss_info1", "evil,ssid");
        assert!(matches!(cmd.encode(), Err(Error::Capi { .. })));

        let cmd = CapiCommand::new("DEV_SET_CONFIG").param("bss_info1", "line\nbreak");
        assert!(cmd.encode().is_err());
    }

    #[test]
    fn test_get_parameter_with_qualifiers() {
        let cmd = CapiCommand::get_parameter("macaddr", &[("ruid", "0x0242c0a86410"), ("ssid", "Multi-AP-24G-1")]);
        assert_eq!(
            cmd.encode().unwrap(),
            "dev_get_parameter,program,map,parameter,macaddr,ruid,0x0242c0a86410,ssid,Multi-AP-24G-1"
        );
    }

    #[test]
    fn test_bss_info_rendering() {
        let agent = mac("02:42:c0:a8:64:03");
        let creds = BssCredentials {
            ssid: "Multi-AP-24G-1".to_string(),
            auth_type: 0x0020,
            encryption_type: 0x0008,
            network_key: "maprocks1".to_string(),
            backhaul: false,
            fronthaul: true,
        };
        let info = BssInfo::new(&agent, "8x", creds).with_uppercase_mac();
        assert_eq!(
            info.to_string(),
            "02:42:C0:A8:64:03 8x Multi-AP-24G-1 0x0020 0x0008 maprocks1 0 1"
        );
        assert_eq!(BssInfo::tear_down(&agent, "8x").to_string(), "02:42:c0:a8:64:03 8x");
    }

    #[test]
    fn test_reply_parsing() {
        let reply = CapiReply::parse("dev_get_parameter", "status,COMPLETE,ALid,02:42:c0:a8:64:02\r\n").unwrap();
        assert_eq!(reply.get("alid"), Some("02:42:c0:a8:64:02"));

        assert!(CapiReply::parse("x", "status,INVALID,errorCode,unknown command").is_err());
        assert!(CapiReply::parse("x", "status,COMPLETE,dangling").is_err());
        assert!(CapiReply::parse("x", "garbage").is_err());
    }

    #[smol_potat::test]
    async fn test_default_helpers_use_send_command() {
        let channel = ScriptedChannel::new([
            "status,COMPLETE,ALid,02:42:C0:A8:64:02",
            "status,COMPLETE,MID,0x00a1",
        ]);

        let alid = channel.get_parameter("ALid", &[]).await.unwrap();
        assert_eq!(alid, "02:42:C0:A8:64:02");

        let mid = channel
            .send_protocol_message(&mac("02:42:c0:a8:64:03"), 0x0002, &[])
            .await
            .unwrap();
        assert_eq!(mid, 0xa1);

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[0], "dev_get_parameter,program,map,parameter,ALid");
        assert!(sent[1].starts_with("DEV_SEND_1905,DestALid,02:42:c0:a8:64:03"));
    }

    #[smol_potat::test]
    async fn test_ucc_socket_round_trip() {
        let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = smol::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut writer = stream.clone();
            let mut lines = BufReader::new(stream).lines();
            let request = lines.next().await.unwrap().unwrap();
            writer
                .write_all(b"status,RUNNING\r\nstatus,COMPLETE,ALid,02:42:c0:a8:64:02\r\n")
                .await
                .unwrap();
            request
        });

        let socket = UccSocket::new("127.0.0.1", port, Duration::from_secs(5));
        let alid = socket.get_parameter("ALid", &[]).await.unwrap();

        assert_eq!(alid, "02:42:c0:a8:64:02");
        assert_eq!(server.await, "dev_get_parameter,program,map,parameter,ALid");
    }

    #[smol_potat::test]
    async fn test_ucc_socket_times_out() {
        let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = smol::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            smol::Timer::after(Duration::from_secs(5)).await;
            drop(stream);
        });

        let socket = UccSocket::new("127.0.0.1", port, Duration::from_millis(200));
        let result = socket.send_command(&CapiCommand::new("DEV_RESET_DEFAULT")).await;
        assert!(matches!(result, Err(Error::Capi { .. })));
    }
}
