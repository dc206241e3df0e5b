//! The test flows run against a gateway and two repeaters
//!
//! Each flow triggers something on a device (a CAPI command, a controller
//! CLI command or a simulated driver event) and then looks for the effect in
//! the device logs or in the controller's connection map. Failed checks are
//! counted, not raised, so a flow keeps going after a miss.

use crate::capi::{BssCredentials, BssInfo, CapiCommand, Tlv};
use crate::commands::{BwlEvent, CliCommand};
use crate::context::FlowContext;
use crate::conn_map::{ConnMap, MapRadio};
use crate::runner::TestRegistry;
use crate::topology::{AlEntity, MacAddr};
use crate::{Error, Result};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::time::Duration;
use tracing::debug;

const SECOND: Duration = Duration::from_secs(1);

/// Time an agent needs to apply a renewed configuration
const RENEW_SETTLE: Duration = Duration::from_secs(3);

/// How long the controller may take to notice a steered client reconnect
const STEERING_TIMEOUT: Duration = Duration::from_secs(5);

macro_rules! flows {
    ($($name:ident),+ $(,)?) => {
        /// Names of all flows, in run order
        pub const FLOW_NAMES: &[&str] = &[$(stringify!($name)),+];

        /// Registry holding every flow, in run order
        pub fn registry() -> Result<TestRegistry> {
            let mut registry = TestRegistry::new();
            $(
                registry.register(stringify!($name), {
                    fn case(ctx: &mut FlowContext) -> LocalBoxFuture<'_, Result<()>> {
                        $name(ctx).boxed_local()
                    }
                    case
                })?;
            )+
            Ok(registry)
        }
    };
}

// Sorted by name: later flows rely on the configuration left by earlier ones
flows!(
    ap_capability_query,
    ap_config_bss_tear_down,
    ap_config_renew,
    channel_selection,
    client_association,
    client_association_dummy,
    client_capability_query,
    client_steering_dummy,
    client_steering_mandate,
    client_steering_policy,
    combined_infra_metrics,
    higher_layer_data_payload_trigger,
    initial_ap_config,
    link_metric_query,
    topology,
);

fn mac(s: &str) -> Result<MacAddr> {
    s.parse()
}

fn credentials(ssid: &str, network_key: &str, backhaul: bool, fronthaul: bool) -> BssCredentials {
    BssCredentials {
        ssid: ssid.to_string(),
        auth_type: 0x0020,
        encryption_type: 0x0008,
        network_key: network_key.to_string(),
        backhaul,
        fronthaul,
    }
}

/// Reset the controller, give it new `bss_info` entries and make it push
/// them to `agent` with an autoconfig renew
async fn configure_and_renew(controller: &AlEntity, agent: &AlEntity, bss: &[BssInfo]) -> Result<()> {
    controller.cmd_reply(&CapiCommand::new("DEV_RESET_DEFAULT")).await?;

    let mut config = CapiCommand::new("DEV_SET_CONFIG");
    for (i, info) in bss.iter().enumerate() {
        config = config.param(format!("bss_info{}", i + 1), info);
    }
    controller.cmd_reply(&config).await?;

    send_renew(controller, agent).await
}

async fn send_renew(controller: &AlEntity, agent: &AlEntity) -> Result<()> {
    controller
        .dev_send_1905(
            agent.mac(),
            0x000A,
            &[
                Tlv::new(0x01, 0x0006, format!("{{{}}}", controller.mac())),
                Tlv::new(0x0F, 0x0001, "{0x00}"),
                Tlv::new(0x10, 0x0001, "{0x00}"),
            ],
        )
        .await?;
    Ok(())
}

/// Radio `uid` of device `device` in `map`, failing the check if absent
fn map_radio<'m>(
    ctx: &mut FlowContext,
    map: &'m ConnMap,
    device: &MacAddr,
    uid: &MacAddr,
) -> Result<Option<&'m MapRadio>> {
    let radio = map.device(device).and_then(|d| d.radio(uid));
    if radio.is_none() {
        ctx.fail(format!("radio {} of {} not in connection map", uid, device))?;
    }
    Ok(radio)
}

/// Fail for every VAP of `radio` whose SSID is configured and not `allowed`
fn check_vap_ssids(ctx: &mut FlowContext, radio: &MapRadio, allowed: Option<&[u8]>) -> Result<()> {
    for vap in radio.vaps.values() {
        if !vap.ssid.is_configured() {
            continue;
        }
        match allowed {
            Some(ssid) if vap.ssid.as_bytes() == ssid => {}
            Some(ssid) => {
                ctx.fail(format!(
                    "Wrong SSID: {} instead of {}",
                    vap.ssid,
                    String::from_utf8_lossy(ssid)
                ))?;
            }
            None => {
                ctx.fail(format!("Wrong SSID: {} instead torn down", vap.ssid))?;
            }
        }
    }
    Ok(())
}

async fn initial_ap_config(ctx: &mut FlowContext) -> Result<()> {
    let repeater1 = ctx.agent(0)?;
    for radio in ["agent_wlan0", "agent_wlan2"] {
        ctx.check_log(&repeater1, radio, r"WSC Global authentication success")
            .await?;
    }
    for radio in ["agent_wlan0", "agent_wlan2"] {
        ctx.check_log(&repeater1, radio, r"KWA \(Key Wrap Auth\) success")
            .await?;
    }
    for radio in ["agent_wlan0", "agent_wlan2"] {
        ctx.check_log(
            &repeater1,
            radio,
            r".* Controller configuration \(WSC M2 Encrypted Settings\)",
        )
        .await?;
    }
    Ok(())
}

async fn ap_config_renew(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let wlan0 = ctx.radio_mac(0, 0)?;

    // MAC addresses in bss_info are case insensitive
    let bss = [
        BssInfo::new(repeater1.mac(), "8x", credentials("Multi-AP-24G-1", "maprocks1", false, true))
            .with_uppercase_mac(),
        BssInfo::new(repeater1.mac(), "8x", credentials("Multi-AP-24G-2", "maprocks2", true, false)),
    ];
    configure_and_renew(&controller, &repeater1, &bss).await?;
    ctx.sleep(RENEW_SETTLE).await;

    ctx.check_log(
        &repeater1,
        "agent_wlan0",
        r"Received credentials for ssid: Multi-AP-24G-1 .* bss_type: 2",
    )
    .await?;
    ctx.check_log(
        &repeater1,
        "agent_wlan0",
        r"Received credentials for ssid: Multi-AP-24G-2 .* bss_type: 1",
    )
    .await?;
    ctx.check_log(&repeater1, "agent_wlan2", r".* tear down radio")
        .await?;

    let ruid = wlan0.to_hex();
    let bssid = repeater1
        .dev_get_parameter("macaddr", &[("ruid", ruid.as_str()), ("ssid", "Multi-AP-24G-1")])
        .await;
    match bssid {
        Ok(bssid) if !bssid.is_empty() => debug!("Multi-AP-24G-1 bssid {}", bssid),
        Ok(_) | Err(Error::Capi { .. }) => {
            ctx.fail("repeater1 didn't configure Multi-AP-24G-1")?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn ap_config_bss_tear_down(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let wlan0 = ctx.radio_mac(0, 0)?;
    let wlan2 = ctx.radio_mac(0, 1)?;

    let bss = [BssInfo::new(
        repeater1.mac(),
        "8x",
        credentials("Multi-AP-24G-3", "maprocks1", false, true),
    )];
    configure_and_renew(&controller, &repeater1, &bss).await?;
    ctx.sleep(RENEW_SETTLE).await;

    ctx.check_log(
        &repeater1,
        "agent_wlan0",
        r"Received credentials for ssid: Multi-AP-24G-3 .* bss_type: 2",
    )
    .await?;
    ctx.check_log(&repeater1, "agent_wlan2", r".* tear down radio")
        .await?;

    let map = ctx.conn_map().await?;
    if let Some(radio) = map_radio(ctx, &map, repeater1.mac(), &wlan0)? {
        check_vap_ssids(ctx, radio, Some(b"Multi-AP-24G-3".as_slice()))?;
    }
    if let Some(radio) = map_radio(ctx, &map, repeater1.mac(), &wlan2)? {
        check_vap_ssids(ctx, radio, None)?;
    }

    // Remove the SSIDs of the front radio as well
    let tear_down = CapiCommand::new("DEV_SET_CONFIG")
        .param("bss_info1", BssInfo::tear_down(repeater1.mac(), "8x"));
    controller.cmd_reply(&tear_down).await?;
    send_renew(&controller, &repeater1).await?;
    ctx.sleep(RENEW_SETTLE).await;

    ctx.check_log(&repeater1, "agent_wlan0", r".* tear down radio")
        .await?;
    let map = ctx.conn_map().await?;
    for uid in [&wlan0, &wlan2] {
        if let Some(radio) = map_radio(ctx, &map, repeater1.mac(), uid)? {
            check_vap_ssids(ctx, radio, None)?;
        }
    }
    Ok(())
}

async fn channel_selection(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;

    debug!("Send channel preference query");
    controller.dev_send_1905(repeater1.mac(), 0x8004, &[]).await?;
    ctx.sleep(SECOND).await;
    debug!("Confirming channel preference query has been received on agent");
    ctx.check_log(&repeater1, "agent_wlan0", "CHANNEL_PREFERENCE_QUERY_MESSAGE")
        .await?;
    ctx.check_log(&repeater1, "agent_wlan2", "CHANNEL_PREFERENCE_QUERY_MESSAGE")
        .await?;

    debug!("Send channel selection request");
    controller.dev_send_1905(repeater1.mac(), 0x8006, &[]).await?;
    ctx.sleep(SECOND).await;
    debug!("Confirming channel selection request has been received on agent");
    ctx.check_log(&repeater1, "agent_wlan0", "CHANNEL_SELECTION_REQUEST_MESSAGE")
        .await?;
    ctx.check_log(&repeater1, "agent_wlan2", "CHANNEL_SELECTION_REQUEST_MESSAGE")
        .await?;

    // TODO: check for ACK_MESSAGE once the agent handles it and the
    // controller sends a non-empty channel selection request
    Ok(())
}

async fn ap_capability_query(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;

    controller.dev_send_1905(repeater1.mac(), 0x8001, &[]).await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming ap capability query has been received on agent");
    ctx.check_log(&repeater1, "agent", "AP_CAPABILITY_QUERY_MESSAGE")
        .await?;

    debug!("Confirming ap capability report has been received on controller");
    ctx.check_log(&controller, "controller", "AP_CAPABILITY_REPORT_MESSAGE")
        .await?;
    Ok(())
}

async fn check_link_metric_response(ctx: &mut FlowContext, controller: &AlEntity) -> Result<()> {
    ctx.check_log(controller, "controller", "Received LINK_METRIC_RESPONSE_MESSAGE")
        .await?;
    ctx.check_log(controller, "controller", "Received TLV_TRANSMITTER_LINK_METRIC")
        .await?;
    ctx.check_log(controller, "controller", "Received TLV_RECEIVER_LINK_METRIC")
        .await?;
    Ok(())
}

async fn link_metric_query(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;

    controller
        .dev_send_1905(repeater1.mac(), 0x0005, &[Tlv::new(0x08, 0x0002, "0x00 0x02")])
        .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming link metric query has been received on agent");
    ctx.check_log(&repeater1, "agent", "Received LINK_METRIC_QUERY_MESSAGE")
        .await?;

    debug!("Confirming link metric response has been received on controller");
    check_link_metric_response(ctx, &controller).await
}

async fn combined_infra_metrics(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let repeater2 = ctx.agent(1)?;
    let r1_wlan0 = ctx.radio_mac(0, 0)?;
    let r2_wlan2 = ctx.radio_mac(1, 1)?;

    debug!("Send AP Metrics query message to agent 1");
    controller
        .dev_send_1905(
            repeater1.mac(),
            0x800B,
            &[Tlv::new(0x93, 0x0007, format!("0x01 {{{}}}", r1_wlan0))],
        )
        .await?;
    ctx.check_log(&repeater1, "agent_wlan0", "Received AP_METRICS_QUERY_MESSAGE")
        .await?;

    // The agent does not answer on its own yet, so send the response for it:
    // AP metrics, STA metrics without and with a connected STA, STA traffic
    repeater1
        .dev_send_1905(
            controller.mac(),
            0x800C,
            &[
                Tlv::new(0x94, 0x000d, format!("{{{}}} 0x01 0x0002 0x01 0x1f2f3f", r1_wlan0)),
                Tlv::new(0x96, 0x0007, "{55:44:33:22:11:00} 0x00"),
                Tlv::new(
                    0x96,
                    0x001a,
                    format!(
                        "{{66:44:33:22:11:00}} 0x01 {{{}}} 0x11223344 0x1a2a3a4a 0x1b2b3b4b 0x55",
                        r1_wlan0
                    ),
                ),
                Tlv::new(
                    0xa2,
                    0x0022,
                    "{55:44:33:22:11:00} 0x10203040 0x11213141 0x12223242 0x13233343 \
                     0x14243444 0x15253545 0x16263646",
                ),
            ],
        )
        .await?;
    ctx.check_log(&controller, "controller", "Received AP_METRICS_RESPONSE_MESSAGE")
        .await?;

    debug!("Send AP Metrics query message to agent 2");
    controller
        .dev_send_1905(
            repeater2.mac(),
            0x800B,
            &[Tlv::new(0x93, 0x0007, format!("0x01 {{{}}}", r2_wlan2))],
        )
        .await?;
    ctx.check_log(&repeater2, "agent_wlan2", "Received AP_METRICS_QUERY_MESSAGE")
        .await?;

    repeater2
        .dev_send_1905(
            controller.mac(),
            0x800C,
            &[
                Tlv::new(
                    0x94,
                    0x0010,
                    format!("{{{}}} 0x11 0x1002 0x90 0x1c2c3c 0x1d2d3d", r2_wlan2),
                ),
                Tlv::new(
                    0x96,
                    0x001a,
                    format!(
                        "{{77:44:33:22:11:00}} 0x01 {{{}}} 0x19293949 0x10203040 0x11213141 0x99",
                        r2_wlan2
                    ),
                ),
                Tlv::new(
                    0xa2,
                    0x0022,
                    "{77:44:33:22:11:00} 0xa0203040 0xa1213141 0xa2223242 0xa3233343 \
                     0xa4243444 0xa5253545 0xa6263646",
                ),
            ],
        )
        .await?;
    ctx.check_log(&controller, "controller", "Received AP_METRICS_RESPONSE_MESSAGE")
        .await?;

    debug!("Send 1905 Link metric query to agent 1 (neighbor gateway)");
    controller
        .dev_send_1905(
            repeater1.mac(),
            0x0005,
            &[Tlv::new(0x08, 0x0008, format!("0x01 {{{}}} 0x02", controller.mac()))],
        )
        .await?;
    ctx.check_log(&repeater1, "agent", "Received LINK_METRIC_QUERY_MESSAGE")
        .await?;
    check_link_metric_response(ctx, &controller).await?;

    debug!("Send Combined infrastructure metrics message to agent 1");
    controller.dev_send_1905(repeater1.mac(), 0x8013, &[]).await?;
    ctx.check_log(&repeater1, "agent", "Received COMBINED_INFRASTRUCTURE_METRICS")
        .await?;
    ctx.check_log(&repeater1, "agent", "Received TLV_TRANSMITTER_LINK_METRIC")
        .await?;
    ctx.check_log(&repeater1, "agent", "Received TLV_RECEIVER_LINK_METRIC")
        .await?;
    Ok(())
}

async fn client_capability_query(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let wlan0 = ctx.radio_mac(0, 0)?;
    let unconnected = mac("00:00:00:11:00:22")?;
    let connected = mac("00:00:00:11:00:33")?;

    debug!("Send client capability query for unconnected STA");
    controller
        .dev_send_1905(
            repeater1.mac(),
            0x8009,
            &[Tlv::new(0x90, 0x000C, format!("{} {}", wlan0, unconnected))],
        )
        .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming client capability query has been received on agent");
    ctx.check_log(&repeater1, "agent", r"CLIENT_CAPABILITY_QUERY_MESSAGE")
        .await?;

    debug!("Confirming client capability report message has been received on controller");
    ctx.check_log(&controller, "controller", r"Received CLIENT_CAPABILITY_REPORT_MESSAGE")
        .await?;
    ctx.check_log(
        &controller,
        "controller",
        &format!("Result Code= FAILURE, client MAC= {}, BSSID= {}", unconnected, wlan0),
    )
    .await?;

    debug!("Connect dummy STA to wlan0");
    ctx.send_bwl_event(&repeater1, "wlan0", &BwlEvent::StaConnected(connected.clone()))
        .await?;

    debug!("Send client capability query for connected STA");
    controller
        .dev_send_1905(
            repeater1.mac(),
            0x8009,
            &[Tlv::new(0x90, 0x000C, format!("{} {}", wlan0, connected))],
        )
        .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming client capability report message has been received on controller");
    ctx.check_log(&controller, "controller", r"Received CLIENT_CAPABILITY_REPORT_MESSAGE")
        .await?;
    ctx.check_log(
        &controller,
        "controller",
        &format!("Result Code= SUCCESS, client MAC= {}, BSSID= {}", connected, wlan0),
    )
    .await?;
    Ok(())
}

async fn client_association_dummy(ctx: &mut FlowContext) -> Result<()> {
    let repeater1 = ctx.agent(0)?;
    let wlan0 = ctx.radio_mac(0, 0)?;
    let wlan2 = ctx.radio_mac(0, 1)?;
    let sta = mac("11:11:33:44:55:66")?;

    debug!("Connect dummy STA to wlan0");
    ctx.send_bwl_event(&repeater1, "wlan0", &BwlEvent::StaConnected(sta.clone()))
        .await?;
    debug!("Send client association control request to the chosen BSSID (UNBLOCK)");
    ctx.beerocks_cli(&CliCommand::ClientAllow {
        sta: sta.clone(),
        bssid: wlan2,
    })
    .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming Client Association Control Request message was received (UNBLOCK)");
    ctx.check_log(
        &repeater1,
        "agent_wlan2",
        &format!("Got client allow request for {}", sta),
    )
    .await?;

    debug!("Send client association control request to all other (BLOCK)");
    ctx.beerocks_cli(&CliCommand::ClientDisallow {
        sta: sta.clone(),
        bssid: wlan0,
    })
    .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming Client Association Control Request message was received (BLOCK)");
    ctx.check_log(
        &repeater1,
        "agent_wlan0",
        &format!("Got client disallow request for {}", sta),
    )
    .await?;
    Ok(())
}

async fn client_steering_mandate(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let repeater2 = ctx.agent(1)?;
    let r1_wlan0 = ctx.radio_mac(0, 0)?;
    let r2_wlan0 = ctx.radio_mac(1, 0)?;

    for repeater in [&repeater1, &repeater2] {
        debug!("Send topology request to {}", repeater.name());
        controller.dev_send_1905(repeater.mac(), 0x0002, &[]).await?;
        ctx.sleep(SECOND).await;
        debug!("Confirming topology query was received");
        ctx.check_log(repeater, "agent", "TOPOLOGY_QUERY_MESSAGE")
            .await?;
    }

    debug!("Send Client Steering Request message for Steering Mandate to CTT Agent1");
    controller
        .dev_send_1905(
            repeater1.mac(),
            0x8014,
            &[Tlv::new(
                0x9B,
                0x001b,
                format!(
                    "{{{} 0xe0 0x0000 0x1388 0x01 {{0x000000110022}} 0x01 {{{} 0x73 0x24}}}}",
                    r1_wlan0, r2_wlan0
                ),
            )],
        )
        .await?;
    ctx.sleep(SECOND).await;
    debug!("Confirming Client Steering Request message was received - mandate");
    ctx.check_log(&repeater1, "agent_wlan0", "Got steer request")
        .await?;

    debug!("Confirming BTM Report message was received");
    ctx.check_log(&controller, "controller", "CLIENT_STEERING_BTM_REPORT_MESSAGE")
        .await?;

    debug!("Checking BTM Report source bssid");
    ctx.check_log(
        &controller,
        "controller",
        &format!("BTM_REPORT from source bssid {}", r1_wlan0),
    )
    .await?;

    debug!("Confirming ACK message was received");
    ctx.check_log(&repeater1, "agent_wlan0", "ACK_MESSAGE")
        .await?;

    controller
        .dev_send_1905(
            repeater1.mac(),
            0x8014,
            &[Tlv::new(
                0x9B,
                0x000C,
                format!("{{{} 0x00 0x000A 0x0000 0x00}}", r1_wlan0),
            )],
        )
        .await?;
    ctx.sleep(SECOND).await;
    debug!("Confirming Client Steering Request message was received - Opportunity");
    ctx.check_log(&repeater1, "agent_wlan0", "CLIENT_STEERING_REQUEST_MESSAGE")
        .await?;

    debug!("Confirming ACK message was received");
    ctx.check_log(&controller, "controller", "ACK_MESSAGE")
        .await?;

    debug!("Confirming steering completed message was received");
    ctx.check_log(&controller, "controller", "STEERING_COMPLETED_MESSAGE")
        .await?;

    debug!("Confirming ACK message was received");
    ctx.check_log(&repeater1, "agent_wlan0", "ACK_MESSAGE")
        .await?;
    Ok(())
}

async fn client_steering_dummy(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let repeater2 = ctx.agent(1)?;
    let wlan2 = ctx.radio_mac(0, 1)?;
    let sta = mac("11:22:33:44:55:66")?;

    debug!("Connect dummy STA to wlan0");
    ctx.send_bwl_event(&repeater1, "wlan0", &BwlEvent::StaConnected(sta.clone()))
        .await?;
    debug!("Send steer request");
    ctx.beerocks_cli(&CliCommand::SteerClient {
        sta: sta.clone(),
        bssid: wlan2,
    })
    .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming Client Association Control Request message was received (UNBLOCK)");
    ctx.check_log(&repeater1, "agent_wlan2", r"Got client allow request")
        .await?;

    for (repeater, radio) in [
        (&repeater1, "agent_wlan0"),
        (&repeater2, "agent_wlan0"),
        (&repeater2, "agent_wlan2"),
    ] {
        debug!("Confirming Client Association Control Request message was received (BLOCK)");
        ctx.check_log(repeater, radio, r"Got client disallow request")
            .await?;
    }

    debug!("Confirming Client Steering Request message was received - mandate");
    ctx.check_log(&repeater1, "agent_wlan0", r"Got steer request")
        .await?;

    debug!("Confirming BTM Report message was received");
    ctx.check_log(&controller, "controller", r"CLIENT_STEERING_BTM_REPORT_MESSAGE")
        .await?;

    debug!("Confirming ACK message was received");
    ctx.check_log(&repeater1, "agent_wlan0", r"ACK_MESSAGE")
        .await?;

    debug!("Disconnect dummy STA from wlan0");
    ctx.send_bwl_event(&repeater1, "wlan0", &BwlEvent::StaDisconnected(sta.clone()))
        .await?;
    // The controller must see the disconnect before the connect
    ctx.sleep(SECOND).await;

    debug!("Connect dummy STA to wlan2");
    ctx.send_bwl_event(&repeater1, "wlan2", &BwlEvent::StaConnected(sta.clone()))
        .await?;
    debug!("Confirm steering success by client connected");
    ctx.wait_for_log(
        &controller,
        "controller",
        &format!("steering successful for sta {}", sta),
        STEERING_TIMEOUT,
    )
    .await?;
    ctx.check_log(
        &controller,
        "controller",
        &format!("sta {} disconnected due to steering request", sta),
    )
    .await?;
    Ok(())
}

async fn client_steering_policy(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;

    debug!("Send client steering policy to agent 1");
    let mid = controller
        .dev_send_1905(
            repeater1.mac(),
            0x8003,
            &[Tlv::new(
                0x89,
                0x000C,
                "{0x00 0x00 0x01 {0x112233445566 0x01 0xFF 0x14}}",
            )],
        )
        .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming client steering policy has been received on agent");
    ctx.check_log(&repeater1, "agent_wlan0", r"MULTI_AP_POLICY_CONFIG_REQUEST_MESSAGE")
        .await?;
    ctx.sleep(SECOND).await;

    debug!("Confirming client steering policy ack message has been received on the controller");
    ctx.check_log(
        &controller,
        "controller",
        &format!("ACK_MESSAGE, mid=0x{:04x}", mid),
    )
    .await?;
    Ok(())
}

async fn client_association(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let wlan0 = ctx.radio_mac(0, 0)?;

    debug!("Send topology request to agent 1");
    controller.dev_send_1905(repeater1.mac(), 0x0002, &[]).await?;
    debug!("Confirming topology query was received");
    ctx.check_log(&repeater1, "agent", r"TOPOLOGY_QUERY_MESSAGE")
        .await?;

    debug!("Send client association control message");
    controller
        .dev_send_1905(
            repeater1.mac(),
            0x8016,
            &[Tlv::new(
                0x9D,
                0x000F,
                format!("{{{} 0x00 0x1E 0x01 {{0x000000110022}}}}", wlan0),
            )],
        )
        .await?;

    debug!("Confirming client association control message has been received on agent");
    ctx.check_log(&repeater1, "agent_wlan0", r"CLIENT_ASSOCIATION_CONTROL_REQUEST_MESSAGE")
        .await?;
    ctx.check_log(&repeater1, "agent_wlan2", r"CLIENT_ASSOCIATION_CONTROL_REQUEST_MESSAGE")
        .await?;

    debug!("Confirming ACK message was received on controller");
    ctx.check_log(&controller, "controller", r"ACK_MESSAGE")
        .await?;
    Ok(())
}

/// 200 copies of `al_mac` in hex, 1200 octets in total
fn higher_layer_payload(al_mac: &MacAddr) -> String {
    let hex = al_mac.to_hex();
    vec![hex.as_str(); 200].join(" ")
}

async fn higher_layer_data_payload_trigger(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;
    let payload = higher_layer_payload(controller.mac());

    debug!("Send Higher Layer Data message");
    let mid = controller
        .dev_send_1905(
            repeater1.mac(),
            0x8018,
            &[Tlv::new(0xA0, 0x04b1, format!("{{0x00 {}}}", payload))],
        )
        .await?;

    debug!("Confirming higher layer data message was received in the agent");
    ctx.check_log(&repeater1, "agent", r"HIGHER_LAYER_DATA_MESSAGE")
        .await?;

    debug!("Confirming matching protocol and payload length");
    ctx.check_log(&repeater1, "agent", r"protocol: 0").await?;
    ctx.check_log(&repeater1, "agent", r"payload_length: 0x4b0")
        .await?;

    debug!("Confirming ACK message was received in the controller");
    ctx.check_log(
        &controller,
        "controller",
        &format!("ACK_MESSAGE, mid=0x{:04x}", mid),
    )
    .await?;
    Ok(())
}

async fn topology(ctx: &mut FlowContext) -> Result<()> {
    let controller = ctx.controller();
    let repeater1 = ctx.agent(0)?;

    controller.dev_send_1905(repeater1.mac(), 0x0002, &[]).await?;
    debug!("Confirming topology query was received");
    ctx.check_log(&repeater1, "agent", r"TOPOLOGY_QUERY_MESSAGE")
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_holds_every_flow_in_order() {
        let registry = registry().unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, FLOW_NAMES);
        assert_eq!(registry.len(), 15);
        assert_eq!(names.first(), Some(&"ap_capability_query"));
        assert_eq!(names.last(), Some(&"topology"));
    }

    #[test]
    fn test_default_order_is_sorted_by_name() {
        let registry = registry().unwrap();
        let order: Vec<&str> = registry.select(&[]).unwrap().into_iter().map(|(n, _)| n).collect();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(order, sorted);

        // The renew restores the BSSs the tear-down removed
        let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(position("ap_config_bss_tear_down") < position("ap_config_renew"));
        assert!(position("ap_config_renew") < position("client_capability_query"));
    }

    #[test]
    fn test_higher_layer_payload_is_1200_octets() {
        let payload = higher_layer_payload(&mac("02:42:c0:a8:64:02").unwrap());
        let octets: Vec<&str> = payload.split(' ').collect();
        assert_eq!(octets.len(), 200);
        assert!(octets.iter().all(|o| *o == "0x0242c0a86402"));
        assert_eq!(octets.len() * 6, 0x4b0);
    }

    #[test]
    fn test_bss_tear_down_payload() {
        let al_mac = mac("02:42:c0:a8:64:03").unwrap();
        let command = CapiCommand::new("DEV_SET_CONFIG")
            .param("bss_info1", BssInfo::tear_down(&al_mac, "8x"));
        assert_eq!(
            command.encode().unwrap(),
            "DEV_SET_CONFIG,bss_info1,02:42:c0:a8:64:03 8x"
        );
    }
}
