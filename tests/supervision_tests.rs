use p1p2_bridge::frame::crc8;
use p1p2_bridge::supervisor::RestartSignal;
use p1p2_bridge::{Bridge, BridgeConfig, Transport};

fn seal(config: &BridgeConfig, payload: &[u8]) -> Vec<u8> {
    let mut record = config.serial_magic.as_bytes().to_vec();
    record.extend_from_slice(payload);
    record.push(crc8(config.crc_gen, config.crc_feed, payload));
    record.push(b'\n');
    record
}

fn mqtt_count(messages: &[p1p2_bridge::OutboundMessage]) -> usize {
    messages
        .iter()
        .filter(|m| m.transport == Transport::Mqtt)
        .count()
}

fn instant_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.throttle_steps = 1;
    config
}

#[test]
fn test_disconnect_gap_sends_nothing_then_restarts_exactly_once() {
    let config = instant_config();
    let record = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x00]);
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    bridge.transport_disconnected(1_000);

    // Continue policy is off by default: nothing reaches the broker
    let out = bridge.feed(&record, 2_000);
    assert_eq!(mqtt_count(&out.messages), 0);

    let out = bridge.tick(60_000);
    assert_eq!(mqtt_count(&out.messages), 0);
    assert!(out.restart.is_none());

    // Threshold is 150s from the loss report
    let out = bridge.tick(151_000);
    assert_eq!(
        out.restart,
        Some(RestartSignal::TransportLost {
            disconnected_ms: 150_000
        })
    );

    // Only once per episode
    let out = bridge.tick(200_000);
    assert!(out.restart.is_none());
}

#[test]
fn test_continue_policy_keeps_publishing_while_disconnected() {
    let mut config = instant_config();
    config.disconnect_continue = true;
    let record = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x00]);
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    bridge.transport_disconnected(1_000);
    let out = bridge.feed(&record, 2_000);
    assert!(mqtt_count(&out.messages) > 0);
}

#[test]
fn test_reconnect_replays_updates_held_during_the_gap() {
    let config = instant_config();
    let record = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x80]);
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    bridge.transport_disconnected(1_000);
    let out = bridge.feed(&record, 2_000);
    assert_eq!(mqtt_count(&out.messages), 0);
    // The value was still recorded
    assert_eq!(bridge.table().len(), 1);

    let out = bridge.transport_connected(10_000);
    let replayed: Vec<_> = out
        .messages
        .iter()
        .filter(|m| m.transport == Transport::Mqtt && m.topic.ends_with("/T/0/4352"))
        .collect();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].payload, b"21.50".to_vec());
}

#[test]
fn test_low_memory_skips_sends_but_still_updates_the_table() {
    let config = instant_config();
    let watermark = config.min_free_memory;
    let record = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x00, 0x15, 0x80]);
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    bridge.report_free_memory(Some(watermark - 1));
    let out = bridge.feed(&record, 1_000);
    assert_eq!(mqtt_count(&out.messages), 0);
    assert_eq!(bridge.table().len(), 2);

    // Pressure relieved: held updates replay on the next service cycle
    bridge.report_free_memory(Some(watermark * 10));
    let out = bridge.tick(2_000);
    assert!(out
        .messages
        .iter()
        .any(|m| m.transport == Transport::Mqtt && m.topic.contains("/T/")));
}

#[test]
fn test_restart_command_reports_operator_request() {
    let mut bridge = Bridge::new(instant_config());
    bridge.start(0);
    let out = bridge.handle_command("K", 500);
    assert_eq!(out.restart, Some(RestartSignal::Requested));

    // A textual acknowledgement still goes out
    assert!(out
        .messages
        .iter()
        .any(|m| m.payload == b"restart requested".to_vec()));
}
