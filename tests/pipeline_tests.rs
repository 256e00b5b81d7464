use p1p2_bridge::frame::crc8;
use p1p2_bridge::{Bridge, BridgeConfig, FilterLevel, Transport};

fn seal(config: &BridgeConfig, payload: &[u8]) -> Vec<u8> {
    let mut record = config.serial_magic.as_bytes().to_vec();
    record.extend_from_slice(payload);
    record.push(crc8(config.crc_gen, config.crc_feed, payload));
    record.push(b'\n');
    record
}

fn mqtt_param_topics(messages: &[p1p2_bridge::OutboundMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.transport == Transport::Mqtt && m.topic.contains("/P/"))
        .map(|m| m.topic.clone())
        .collect()
}

/// Throttle ramp collapsed to a single step so admission is immediate.
fn instant_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.throttle_steps = 1;
    config
}

#[test]
fn test_unmarked_records_produce_no_updates_and_do_not_wedge() {
    let config = instant_config();
    let mut bridge = Bridge::new(config.clone());
    bridge.start(0);

    // Garbage record without the marker
    let out = bridge.feed(b"XXXX\x00\x00\x11\x15\x00\n", 100);
    assert!(mqtt_param_topics(&out.messages).is_empty());
    assert_eq!(bridge.table().len(), 0);

    // The stream advances past it; the next valid frame decodes normally
    let record = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x00]);
    let out = bridge.feed(&record, 200);
    assert!(!mqtt_param_topics(&out.messages).is_empty());
    assert!(bridge.table().len() > 0);
}

#[test]
fn test_any_corrupted_payload_byte_is_rejected() {
    let config = instant_config();
    let payload = [0x00u8, 0x00, 0x11, 0x15, 0x00, 0x15, 0x80];
    let record = seal(&config, &payload);

    // Flip one bit in each payload byte in turn; validation must fail every time
    let magic_len = config.serial_magic.len();
    for position in 0..payload.len() {
        let mut corrupted = record.clone();
        corrupted[magic_len + position] ^= 0x01;

        let mut bridge = Bridge::new(config.clone());
        bridge.start(0);
        let out = bridge.feed(&corrupted, 100);
        assert!(
            mqtt_param_topics(&out.messages).is_empty(),
            "corruption at byte {position} was not rejected"
        );
        assert_eq!(bridge.table().len(), 0);
    }

    // The pristine record still passes
    let mut bridge = Bridge::new(config);
    bridge.start(0);
    let out = bridge.feed(&record, 100);
    assert!(!mqtt_param_topics(&out.messages).is_empty());
}

#[test]
fn test_repeated_identical_frame_reports_once_at_changed_level() {
    let config = instant_config();
    let record = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x00, 0x15, 0x80]);
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    let first = bridge.feed(&record, 100);
    assert_eq!(mqtt_param_topics(&first.messages).len(), 2);

    // Same values again: nothing reportable at the default filter level
    let second = bridge.feed(&record, 200);
    assert!(mqtt_param_topics(&second.messages).is_empty());
}

#[test]
fn test_measurement_change_suppressed_at_level_two_admitted_at_zero() {
    // Temperature slot 3 of packet type 0x11, moving 21.0C to 21.5C
    let before = [0x00u8, 0x00, 0x11, 0, 0, 0, 0, 0, 0, 0x15, 0x00];
    let after = [0x00u8, 0x00, 0x11, 0, 0, 0, 0, 0, 0, 0x15, 0x80];
    let topic_suffix = "/T/0/4355";

    let mut config = instant_config();
    config.output_filter = FilterLevel::NoMeasurements;
    let mut bridge = Bridge::new(config.clone());
    bridge.start(0);
    bridge.feed(&seal(&config, &before), 100);
    let out = bridge.feed(&seal(&config, &after), 200);
    assert!(
        !mqtt_param_topics(&out.messages)
            .iter()
            .any(|t| t.ends_with(topic_suffix)),
        "measurement change leaked through level 2"
    );

    let mut config = instant_config();
    config.output_filter = FilterLevel::All;
    let mut bridge = Bridge::new(config.clone());
    bridge.start(0);
    bridge.feed(&seal(&config, &before), 100);
    let out = bridge.feed(&seal(&config, &after), 200);
    let topics = mqtt_param_topics(&out.messages);
    assert!(topics.iter().any(|t| t.ends_with(topic_suffix)));
    let message = out
        .messages
        .iter()
        .find(|m| m.topic.ends_with(topic_suffix))
        .unwrap();
    assert_eq!(message.payload, b"21.50".to_vec());
}

#[test]
fn test_filter_level_switch_via_command_applies_to_next_frame() {
    let config = instant_config();
    let before = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x00]);
    let after = seal(&config, &[0x00, 0x00, 0x11, 0x15, 0x80]);
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    bridge.feed(&before, 100);
    bridge.handle_command("S2", 150);
    let out = bridge.feed(&after, 200);
    assert!(mqtt_param_topics(&out.messages).is_empty());

    bridge.handle_command("S0", 250);
    let again = seal(bridge.config(), &[0x00, 0x00, 0x11, 0x15, 0x00]);
    let out = bridge.feed(&again, 300);
    assert!(!mqtt_param_topics(&out.messages).is_empty());
}

#[test]
fn test_throttle_ramp_eventually_reports_every_key() {
    // Five-step ramp, four seconds per step; eight temperature slots
    let config = BridgeConfig::default();
    let payload = [
        0x00u8, 0x00, 0x11, 0x15, 0x00, 0x15, 0x10, 0x15, 0x20, 0x15, 0x30, 0x15, 0x40, 0x15,
        0x50, 0x15, 0x60, 0x15, 0x70,
    ];
    let record = seal(&config, &payload);
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    let mut seen: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let out = bridge.feed(&record, 0);
    seen.extend(mqtt_param_topics(&out.messages));
    let early = seen.iter().filter(|t| t.contains("/T/")).count();
    assert!(early < 8, "ramp start should not cover the full key space");

    // Past the saturation point the pending keys replay from stored state
    let out = bridge.tick(20_000);
    seen.extend(mqtt_param_topics(&out.messages));
    let covered = seen.iter().filter(|t| t.contains("/T/")).count();
    assert_eq!(covered, 8, "all keys visible after the ramp saturates");
}

#[test]
fn test_pseudo_packets_flow_through_the_parameter_pipeline() {
    let config = instant_config();
    let mut bridge = Bridge::new(config);
    bridge.start(0);

    let out = bridge.tick(5_000);
    let topics = mqtt_param_topics(&out.messages);
    assert!(
        topics.iter().any(|t| t.contains("/S/1/")),
        "bridge telemetry should surface as ordinary parameters"
    );
}
