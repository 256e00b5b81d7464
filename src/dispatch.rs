use crate::config::BridgeConfig;
use crate::output::{ContentKind, OutputMode, Transport};
use crate::params::{ParamUpdate, ParameterKey};
use serde_json::json;

/// One rendered payload bound for a transport channel. The engine never
/// performs I/O itself; the daemon drains these into the real transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub transport: Transport,
    /// Full topic for the messaging transport; a short channel tag for the
    /// console and serial channels.
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Messaging-transport delivery gate for one cycle. Console and serial
/// channels are never gated.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryGate {
    pub connected: bool,
    pub disconnect_continue: bool,
    pub low_memory: bool,
}

impl DeliveryGate {
    pub fn open() -> Self {
        Self {
            connected: true,
            disconnect_continue: false,
            low_memory: false,
        }
    }

    /// Sends are withheld while disconnected unless the continue policy is
    /// set, and skipped entirely under memory pressure (graceful
    /// degradation, not an error).
    pub fn mqtt_allowed(&self) -> bool {
        (self.connected || self.disconnect_continue) && !self.low_memory
    }
}

/// Renders admitted updates into channel-specific payloads per the output
/// mode, using the deterministic topic scheme derived from the parameter
/// key.
#[derive(Debug)]
pub struct ChannelDispatcher {
    topic_hexdata: String,
    topic_bindata: String,
    topic_signal: String,
    topic_json: String,
    param_prefix: String,
    retain: bool,
    publish_all: bool,
    discoverable: Option<fn(&ParameterKey) -> bool>,
}

impl ChannelDispatcher {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            topic_hexdata: config.topic_hexdata(),
            topic_bindata: config.topic_bindata(),
            topic_signal: config.topic_signal(),
            topic_json: config.topic_json(),
            param_prefix: config.param_topic_prefix(),
            retain: config.mqtt_retain,
            publish_all: config.publish_all,
            discoverable: None,
        }
    }

    /// Install the reduced-publication predicate used when `publish_all` is
    /// false. Membership of the reduced subset is supplied by the caller;
    /// without a predicate everything is published.
    pub fn set_discoverable_predicate(&mut self, predicate: fn(&ParameterKey) -> bool) {
        self.discoverable = Some(predicate);
    }

    /// Per-parameter topic: fixed prefix, then category code, source index
    /// and parameter index at fixed positions.
    pub fn param_topic(&self, key: &ParameterKey) -> String {
        format!(
            "{}/{}/{}/{}",
            self.param_prefix,
            key.category.code(),
            key.source,
            key.index
        )
    }

    /// Render the raw-frame echo (and binary echo) for one packet.
    pub fn dispatch_frame(
        &self,
        mode: OutputMode,
        gate: &DeliveryGate,
        raw: &[u8],
    ) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        let hex = hex_string(raw);

        if mode.enabled(ContentKind::RawFrame, Transport::Mqtt) && gate.mqtt_allowed() {
            messages.push(self.mqtt(&self.topic_hexdata, hex.clone().into_bytes()));
        }
        if mode.enabled(ContentKind::RawFrame, Transport::Console) {
            messages.push(tagged(Transport::Console, "R", hex.clone().into_bytes()));
        }
        if mode.enabled(ContentKind::RawFrame, Transport::Serial) {
            messages.push(tagged(Transport::Serial, "R", hex.into_bytes()));
        }
        if mode.enabled(ContentKind::RawBin, Transport::Mqtt) && gate.mqtt_allowed() {
            messages.push(self.mqtt(&self.topic_bindata, raw.to_vec()));
        }

        messages
    }

    /// Render per-parameter payloads and the aggregated document for all
    /// admitted updates of one decode cycle.
    pub fn dispatch_updates(
        &self,
        mode: OutputMode,
        gate: &DeliveryGate,
        updates: &[ParamUpdate],
    ) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        if updates.is_empty() {
            return messages;
        }

        let mqtt_ok = gate.mqtt_allowed();

        if mode.enabled(ContentKind::Parameter, Transport::Mqtt) && mqtt_ok {
            for update in self.mqtt_visible(updates) {
                messages.push(self.mqtt(
                    &self.param_topic(&update.key),
                    update.value.render().into_bytes(),
                ));
            }
        }
        for transport in [Transport::Console, Transport::Serial] {
            if mode.enabled(ContentKind::Parameter, transport) {
                for update in updates {
                    let line = format!("{} {}", self.param_topic(&update.key), update.value.render());
                    messages.push(tagged(transport, "P", line.into_bytes()));
                }
            }
        }

        if mode.any_transport(ContentKind::Json) {
            let mqtt_doc = self.json_document(&self.mqtt_visible(updates));
            let full_doc = self.json_document(&updates.iter().collect::<Vec<_>>());
            if mode.enabled(ContentKind::Json, Transport::Mqtt) && mqtt_ok {
                messages.push(self.mqtt(&self.topic_json, mqtt_doc.into_bytes()));
            }
            if mode.enabled(ContentKind::Json, Transport::Console) {
                messages.push(tagged(Transport::Console, "J", full_doc.clone().into_bytes()));
            }
            if mode.enabled(ContentKind::Json, Transport::Serial) {
                messages.push(tagged(Transport::Serial, "J", full_doc.into_bytes()));
            }
        }

        messages
    }

    /// Timing metadata rides the raw-frame channel with a `C` prefix.
    pub fn dispatch_timing(
        &self,
        mode: OutputMode,
        gate: &DeliveryGate,
        line: &str,
    ) -> Vec<OutboundMessage> {
        if !mode.timing_enabled() {
            return Vec::new();
        }
        self.metadata_line(mode, gate, 'C', line)
    }

    /// Error metadata rides the raw-frame channel with a `*` prefix.
    pub fn dispatch_error(
        &self,
        mode: OutputMode,
        gate: &DeliveryGate,
        line: &str,
    ) -> Vec<OutboundMessage> {
        if !mode.errors_enabled() {
            return Vec::new();
        }
        self.metadata_line(mode, gate, '*', line)
    }

    /// Informational output for the signal topic and the console.
    pub fn dispatch_info(&self, gate: &DeliveryGate, line: &str) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        if gate.mqtt_allowed() {
            messages.push(self.mqtt(&self.topic_signal, line.as_bytes().to_vec()));
        }
        messages.push(tagged(Transport::Console, "S", line.as_bytes().to_vec()));
        messages
    }

    fn metadata_line(
        &self,
        mode: OutputMode,
        gate: &DeliveryGate,
        prefix: char,
        line: &str,
    ) -> Vec<OutboundMessage> {
        let body = format!("{prefix} {line}");
        let mut messages = Vec::new();
        if mode.enabled(ContentKind::RawFrame, Transport::Mqtt) && gate.mqtt_allowed() {
            messages.push(self.mqtt(&self.topic_hexdata, body.clone().into_bytes()));
        }
        if mode.enabled(ContentKind::RawFrame, Transport::Console) {
            messages.push(tagged(Transport::Console, "R", body.into_bytes()));
        }
        messages
    }

    fn json_document(&self, updates: &[&ParamUpdate]) -> String {
        let mut doc = serde_json::Map::new();
        for update in updates {
            let key = format!(
                "{}/{}/{}",
                update.key.category.code(),
                update.key.source,
                update.key.index
            );
            doc.insert(key, update.value.to_json());
        }
        json!(doc).to_string()
    }

    fn mqtt_visible<'a>(&self, updates: &'a [ParamUpdate]) -> Vec<&'a ParamUpdate> {
        updates
            .iter()
            .filter(|u| {
                self.publish_all
                    || self
                        .discoverable
                        .map_or(true, |discoverable| discoverable(&u.key))
            })
            .collect()
    }

    fn mqtt(&self, topic: &str, payload: Vec<u8>) -> OutboundMessage {
        OutboundMessage {
            transport: Transport::Mqtt,
            topic: topic.to_string(),
            payload,
            retain: self.retain,
        }
    }
}

fn tagged(transport: Transport, tag: &str, payload: Vec<u8>) -> OutboundMessage {
    OutboundMessage {
        transport,
        topic: tag.to_string(),
        payload,
        retain: false,
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
