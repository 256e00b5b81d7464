use serde::{Deserialize, Serialize};

/// Kind of content a channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    /// Verbatim frame bytes, hex-rendered where the transport is textual.
    RawFrame,
    /// One topic/value pair per parameter.
    Parameter,
    /// Aggregated structured document per decode cycle.
    Json,
    /// Unmodified binary frame payload.
    RawBin,
}

/// Transport channel an eligible update can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Mqtt,
    Console,
    Serial,
}

// Legacy bitmask layout, kept for the J command wire format
const BIT_RAW_MQTT: u16 = 0x0001;
const BIT_PARAM_MQTT: u16 = 0x0002;
const BIT_JSON_MQTT: u16 = 0x0004;
const BIT_INCLUDE_UNKNOWN: u16 = 0x0008;
const BIT_RAW_CONSOLE: u16 = 0x0010;
const BIT_PARAM_CONSOLE: u16 = 0x0020;
const BIT_JSON_CONSOLE: u16 = 0x0040;
const BIT_RAW_SERIAL: u16 = 0x0100;
const BIT_PARAM_SERIAL: u16 = 0x0200;
const BIT_JSON_SERIAL: u16 = 0x0400;
const BIT_RAWBIN_MQTT: u16 = 0x0800;
const BIT_TIMING: u16 = 0x1000;
const BIT_ERRORS: u16 = 0x2000;

const KNOWN_BITS: u16 = BIT_RAW_MQTT
    | BIT_PARAM_MQTT
    | BIT_JSON_MQTT
    | BIT_INCLUDE_UNKNOWN
    | BIT_RAW_CONSOLE
    | BIT_PARAM_CONSOLE
    | BIT_JSON_CONSOLE
    | BIT_RAW_SERIAL
    | BIT_PARAM_SERIAL
    | BIT_JSON_SERIAL
    | BIT_RAWBIN_MQTT
    | BIT_TIMING
    | BIT_ERRORS;

/// Capability set selecting which {content-kind, transport} combinations
/// are active. Call sites use the named predicates; the raw bitmask only
/// surfaces at the command channel boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMode {
    bits: u16,
}

impl OutputMode {
    pub fn from_bits(bits: u16) -> Self {
        Self {
            bits: bits & KNOWN_BITS,
        }
    }

    pub fn bits(self) -> u16 {
        self.bits
    }

    pub fn enabled(self, kind: ContentKind, transport: Transport) -> bool {
        let bit = match (kind, transport) {
            (ContentKind::RawFrame, Transport::Mqtt) => BIT_RAW_MQTT,
            (ContentKind::RawFrame, Transport::Console) => BIT_RAW_CONSOLE,
            (ContentKind::RawFrame, Transport::Serial) => BIT_RAW_SERIAL,
            (ContentKind::Parameter, Transport::Mqtt) => BIT_PARAM_MQTT,
            (ContentKind::Parameter, Transport::Console) => BIT_PARAM_CONSOLE,
            (ContentKind::Parameter, Transport::Serial) => BIT_PARAM_SERIAL,
            (ContentKind::Json, Transport::Mqtt) => BIT_JSON_MQTT,
            (ContentKind::Json, Transport::Console) => BIT_JSON_CONSOLE,
            (ContentKind::Json, Transport::Serial) => BIT_JSON_SERIAL,
            (ContentKind::RawBin, Transport::Mqtt) => BIT_RAWBIN_MQTT,
            // Binary echo only exists on the messaging transport
            (ContentKind::RawBin, _) => return false,
        };
        self.bits & bit != 0
    }

    /// Any transport carries this content kind.
    pub fn any_transport(self, kind: ContentKind) -> bool {
        [Transport::Mqtt, Transport::Console, Transport::Serial]
            .into_iter()
            .any(|t| self.enabled(kind, t))
    }

    /// Admit parameters whose functionality is unknown. Easily overloads
    /// the broker; best combined with filter level 1 or higher.
    pub fn include_unknown(self) -> bool {
        self.bits & BIT_INCLUDE_UNKNOWN != 0
    }

    /// Emit timing metadata lines alongside the raw-frame echo.
    pub fn timing_enabled(self) -> bool {
        self.bits & BIT_TIMING != 0
    }

    /// Emit error metadata lines alongside the raw-frame echo.
    pub fn errors_enabled(self) -> bool {
        self.bits & BIT_ERRORS != 0
    }
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::from_bits(crate::config::DEFAULT_OUTPUT_MODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mask_capabilities() {
        // 0x3803: raw + param over mqtt, binary echo, timing and error lines
        let mode = OutputMode::default();
        assert!(mode.enabled(ContentKind::RawFrame, Transport::Mqtt));
        assert!(mode.enabled(ContentKind::Parameter, Transport::Mqtt));
        assert!(!mode.enabled(ContentKind::Json, Transport::Mqtt));
        assert!(mode.enabled(ContentKind::RawBin, Transport::Mqtt));
        assert!(mode.timing_enabled());
        assert!(mode.errors_enabled());
        assert!(!mode.include_unknown());
        assert!(!mode.enabled(ContentKind::RawFrame, Transport::Console));
    }

    #[test]
    fn test_bits_round_trip_masks_reserved() {
        let mode = OutputMode::from_bits(0xFFFF);
        // 0x0080 and 0x4000/0x8000 are reserved and never round-trip
        assert_eq!(mode.bits() & 0x0080, 0);
        assert_eq!(mode.bits(), KNOWN_BITS);
    }

    #[test]
    fn test_rawbin_is_mqtt_only() {
        let mode = OutputMode::from_bits(0xFFFF);
        assert!(mode.enabled(ContentKind::RawBin, Transport::Mqtt));
        assert!(!mode.enabled(ContentKind::RawBin, Transport::Console));
        assert!(!mode.enabled(ContentKind::RawBin, Transport::Serial));
    }
}
