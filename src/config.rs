use crate::filter::FilterLevel;
use crate::output::OutputMode;
use serde::{Deserialize, Serialize};

// Defaults matching the reference bridge hardware deployment
pub const DEFAULT_SERIAL_MAGIC: &str = "1P2P";
pub const DEFAULT_CRC_GEN: u8 = 0xD9;
pub const DEFAULT_CRC_FEED: u8 = 0x00;
pub const DEFAULT_RX_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_TOPIC_ROOT: &str = "P1P2";
pub const DEFAULT_DEVICE_ID: &str = "000";
pub const DEFAULT_THROTTLE_STEPS: u8 = 5;
pub const DEFAULT_THROTTLE_STEP_SECS: u32 = 4;
pub const DEFAULT_OUTPUT_MODE: u16 = 0x3803;
pub const DEFAULT_MIN_FREE_MEMORY: usize = 6000;
pub const DEFAULT_DISCONNECT_RESTART_SECS: u64 = 150;
pub const DEFAULT_PSEUDO_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_TRACKED_PARAMS: usize = 1024;

pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Immutable bridge configuration, assembled once at startup and passed by
/// reference into every component. The reference system resolved all of these
/// at build time; here they form a single record so tests can vary them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Frame marker; records not starting with it are discarded.
    pub serial_magic: String,
    /// CRC-8 generator polynomial. Zero disables checksum verification.
    pub crc_gen: u8,
    /// CRC-8 feed (seed) value.
    pub crc_feed: u8,
    /// Maximum bytes buffered while waiting for a frame terminator.
    pub rx_buffer_size: usize,

    /// Root of every topic this bridge produces or consumes.
    pub topic_root: String,
    /// Device-identifying topic suffix (reference hardware used the last
    /// octet of its IP address).
    pub device_id: String,

    /// Number of coverage steps in the warm-up throttle ramp.
    pub throttle_steps: u8,
    /// Duration of one throttle step in seconds.
    pub throttle_step_secs: u32,

    /// Initial output filter level; settable at runtime via the `S` command.
    pub output_filter: FilterLevel,
    /// Initial output mode; settable at runtime via the `J` command.
    pub output_mode: OutputMode,

    /// Messaging sends are skipped while free memory is below this watermark.
    pub min_free_memory: usize,
    /// When false, packet output pauses while the messaging transport is
    /// disconnected so changes are recovered on reconnect instead of lost.
    pub disconnect_continue: bool,
    /// Restart the process if a messaging disconnect lasts longer than this.
    pub disconnect_restart_secs: u64,

    /// QoS hint for the messaging transport (QoS 1 proved too slow on the
    /// reference hardware).
    pub mqtt_qos: u8,
    /// Retain flag hint for the messaging transport.
    pub mqtt_retain: bool,

    /// Cadence of synthesized bridge-telemetry pseudo-packets.
    pub pseudo_interval_secs: u64,
    /// Hard cap on parameter table cardinality once unknown-functionality
    /// keys are admitted.
    pub max_tracked_params: usize,
    /// When false, only a reduced discoverable parameter subset is published.
    /// The exact membership is supplied by the caller, not guessed here.
    pub publish_all: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_magic: DEFAULT_SERIAL_MAGIC.to_string(),
            crc_gen: DEFAULT_CRC_GEN,
            crc_feed: DEFAULT_CRC_FEED,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            topic_root: DEFAULT_TOPIC_ROOT.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            throttle_steps: DEFAULT_THROTTLE_STEPS,
            throttle_step_secs: DEFAULT_THROTTLE_STEP_SECS,
            output_filter: FilterLevel::Changed,
            output_mode: OutputMode::from_bits(DEFAULT_OUTPUT_MODE),
            min_free_memory: DEFAULT_MIN_FREE_MEMORY,
            disconnect_continue: false,
            disconnect_restart_secs: DEFAULT_DISCONNECT_RESTART_SECS,
            mqtt_qos: 0,
            mqtt_retain: true,
            pseudo_interval_secs: DEFAULT_PSEUDO_INTERVAL_SECS,
            max_tracked_params: DEFAULT_MAX_TRACKED_PARAMS,
            publish_all: true,
        }
    }
}

impl BridgeConfig {
    /// Topic carrying readable hex frame echoes (plus timing/error lines).
    pub fn topic_hexdata(&self) -> String {
        format!("{}/R/{}", self.topic_root, self.device_id)
    }

    /// Topic carrying unmodified binary frame payloads.
    pub fn topic_bindata(&self) -> String {
        format!("{}/X/{}", self.topic_root, self.device_id)
    }

    /// Topic carrying informational and error text.
    pub fn topic_signal(&self) -> String {
        format!("{}/S/{}", self.topic_root, self.device_id)
    }

    /// Topic carrying the aggregated JSON document.
    pub fn topic_json(&self) -> String {
        format!("{}/J/{}", self.topic_root, self.device_id)
    }

    /// Inbound command topic scoped to this device.
    pub fn topic_commands(&self) -> String {
        format!("{}/W/{}", self.topic_root, self.device_id)
    }

    /// Inbound command topic shared by all bridges on the broker.
    pub fn topic_commands_any(&self) -> String {
        format!("{}/W", self.topic_root)
    }

    /// Per-parameter topic prefix; the full topic appends category code,
    /// source index and parameter index at fixed positions.
    pub fn param_topic_prefix(&self) -> String {
        format!("{}/P/{}", self.topic_root, self.device_id)
    }

    pub fn throttle_step_ms(&self) -> u64 {
        u64::from(self.throttle_step_secs) * 1000
    }

    pub fn disconnect_restart_ms(&self) -> u64 {
        self.disconnect_restart_secs * 1000
    }

    pub fn pseudo_interval_ms(&self) -> u64 {
        self.pseudo_interval_secs * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topics_are_deterministic() {
        let config = BridgeConfig::default();
        assert_eq!(config.topic_hexdata(), "P1P2/R/000");
        assert_eq!(config.topic_bindata(), "P1P2/X/000");
        assert_eq!(config.topic_signal(), "P1P2/S/000");
        assert_eq!(config.topic_json(), "P1P2/J/000");
        assert_eq!(config.topic_commands(), "P1P2/W/000");
        assert_eq!(config.topic_commands_any(), "P1P2/W");
    }

    #[test]
    fn test_default_policy_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.crc_gen, 0xD9);
        assert_eq!(config.output_mode.bits(), 0x3803);
        assert_eq!(config.output_filter, FilterLevel::Changed);
        assert!(!config.disconnect_continue);
        assert_eq!(config.disconnect_restart_ms(), 150_000);
    }
}
