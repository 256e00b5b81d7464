use crate::command::{self, CommandAction};
use crate::config::{BridgeConfig, BRIDGE_VERSION};
use crate::dispatch::{ChannelDispatcher, DeliveryGate, OutboundMessage};
use crate::filter::OutputFilter;
use crate::frame::FrameReader;
use crate::output::{ContentKind, OutputMode, Transport};
use crate::packet::{PacketDecoder, PacketSource, PseudoGenerator, PseudoSnapshot};
use crate::params::{ParamCategory, ParamUpdate, ParameterKey, ParameterTable};
use crate::supervisor::{ConnectionSupervisor, RestartSignal};
use crate::throttle::ThrottleController;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Everything one engine call produced: rendered outbound payloads plus an
/// optional restart request the daemon must honor.
#[derive(Debug, Default)]
pub struct BridgeOutput {
    pub messages: Vec<OutboundMessage>,
    pub restart: Option<RestartSignal>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BridgeStats {
    pub updates_emitted: u32,
    pub suppressed_by_filter: u32,
    pub suppressed_by_throttle: u32,
    pub decode_skips: u32,
    pub pending_replays: u32,
}

/// The run-cycle orchestrator. Owns every pipeline stage exclusively; the
/// single-owner discipline means no locking anywhere in the engine. Time is
/// passed in as milliseconds so every behavior is reproducible in tests.
///
/// Data flow per cycle: bytes -> frames -> packets -> parameter updates ->
/// filter -> throttle -> channel dispatch, with pseudo-packets and the
/// connection supervisor serviced from `tick`.
pub struct Bridge {
    config: BridgeConfig,
    reader: FrameReader,
    decoder: PacketDecoder,
    table: ParameterTable,
    filter: OutputFilter,
    mode: OutputMode,
    throttle: ThrottleController,
    dispatcher: ChannelDispatcher,
    supervisor: ConnectionSupervisor,
    pseudo: PseudoGenerator,

    start_ms: u64,
    free_memory: Option<usize>,
    last_loop_us: u32,

    /// Keys whose reportable update could not reach the messaging transport
    /// yet (throttle ramp or withheld delivery). Replayed from stored state
    /// once eligible, so a promised state change is never silently lost.
    pending: BTreeSet<ParameterKey>,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let reader = FrameReader::new(&config);
        let dispatcher = ChannelDispatcher::new(&config);
        let throttle = ThrottleController::new(config.throttle_steps, config.throttle_step_ms());
        let supervisor = ConnectionSupervisor::new(config.disconnect_restart_ms());
        let pseudo = PseudoGenerator::new(config.pseudo_interval_ms());
        let table = ParameterTable::new(config.max_tracked_params);
        let filter = OutputFilter::new(config.output_filter);
        let mode = config.output_mode;

        Self {
            config,
            reader,
            decoder: PacketDecoder::new(),
            table,
            filter,
            mode,
            throttle,
            dispatcher,
            supervisor,
            pseudo,
            start_ms: 0,
            free_memory: None,
            last_loop_us: 0,
            pending: BTreeSet::new(),
            stats: BridgeStats::default(),
        }
    }

    /// Arm the throttle ramp and the uptime clock.
    pub fn start(&mut self, now_ms: u64) {
        self.start_ms = now_ms;
        self.throttle.start(now_ms);
    }

    /// Feed raw bus bytes. Validated frames flow through the full pipeline
    /// in validation order.
    pub fn feed(&mut self, bytes: &[u8], now_ms: u64) -> BridgeOutput {
        let mut output = BridgeOutput::default();

        let frames = self.reader.feed(bytes);
        for frame in frames {
            self.process_packet(&PacketSource::Bus(frame), now_ms, &mut output.messages);
        }

        let gate = self.gate();
        for error in self.reader.take_errors() {
            output
                .messages
                .extend(self.dispatcher.dispatch_error(self.mode, &gate, &error.to_string()));
        }

        output
    }

    /// Service periodic work: pseudo-packet cadence, throttle-ramp and
    /// reconnect replays, and the connection supervisor.
    pub fn tick(&mut self, now_ms: u64) -> BridgeOutput {
        let mut output = BridgeOutput::default();

        if self.pseudo.poll(now_ms) {
            let snapshot = self.snapshot(now_ms);
            self.process_packet(&PacketSource::Pseudo(snapshot), now_ms, &mut output.messages);

            let gate = self.gate();
            output.messages.extend(self.dispatcher.dispatch_timing(
                self.mode,
                &gate,
                &format!("cycle {} us", self.last_loop_us),
            ));
        }

        output.messages.extend(self.replay_pending(now_ms));
        output.restart = self.supervisor.poll(now_ms);
        output
    }

    /// Interpret one textual control command from the command topic or the
    /// console. Setting changes take effect at the next evaluation.
    pub fn handle_command(&mut self, line: &str, now_ms: u64) -> BridgeOutput {
        let mut output = BridgeOutput::default();
        let gate = self.gate();

        let info = match command::parse(line) {
            Ok(CommandAction::SetFilter(level)) => {
                self.filter.set_level(level);
                format!("output filter set to {}", level.as_u8())
            }
            Ok(CommandAction::ReportFilter) => {
                format!("output filter {}", self.filter.level().as_u8())
            }
            Ok(CommandAction::SetMode(mode)) => {
                self.mode = mode;
                format!("output mode set to 0x{:04X}", mode.bits())
            }
            Ok(CommandAction::ReportMode) => format!("output mode 0x{:04X}", self.mode.bits()),
            Ok(CommandAction::ReportVersion) => format!(
                "p1p2-bridge v{} uptime {}s",
                BRIDGE_VERSION,
                self.uptime_secs(now_ms)
            ),
            Ok(CommandAction::RequestRestart) => {
                output.restart = Some(RestartSignal::Requested);
                "restart requested".to_string()
            }
            Err(error) => format!("command rejected: {error}"),
        };

        output.messages.extend(self.dispatcher.dispatch_info(&gate, &info));
        output
    }

    /// Transport layer reports a live messaging connection. Updates held
    /// back while disconnected replay from stored state.
    pub fn transport_connected(&mut self, now_ms: u64) -> BridgeOutput {
        self.supervisor.on_connected();
        BridgeOutput {
            messages: self.replay_pending(now_ms),
            restart: None,
        }
    }

    /// Transport layer reports the messaging connection lost.
    pub fn transport_disconnected(&mut self, now_ms: u64) {
        self.supervisor.on_disconnected(now_ms);
    }

    /// Report current free memory; messaging sends are skipped while it sits
    /// below the configured watermark.
    pub fn report_free_memory(&mut self, bytes: Option<usize>) {
        self.free_memory = bytes;
    }

    /// Record the measured duration of the previous run-loop cycle, surfaced
    /// through timing metadata and pseudo-packets.
    pub fn note_loop_time_us(&mut self, micros: u32) {
        self.last_loop_us = micros;
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn dispatcher_mut(&mut self) -> &mut ChannelDispatcher {
        &mut self.dispatcher
    }

    fn process_packet(
        &mut self,
        source: &PacketSource,
        now_ms: u64,
        messages: &mut Vec<OutboundMessage>,
    ) {
        let decoded = self.decoder.decode(source);
        self.stats.decode_skips = self.stats.decode_skips.saturating_add(decoded.skipped);

        let gate = self.gate();
        messages.extend(self.dispatcher.dispatch_frame(self.mode, &gate, &decoded.raw));

        let mqtt_params_enabled = self.mode.enabled(ContentKind::Parameter, Transport::Mqtt)
            || self.mode.enabled(ContentKind::Json, Transport::Mqtt);

        let mut admitted: Vec<ParamUpdate> = Vec::new();
        for (key, value) in decoded.updates {
            if key.category == ParamCategory::Unknown && !self.mode.include_unknown() {
                continue;
            }
            let Some(status) = self.table.update(key, value) else {
                // Deterministically rejected at the unknown-key cap
                continue;
            };
            let update = ParamUpdate {
                key,
                value,
                changed: status.changed,
                first: status.first,
            };

            if !self.filter.admit(&update) {
                self.stats.suppressed_by_filter = self.stats.suppressed_by_filter.saturating_add(1);
                continue;
            }
            if !self.throttle.admit(&key, now_ms) {
                self.stats.suppressed_by_throttle =
                    self.stats.suppressed_by_throttle.saturating_add(1);
                self.pending.insert(key);
                continue;
            }
            if mqtt_params_enabled && !gate.mqtt_allowed() {
                // Reportable but undeliverable; remember it for replay
                self.pending.insert(key);
            } else {
                self.pending.remove(&key);
            }

            admitted.push(update);
        }

        self.stats.updates_emitted = self
            .stats
            .updates_emitted
            .saturating_add(admitted.len() as u32);
        messages.extend(self.dispatcher.dispatch_updates(self.mode, &gate, &admitted));
    }

    /// Emit stored values for pending keys that became eligible, preserving
    /// eventual full visibility after the throttle ramp or a reconnect.
    fn replay_pending(&mut self, now_ms: u64) -> Vec<OutboundMessage> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let gate = self.gate();
        if !gate.mqtt_allowed() {
            return Vec::new();
        }

        let eligible: Vec<ParameterKey> = self
            .pending
            .iter()
            .filter(|key| self.throttle.admit(key, now_ms))
            .copied()
            .collect();

        let mut replays: Vec<ParamUpdate> = Vec::new();
        for key in eligible {
            self.pending.remove(&key);
            if let Some(value) = self.table.get(&key) {
                replays.push(ParamUpdate {
                    key,
                    value: *value,
                    changed: true,
                    first: false,
                });
            }
        }

        if replays.is_empty() {
            return Vec::new();
        }
        self.stats.pending_replays = self
            .stats
            .pending_replays
            .saturating_add(replays.len() as u32);
        self.dispatcher.dispatch_updates(self.mode, &gate, &replays)
    }

    fn gate(&self) -> DeliveryGate {
        DeliveryGate {
            connected: self.supervisor.is_connected(),
            disconnect_continue: self.config.disconnect_continue,
            low_memory: self
                .free_memory
                .is_some_and(|free| free < self.config.min_free_memory),
        }
    }

    fn snapshot(&self, now_ms: u64) -> PseudoSnapshot {
        let reader_stats = self.reader.stats();
        PseudoSnapshot {
            uptime_secs: self.uptime_secs(now_ms),
            frames_ok: reader_stats.frames_ok,
            framing_errors: reader_stats.framing_errors,
            crc_errors: reader_stats.crc_errors,
            oversize_drops: reader_stats.oversize_drops,
            buffer_high_water: reader_stats.buffer_high_water,
            loop_time_us: self.last_loop_us,
        }
    }

    fn uptime_secs(&self, now_ms: u64) -> u32 {
        (now_ms.saturating_sub(self.start_ms) / 1000) as u32
    }
}
