use crate::config::BridgeConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FRAME_TERMINATOR: u8 = b'\n';
const MAX_PENDING_ERRORS: usize = 16;

/// One validated bus frame: the payload bytes between the marker and the
/// checksum trailer (the trailer itself is stripped after verification).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Uppercase hex rendering used by the readable echo channel.
    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(self.payload.len() * 2);
        for byte in &self.payload {
            out.push_str(&format!("{byte:02X}"));
        }
        out
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame does not start with the configured marker")]
    BadMarker,
    #[error("frame checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },
    #[error("frame too short to carry a checksum trailer")]
    Truncated,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FrameReaderStats {
    pub frames_ok: u32,
    pub framing_errors: u32,
    pub crc_errors: u32,
    pub oversize_drops: u32,
    pub buffer_high_water: u32,
}

/// Turns a continuous, error-prone byte stream into delimited candidate
/// frames. Partial input is buffered until a terminator arrives or the
/// buffer cap is reached, after which the partial data is dropped so memory
/// stays bounded.
#[derive(Debug)]
pub struct FrameReader {
    magic: Vec<u8>,
    crc_gen: u8,
    crc_feed: u8,
    max_buffer: usize,
    buffer: Vec<u8>,
    stats: FrameReaderStats,
    last_errors: heapless::Vec<FrameError, MAX_PENDING_ERRORS>,
}

impl FrameReader {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            magic: config.serial_magic.as_bytes().to_vec(),
            crc_gen: config.crc_gen,
            crc_feed: config.crc_feed,
            max_buffer: config.rx_buffer_size,
            buffer: Vec::new(),
            stats: FrameReaderStats::default(),
            last_errors: heapless::Vec::new(),
        }
    }

    /// Feed raw bytes; returns every complete, validated frame found.
    /// Records that fail marker or checksum validation are counted and
    /// surfaced via `take_errors` for the error-metadata channel.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in bytes {
            if byte == FRAME_TERMINATOR {
                let record = core::mem::take(&mut self.buffer);
                if let Some(frame) = self.accept_record(&record) {
                    frames.push(frame);
                }
                continue;
            }

            self.buffer.push(byte);
            if self.buffer.len() > self.max_buffer {
                // Unterminated garbage; drop it rather than grow without bound
                self.buffer.clear();
                self.stats.oversize_drops = self.stats.oversize_drops.saturating_add(1);
            }
            if self.buffer.len() as u32 > self.stats.buffer_high_water {
                self.stats.buffer_high_water = self.buffer.len() as u32;
            }
        }

        frames
    }

    fn accept_record(&mut self, record: &[u8]) -> Option<Frame> {
        // Tolerate CRLF terminators from serial bridges
        let record = match record.last() {
            Some(b'\r') => &record[..record.len() - 1],
            _ => record,
        };
        if record.is_empty() {
            return None;
        }

        match self.validate(record) {
            Ok(frame) => {
                self.stats.frames_ok = self.stats.frames_ok.saturating_add(1);
                Some(frame)
            }
            Err(error) => {
                match error {
                    FrameError::BadMarker => {
                        self.stats.framing_errors = self.stats.framing_errors.saturating_add(1);
                    }
                    FrameError::ChecksumMismatch { .. } | FrameError::Truncated => {
                        self.stats.crc_errors = self.stats.crc_errors.saturating_add(1);
                    }
                }
                // Ring is bounded; extras beyond the cap are dropped
                let _ = self.last_errors.push(error);
                None
            }
        }
    }

    fn validate(&self, record: &[u8]) -> Result<Frame, FrameError> {
        let body = record
            .strip_prefix(self.magic.as_slice())
            .ok_or(FrameError::BadMarker)?;

        if self.crc_gen == 0 {
            // Verification disabled: every well-delimited frame passes
            return Ok(Frame::new(body.to_vec()));
        }

        let (payload, trailer) = body.split_at(body.len().checked_sub(1).ok_or(FrameError::Truncated)?);
        let expected = crc8(self.crc_gen, self.crc_feed, payload);
        if trailer[0] != expected {
            return Err(FrameError::ChecksumMismatch {
                expected,
                actual: trailer[0],
            });
        }

        Ok(Frame::new(payload.to_vec()))
    }

    pub fn stats(&self) -> &FrameReaderStats {
        &self.stats
    }

    /// Drain the validation errors collected since the last call.
    pub fn take_errors(&mut self) -> Vec<FrameError> {
        core::mem::take(&mut self.last_errors).into_iter().collect()
    }

    /// Append the checksum trailer a writer-side peer would add. Used by
    /// tests and by the monitor tooling when injecting frames.
    pub fn seal(&self, payload: &[u8]) -> Vec<u8> {
        let mut record = self.magic.clone();
        record.extend_from_slice(payload);
        if self.crc_gen != 0 {
            record.push(crc8(self.crc_gen, self.crc_feed, payload));
        }
        record.push(FRAME_TERMINATOR);
        record
    }
}

/// Bitwise CRC-8 with configurable generator and feed, matching the bus
/// monitor firmware.
pub fn crc8(gen: u8, feed: u8, data: &[u8]) -> u8 {
    let mut crc = feed;
    for &byte in data {
        let mut c = byte;
        for _ in 0..8 {
            crc = if (crc ^ c) & 0x01 != 0 {
                (crc >> 1) ^ gen
            } else {
                crc >> 1
            };
            c >>= 1;
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader() -> FrameReader {
        FrameReader::new(&BridgeConfig::default())
    }

    #[test]
    fn test_crc8_is_deterministic_and_byte_sensitive() {
        let a = crc8(0xD9, 0x00, &[0x00, 0x00, 0x11, 0x2A]);
        let b = crc8(0xD9, 0x00, &[0x00, 0x00, 0x11, 0x2B]);
        assert_eq!(a, crc8(0xD9, 0x00, &[0x00, 0x00, 0x11, 0x2A]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_valid_frame_round_trip() {
        let mut reader = reader();
        let payload = [0x00u8, 0x00, 0x11, 0x15, 0x00];
        let record = reader.seal(&payload);

        let frames = reader.feed(&record);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), payload);
        assert_eq!(reader.stats().frames_ok, 1);
    }

    #[test]
    fn test_bad_marker_is_discarded_and_counted() {
        let mut reader = reader();
        let frames = reader.feed(b"2P2P\x00\x00\x11\x00\n");
        assert!(frames.is_empty());
        assert_eq!(reader.stats().framing_errors, 1);
        assert_eq!(reader.take_errors(), vec![FrameError::BadMarker]);
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let mut reader = reader();
        let mut record = reader.seal(&[0x00, 0x00, 0x11, 0x15, 0x00]);

        // Corrupt one payload byte past the marker
        record[5] ^= 0x01;
        let frames = reader.feed(&record);
        assert!(frames.is_empty());
        assert_eq!(reader.stats().crc_errors, 1);
    }

    #[test]
    fn test_partial_input_buffers_across_feeds() {
        let mut reader = reader();
        let record = reader.seal(&[0x40, 0x00, 0x10, 0x01]);
        let (head, tail) = record.split_at(3);

        assert!(reader.feed(head).is_empty());
        let frames = reader.feed(tail);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_oversize_partial_data_is_dropped() {
        let mut config = BridgeConfig::default();
        config.rx_buffer_size = 8;
        let mut reader = FrameReader::new(&config);

        let frames = reader.feed(&[0x41u8; 32]);
        assert!(frames.is_empty());
        assert!(reader.stats().oversize_drops >= 1);

        // Flush the trailing garbage, then the reader works again
        assert!(reader.feed(b"\n").is_empty());
        let record = reader.seal(&[0x00, 0x00]);
        assert_eq!(reader.feed(&record).len(), 1);
    }

    #[test]
    fn test_disabled_checksum_passes_all_delimited_frames() {
        let mut config = BridgeConfig::default();
        config.crc_gen = 0;
        let mut reader = FrameReader::new(&config);

        let frames = reader.feed(b"1P2P\x00\x00\x11\xFF\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0x00, 0x00, 0x11, 0xFF]);
    }
}
