//! # P1/P2 Bus Bridge
//!
//! Bridge engine between the two-wire P1/P2 heat-pump appliance bus and an
//! MQTT backend, with auxiliary monitoring over a line-oriented console
//! channel and a raw serial echo channel.
//!
//! ## Features
//!
//! - **Frame decoding**: marker-delimited frames with CRC-8 validation
//! - **Parameter extraction**: typed parameter updates with change/first-seen tracking
//! - **Output policy**: runtime-settable filter levels and channel bitmask
//! - **Throttled warm-up**: coverage ramp after restart to protect the broker
//! - **Connection supervision**: pause/continue while disconnected, restart on prolonged loss
//! - **Bounded memory**: fixed buffer caps, deterministic table admission
//!
//! ## Quick Start
//!
//! ```rust
//! use p1p2_bridge::{Bridge, BridgeConfig};
//!
//! let mut bridge = Bridge::new(BridgeConfig::default());
//! bridge.start(0);
//!
//! // Feed raw bus bytes; collect rendered outbound messages
//! let out = bridge.feed(b"1P2P\x00\x00\x10\x01\n", 10);
//! for message in &out.messages {
//!     println!("{:?} {} ({} bytes)", message.transport, message.topic, message.payload.len());
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`bridge`] - Run-cycle orchestrator and public API
//! - [`frame`] - Frame delimiting and checksum validation
//! - [`packet`] - Packet decoding and pseudo-packet synthesis
//! - [`params`] - Last-known-value parameter table
//! - [`filter`] - Output filter levels
//! - [`throttle`] - Warm-up coverage ramp
//! - [`output`] - Output mode capability set
//! - [`dispatch`] - Channel dispatcher and topic scheme
//! - [`supervisor`] - Messaging connection supervision
//! - [`command`] - Textual control command interpreter

pub mod bridge;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod filter;
pub mod frame;
pub mod output;
pub mod packet;
pub mod params;
pub mod supervisor;
pub mod throttle;

// Re-export main public types for convenience
pub use bridge::{Bridge, BridgeOutput};
pub use config::BridgeConfig;
pub use dispatch::OutboundMessage;
pub use filter::FilterLevel;
pub use output::{OutputMode, Transport};
pub use params::{ParamCategory, ParamValue, ParameterKey};
pub use supervisor::RestartSignal;
