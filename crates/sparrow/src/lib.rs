// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Sparrow device management core.
//!
//! This crate implements the Sparrow application layer (encapsulation
//! header + TLV records over UDP, SLIP-framed serial frames for the radio
//! dongle) and the device-management engine built on top of it:
//!
//! - [`protocol`] - wire codec: encapsulation header, TLVs, SLIP framing
//! - [`nstats`] - network-statistics blob decoder (RPL routing status)
//! - [`transport`] - addressable send targets and the serial-radio link
//! - [`device`] - per-node state machine with sleepy-device batching
//! - [`server`] - device registry: discovery, grab/watchdog ownership,
//!   periodic fetch, dual-stack UDP ingestion
//! - [`events`] - device event fan-out to registered listeners
//!
//! The server runs three kinds of activities concurrently: a one-second
//! management tick, one receive loop per bound UDP socket, and
//! fire-and-forget liveness probes. All of them share the device map;
//! per-device state is owned by a single mutex per device.

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod nstats;
pub mod probe;
pub mod protocol;
pub mod server;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use config::ServerConfig;
pub use device::{Device, InstanceInfo, ResponseCallback, SendTarget};
pub use error::{Error, Result};
pub use events::{DeviceEvent, EventBus, EventKind, EventPayload, ListenerId};
pub use probe::{LivenessProbe, PingProbe};
pub use protocol::tlv::Tlv;
pub use server::DeviceServer;
