// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Server configuration - single source of truth for ports and timers.
//!
//! Two levels:
//!
//! - compile-time constants for the protocol itself (device port, retry
//!   budgets, removal windows) - never hardcode these elsewhere;
//! - [`ServerConfig`] for per-deployment settings with defaults and
//!   `SPARROW_*` environment overrides.

use std::net::Ipv6Addr;
use std::time::Duration;

// =======================================================================
// Wire-protocol ports
// =======================================================================

/// UDP port every Sparrow device listens on for TLV requests.
pub const DEVICE_UDP_PORT: u16 = 49111;

/// Default UDP port this server binds for inbound device traffic
/// (events, beacons, sleepy-device check-ins).
pub const SERVER_UDP_PORT: u16 = 4444;

/// Default TCP port of the serial-radio forwarder.
pub const SERIAL_RADIO_PORT: u16 = 9999;

// =======================================================================
// Timers and retry budgets
// =======================================================================

/// Watchdog period written to grabbed devices, seconds.
pub const DEFAULT_WATCHDOG_SECS: u32 = 600;

/// Refresh the watchdog this many seconds before it expires.
pub const DEFAULT_GUARD_SECS: u32 = 300;

/// Period between periodic telemetry fetches, seconds.
pub const DEFAULT_FETCH_SECS: u64 = 60;

/// Discovery attempts before a device is left to liveness probing.
pub const DISCOVERY_RETRY_LIMIT: u32 = 5;

/// Consecutive watchdog-refresh failures before a device is dropped.
pub const WATCHDOG_RETRY_LIMIT: u32 = 20;

/// Retry interval after a missed watchdog refresh, seconds. The deadline
/// is always advanced by this much even when the send fails; the next
/// tick observes the failure.
pub const WATCHDOG_RETRY_SECS: u64 = 60;

/// Undiscovered devices unseen for this long are removed so they can be
/// picked up fresh later.
pub const OFFLINE_REMOVAL_SECS: u64 = 180;

/// Minimum silence before an undiscovered device gets a liveness probe.
pub const PING_INTERVAL_SECS: u64 = 60;

/// Linear backoff step for failed periodic fetches, seconds per attempt.
pub const FETCH_BACKOFF_STEP_SECS: u64 = 10;

/// Timeout for a single request/response exchange.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for the initial discovery batch (devices answer slowly while
/// joining the mesh).
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Resend attempts after the first timeout of an exchange.
pub const EXCHANGE_RETRIES: u32 = 1;

/// Default awake time requested by `wakeup` for sleepy devices, seconds.
pub const DEFAULT_WAKEUP_SECS: u32 = 30;

// =======================================================================
// Locations (announced in beacons / written at grab time)
// =======================================================================

/// Location id announced in the radio beacon. The open range is
/// 7000 - 7999.
pub const DEFAULT_LOCATION: u32 = 7000;

/// Location id written into devices when grabbing them.
pub const DEFAULT_GRAB_LOCATION: u32 = 0;

// =======================================================================
// Radio defaults
// =======================================================================

/// Default IEEE 802.15.4 channel.
pub const DEFAULT_RADIO_CHANNEL: u32 = 26;

/// Default PAN id.
pub const DEFAULT_RADIO_PANID: u32 = 0xabcd;

/// Per-deployment server settings.
///
/// Construct with [`ServerConfig::default`] and override fields, or use
/// [`ServerConfig::from_env`] to apply `SPARROW_*` environment variables
/// on top of the defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host of the border router used for bootstrap.
    pub router_host: String,
    /// Explicit server bind address; when unset the address is derived
    /// from the router's network prefix.
    pub server_host: Option<String>,
    /// Server address announced to devices (grab payload and beacon).
    pub udp_address: Ipv6Addr,
    /// Server UDP port for inbound device traffic.
    pub udp_port: u16,
    /// UDP port devices listen on.
    pub device_port: u16,
    /// Location id announced in the beacon.
    pub location: u32,
    /// Location id written when grabbing a device.
    pub grab_location: u32,
    /// Watchdog period written to devices, seconds.
    pub watchdog_secs: u32,
    /// Guard interval subtracted from the watchdog deadline, seconds.
    pub guard_secs: u32,
    /// Periodic fetch interval, seconds.
    pub fetch_secs: u64,
    /// Radio channel configured on the border router.
    pub radio_channel: u32,
    /// Radio PAN id configured on the border router.
    pub radio_panid: u32,
    /// Grab any device heard on the network (not only watchdog beacons).
    pub grab_all: bool,
    /// Address-suffix allow-list; `None` accepts every device.
    pub accept_nodes: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            router_host: "localhost".into(),
            server_host: None,
            udp_address: Ipv6Addr::new(0xaaaa, 0, 0, 0, 0, 0, 0, 1),
            udp_port: SERVER_UDP_PORT,
            device_port: DEVICE_UDP_PORT,
            location: DEFAULT_LOCATION,
            grab_location: DEFAULT_GRAB_LOCATION,
            watchdog_secs: DEFAULT_WATCHDOG_SECS,
            guard_secs: DEFAULT_GUARD_SECS,
            fetch_secs: DEFAULT_FETCH_SECS,
            radio_channel: DEFAULT_RADIO_CHANNEL,
            radio_panid: DEFAULT_RADIO_PANID,
            grab_all: false,
            accept_nodes: None,
        }
    }
}

impl ServerConfig {
    /// Defaults with `SPARROW_*` environment overrides applied:
    /// `SPARROW_ROUTER`, `SPARROW_BIND`, `SPARROW_PORT`, `SPARROW_CHANNEL`,
    /// `SPARROW_PANID`, `SPARROW_GRAB_ALL`, `SPARROW_ACCEPT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("SPARROW_ROUTER") {
            config.router_host = host;
        }
        if let Ok(bind) = std::env::var("SPARROW_BIND") {
            config.server_host = Some(bind);
        }
        if let Ok(port) = std::env::var("SPARROW_PORT") {
            if let Ok(port) = port.parse() {
                config.udp_port = port;
            }
        }
        if let Ok(channel) = std::env::var("SPARROW_CHANNEL") {
            if let Some(channel) = parse_value(&channel) {
                config.radio_channel = channel as u32;
            }
        }
        if let Ok(panid) = std::env::var("SPARROW_PANID") {
            if let Some(panid) = parse_value(&panid) {
                config.radio_panid = panid as u32;
            }
        }
        config.grab_all = std::env::var("SPARROW_GRAB_ALL")
            .map(|v| v == "1")
            .unwrap_or(config.grab_all);
        if let Ok(accept) = std::env::var("SPARROW_ACCEPT") {
            config.accept_nodes = Some(accept.split(',').map(str::to_string).collect());
        }
        config
    }

    /// Watchdog period as a duration.
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(u64::from(self.watchdog_secs))
    }

    /// Guard interval as a duration.
    pub fn guard(&self) -> Duration {
        Duration::from_secs(u64::from(self.guard_secs))
    }
}

/// Parse a numeric literal in any of the accepted bases:
/// `0x`/`#`/`$` hex, `0b` binary, `0o` or leading-zero octal, decimal.
pub fn parse_value(text: &str) -> Option<u64> {
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix('#'))
        .or_else(|| text.strip_prefix('$'))
    {
        return u64::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = text.strip_prefix("0b") {
        return u64::from_str_radix(bin, 2).ok();
    }
    if let Some(oct) = text.strip_prefix("0o") {
        return u64::from_str_radix(oct, 8).ok();
    }
    if text.len() > 1 && text.starts_with('0') {
        return u64::from_str_radix(&text[1..], 8).ok();
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.device_port, 49111);
        assert_eq!(config.udp_port, 4444);
        assert_eq!(config.watchdog_secs, 600);
        assert_eq!(config.guard_secs, 300);
        assert_eq!(config.radio_panid, 0xabcd);
        assert!(!config.grab_all);
        assert!(config.accept_nodes.is_none());
    }

    #[test]
    fn test_parse_value_bases() {
        assert_eq!(parse_value("26"), Some(26));
        assert_eq!(parse_value("0x1a"), Some(26));
        assert_eq!(parse_value("#abcd"), Some(0xabcd));
        assert_eq!(parse_value("$ff"), Some(255));
        assert_eq!(parse_value("0b1010"), Some(10));
        assert_eq!(parse_value("0o17"), Some(15));
        assert_eq!(parse_value("017"), Some(15));
        assert_eq!(parse_value("0"), Some(0));
        assert_eq!(parse_value("zz"), None);
    }
}
