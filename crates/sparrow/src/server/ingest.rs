// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! UDP ingestion.
//!
//! One receive loop per bound socket (a v6 and a v4 endpoint are serviced
//! concurrently) feeds every datagram through the same path: decode the
//! encapsulation, route TLVs to the owning device, or treat the sender as
//! an unmanaged beacon and decide - acceptance policy permitting -
//! whether to grab it. Malformed frames are logged and dropped; the loop
//! itself never dies on bad input.

use super::DeviceServer;
use crate::error::{Error, Result};
use crate::protocol::{
    tlv, EncapHeader, ENC_PAYLOAD_TLV, INSTANCE_BORDER_ROUTER, VARIABLE_OBJECT_TYPE,
    VARIABLE_UNIT_BOOT_TIMER, VARIABLE_UNIT_CONTROLLER_WATCHDOG,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

impl DeviceServer {
    /// Bind the dual-stack UDP endpoints. A failure here is fatal and
    /// aborts startup.
    pub fn bind_sockets(&self) -> Result<()> {
        let mut sockets = self.sockets.lock();
        if !sockets.is_empty() {
            return Ok(());
        }
        let port = self.config.udp_port;
        let v6: SocketAddr = (std::net::Ipv6Addr::UNSPECIFIED, port).into();
        let v4: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();
        sockets.push(Arc::new(bind_udp(v6)?));
        sockets.push(Arc::new(bind_udp(v4)?));
        for socket in sockets.iter() {
            if let Ok(addr) = socket.local_addr() {
                log::info!("[server] listening on {addr}");
            }
        }
        Ok(())
    }

    /// Local addresses of the bound sockets.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets
            .lock()
            .iter()
            .filter_map(|socket| socket.local_addr().ok())
            .collect()
    }

    pub(crate) fn ingest_loop(self: &Arc<Self>, socket: &UdpSocket) {
        let mut buf = [0u8; 1024];
        while !self.is_stopped() {
            match socket.recv_from(&mut buf) {
                Ok((len, source)) => {
                    let host = source.ip().to_string();
                    log::debug!("[server] {len} byte(s) from {host}");
                    self.handle_datagram(&buf[..len], &host);
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => {
                    if self.is_stopped() {
                        break;
                    }
                    log::warn!("[server] receive error: {err}");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
        log::debug!("[server] ingest loop stopped");
    }

    /// Process one inbound datagram from `host`.
    pub fn handle_datagram(self: &Arc<Self>, data: &[u8], host: &str) {
        let (header, offset) = match EncapHeader::decode(data) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::info!("[server] dropping datagram from {host}: {err}");
                return;
            }
        };
        if header.error != 0 {
            log::info!(
                "[server] datagram from {host} carries encap error {}",
                header.error
            );
            return;
        }
        if header.payload_type != ENC_PAYLOAD_TLV {
            log::debug!(
                "[server] ignoring payload type {} from {host}",
                header.payload_type
            );
            return;
        }
        let tlvs = match tlv::decode_sequence(&data[offset..]) {
            Ok(tlvs) => tlvs,
            Err(err) => {
                log::info!("[server] dropping datagram from {host}: {err}");
                return;
            }
        };

        // Instance-0 fields the registry itself reacts to.
        let mut device_type = 0u64;
        let mut boot_timer_seen = false;
        let mut watchdog_beacon = false;
        for t in &tlvs {
            if t.error != 0 || t.instance != 0 {
                continue;
            }
            match t.variable {
                VARIABLE_OBJECT_TYPE => {
                    device_type = t.int_value().unwrap_or(0) as u64;
                }
                VARIABLE_UNIT_BOOT_TIMER => boot_timer_seen = true,
                VARIABLE_UNIT_CONTROLLER_WATCHDOG => watchdog_beacon = true,
                _ => {}
            }
        }

        match self.get_device(host) {
            Some(device) => {
                device.process_response(&tlvs);
                if device.is_discovered() {
                    if boot_timer_seen && device.pending_count() == 0 {
                        // A check-in with a boot timer gets a liveness
                        // read back.
                        device.send(vec![tlv::get64(0, VARIABLE_UNIT_BOOT_TIMER)], None);
                    }
                    device.flush();
                } else {
                    self.discover_device(&device);
                }
            }
            None => self.consider_unmanaged(host, device_type, watchdog_beacon),
        }
    }

    /// Decide whether to take over an unmanaged sender. Watchdog beacons
    /// announce a device that lost (or never had) an owner; with
    /// `grab_all` any acceptable sender is taken. The border router's own
    /// product type is never grabbed.
    fn consider_unmanaged(self: &Arc<Self>, host: &str, device_type: u64, watchdog_beacon: bool) {
        if device_type == INSTANCE_BORDER_ROUTER {
            return;
        }
        let acceptable = self.is_device_acceptable(host, device_type);
        if watchdog_beacon {
            if !acceptable {
                log::info!(
                    "[server] ignoring node {host} of type 0x{device_type:016x} that could be taken over"
                );
                return;
            }
            log::info!(
                "[server] found node {host} of type 0x{device_type:016x} with expired watchdog"
            );
            if self.grab_device(host) {
                let device = self.add_device(host);
                device.state.lock().next_update = Some(
                    self.clock.now() + self.config.watchdog().saturating_sub(self.config.guard()),
                );
            }
        } else if self.config.grab_all && acceptable {
            if self.grab_device(host) {
                let device = self.add_device(host);
                device.state.lock().next_update = Some(
                    self.clock.now() + self.config.watchdog().saturating_sub(self.config.guard()),
                );
                self.discover_device(&device);
            }
        }
    }
}

fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|err| Error::BindFailed(format!("{addr}: {err}")))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket
        .bind(&addr.into())
        .map_err(|err| Error::BindFailed(format!("{addr}: {err}")))?;
    let socket: UdpSocket = socket.into();
    // Short timeout so the loop observes the stop flag promptly.
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}
