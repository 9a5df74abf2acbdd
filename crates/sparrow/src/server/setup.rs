// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Border-router bootstrap.
//!
//! Before the server can manage anything it discovers the border router,
//! locates its radio / router / management / statistics instances, reads
//! the mesh network address to derive the prefix and the server's own
//! announced address, binds the UDP endpoints and installs the beacon
//! response that points joining nodes at this server.

use super::{discover_endpoint, DeviceServer};
use crate::config::{EXCHANGE_RETRIES, EXCHANGE_TIMEOUT};
use crate::error::{Error, Result};
use crate::protocol::{
    tlv, INSTANCE_BORDER_ROUTER, INSTANCE_BORDER_ROUTER_MANAGEMENT, INSTANCE_NETWORK_STATISTICS,
    INSTANCE_RADIO, INSTANCE_ROUTER, SIZE32, VARIABLE_NETWORK_ADDRESS, VARIABLE_RADIO_BEACON_RESPONSE,
    VARIABLE_RADIO_CHANNEL, VARIABLE_RADIO_PAN_ID,
};
use crate::transport::{exchange_tlvs, Endpoint};
use std::net::Ipv6Addr;
use std::process::Command;
use std::sync::Arc;

impl DeviceServer {
    /// Full bootstrap: router discovery, socket bind, beacon install.
    /// Any failure here aborts startup.
    pub fn setup(self: &Arc<Self>) -> Result<()> {
        self.bootstrap_router()?;
        self.bind_sockets()?;
        self.install_beacon()?;
        Ok(())
    }

    /// Discover the border router and learn the mesh addressing.
    pub fn bootstrap_router(&self) -> Result<()> {
        let router = self.router_endpoint();
        let info = discover_endpoint(&router)?;
        log::info!("[server] router product label \"{}\"", info.label);
        if info.product_type != INSTANCE_BORDER_ROUTER {
            return Err(Error::UnexpectedProduct {
                product_type: info.product_type,
            });
        }

        let mut radio_instance = None;
        let mut router_instance = None;
        let mut brm_instance = None;
        let mut nstats_instance = None;
        for instance in &info.instances {
            log::info!(
                "[server] instance {}: type 0x{:016x} \"{}\"",
                instance.index,
                instance.instance_type,
                instance.label
            );
            match instance.instance_type {
                INSTANCE_RADIO => radio_instance = Some(instance.index),
                INSTANCE_ROUTER => router_instance = Some(instance.index),
                INSTANCE_BORDER_ROUTER_MANAGEMENT => brm_instance = Some(instance.index),
                INSTANCE_NETWORK_STATISTICS => nstats_instance = Some(instance.index),
                _ => {}
            }
        }
        if radio_instance.is_none() {
            return Err(Error::UnexpectedResponse(
                "border router has no radio instance".into(),
            ));
        }

        let mut mesh = None;
        if let Some(router_instance) = router_instance {
            let tlvs = exchange_tlvs(
                &router,
                &[tlv::get128(router_instance, VARIABLE_NETWORK_ADDRESS)],
                EXCHANGE_TIMEOUT,
                EXCHANGE_RETRIES,
            )?;
            let address = tlvs
                .first()
                .filter(|t| t.error == 0 && t.data.len() >= 16)
                .ok_or_else(|| Error::UnexpectedResponse("router network address".into()))?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&address.data[..16]);
            let router_address = Ipv6Addr::from(octets);
            let segments = router_address.segments();
            let prefix =
                Ipv6Addr::new(segments[0], segments[1], segments[2], segments[3], 0, 0, 0, 0);
            log::info!("[server] router address {router_address}, network prefix {prefix}");

            let udp_address = match &self.config.server_host {
                Some(host) => host
                    .parse()
                    .map_err(|_| Error::InvalidAddress(host.clone()))?,
                None => lookup_server_address(prefix).unwrap_or(Ipv6Addr::new(
                    segments[0],
                    segments[1],
                    segments[2],
                    segments[3],
                    0,
                    0,
                    0,
                    1,
                )),
            };
            log::info!("[server] announcing server address {udp_address}");
            mesh = Some((router_address, prefix, udp_address));
        }

        let mut net = self.net.lock();
        net.radio_instance = radio_instance;
        net.router_instance = router_instance;
        net.brm_instance = brm_instance;
        net.nstats_instance = nstats_instance;
        if let Some((router_address, prefix, udp_address)) = mesh {
            net.router_address = Some(router_address);
            net.router_prefix = Some(prefix);
            net.udp_address = udp_address;
        }
        Ok(())
    }

    /// Install the beacon response pointing joining nodes at this server.
    pub fn install_beacon(&self) -> Result<()> {
        let (radio_instance, payload) = {
            let net = self.net.lock();
            let radio_instance = net
                .radio_instance
                .ok_or_else(|| Error::Config("radio instance not discovered".into()))?;
            (
                radio_instance,
                beacon_payload(net.udp_address, self.config.udp_port, self.config.location),
            )
        };
        log::info!(
            "[server] setting beacon ({} bytes) in instance {}",
            payload.len(),
            radio_instance
        );
        let beacon = tlv::set_vector(
            radio_instance,
            VARIABLE_RADIO_BEACON_RESPONSE,
            SIZE32,
            0,
            (payload.len() / 4) as u32,
            payload,
        );
        exchange_tlvs(
            &self.router_endpoint(),
            &[beacon],
            EXCHANGE_TIMEOUT,
            EXCHANGE_RETRIES,
        )?;
        Ok(())
    }

    /// Configure the radio channel and PAN id on the border router.
    pub fn set_channel_panid(&self) -> Result<()> {
        let radio_instance = self
            .net
            .lock()
            .radio_instance
            .ok_or_else(|| Error::Config("radio instance not discovered".into()))?;
        log::info!(
            "[server] setting channel {} and PAN id 0x{:04x}",
            self.config.radio_channel,
            self.config.radio_panid
        );
        let tlvs = [
            tlv::set32(radio_instance, VARIABLE_RADIO_CHANNEL, self.config.radio_channel),
            tlv::set32(radio_instance, VARIABLE_RADIO_PAN_ID, self.config.radio_panid),
        ];
        exchange_tlvs(
            &self.router_endpoint(),
            &tlvs,
            EXCHANGE_TIMEOUT,
            EXCHANGE_RETRIES,
        )?;
        Ok(())
    }

    fn router_endpoint(&self) -> Endpoint {
        Endpoint::new(&self.config.router_host, self.config.device_port)
    }
}

/// The beacon-response payload: a fixed preamble, the location id, the
/// server endpoint record (16-byte address + port) and trailing padding.
fn beacon_payload(address: Ipv6Addr, port: u16, location: u32) -> Vec<u8> {
    let mut payload = vec![0xfe, 0x02, 0x01, 0x0a, 0x02, 0x00, 0x90, 0xda, 0x01];
    payload.extend_from_slice(&location.to_be_bytes());
    payload.extend_from_slice(&[0x18, 0x02, 0x00, 0x90, 0xda, 0x03]);
    payload.extend_from_slice(&address.octets());
    payload.extend_from_slice(&port.to_be_bytes());
    payload.extend_from_slice(&[0, 0, 0]);
    payload
}

/// Pick the local IPv6 address to announce: an `ip -6 addr` entry inside
/// the mesh prefix when one exists, otherwise any global address, with
/// `None` telling the caller to fall back to the prefix's `::1`.
fn lookup_server_address(prefix: Ipv6Addr) -> Option<Ipv6Addr> {
    let output = Command::new("ip").args(["-6", "addr"]).output().ok()?;
    pick_server_address(&String::from_utf8_lossy(&output.stdout), prefix)
}

fn pick_server_address(text: &str, prefix: Ipv6Addr) -> Option<Ipv6Addr> {
    let mut fallback = None;
    for token in text.split_whitespace() {
        let candidate = token.split('/').next().unwrap_or(token);
        let Ok(address) = candidate.parse::<Ipv6Addr>() else {
            continue;
        };
        if address.is_loopback() || (address.segments()[0] & 0xffc0) == 0xfe80 {
            continue;
        }
        if address.segments()[..4] == prefix.segments()[..4] {
            return Some(address);
        }
        if fallback.is_none() {
            fallback = Some(address);
        }
    }
    fallback
}
