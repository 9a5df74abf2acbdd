// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Addressable send targets.
//!
//! [`Endpoint`] is where encoded packets go: a host (IPv4 or IPv6) and a
//! UDP port. Request/response traffic uses a short-lived socket per
//! exchange so concurrent activities never fight over one socket's
//! receive queue; the server's long-lived ingestion sockets live in
//! [`crate::server`]. The serial-radio link is in [`serial`].

pub mod serial;

use crate::config::{EXCHANGE_RETRIES, EXCHANGE_TIMEOUT};
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// A transport destination: host plus UDP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Hosts with a colon are IPv6; everything else resolves as IPv4.
    pub fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| Error::InvalidAddress(self.host.clone()))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(self.host.clone()))
    }

    /// Send `payload` and wait for one response datagram.
    ///
    /// Opens a socket of the matching address family, sends, and waits up
    /// to `timeout`. The send is repeated `retries` more times on
    /// timeout before giving up with [`Error::Timeout`].
    pub fn exchange(
        &self,
        payload: &[u8],
        timeout: Duration,
        retries: u32,
    ) -> Result<(Vec<u8>, SocketAddr)> {
        let target = self.resolve()?;
        let domain = if target.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        let bind_addr: SocketAddr = if target.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        socket.bind(&bind_addr.into())?;
        socket.set_read_timeout(Some(timeout))?;
        let socket: UdpSocket = socket.into();

        let mut buf = [0u8; 1024];
        for attempt in 0..=retries {
            socket.send_to(payload, target)?;
            match socket.recv_from(&mut buf) {
                Ok((len, source)) => return Ok((buf[..len].to_vec(), source)),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    log::debug!(
                        "[transport] no response from {} (attempt {}/{})",
                        self,
                        attempt + 1,
                        retries + 1
                    );
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
        Err(Error::Timeout)
    }

    /// [`exchange`](Endpoint::exchange) with the default timeout and
    /// retry budget.
    pub fn exchange_default(&self, payload: &[u8]) -> Result<(Vec<u8>, SocketAddr)> {
        self.exchange(payload, EXCHANGE_TIMEOUT, EXCHANGE_RETRIES)
    }
}

/// Request/response exchange at the TLV level: encode, send, wait,
/// decode. Semantic per-TLV errors are left in the returned TLVs for the
/// caller to inspect.
pub fn exchange_tlvs(
    endpoint: &Endpoint,
    tlvs: &[crate::protocol::Tlv],
    timeout: Duration,
    retries: u32,
) -> Result<Vec<crate::protocol::Tlv>> {
    let packet = crate::protocol::encode_tlv_packet(tlvs);
    let (data, _) = endpoint.exchange(&packet, timeout, retries)?;
    let (header, tlvs) = crate::protocol::decode_tlv_packet(&data)?;
    if header.error != 0 {
        log::info!("[transport] {} encap error {} in response", endpoint, header.error);
    }
    Ok(tlvs)
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, tlv};
    use std::net::UdpSocket;

    #[test]
    fn test_family_detection_and_display() {
        let v4 = Endpoint::new("10.0.0.1", 49111);
        assert!(!v4.is_ipv6());
        assert_eq!(v4.to_string(), "10.0.0.1:49111");

        let v6 = Endpoint::new("fd00::1", 49111);
        assert!(v6.is_ipv6());
        assert_eq!(v6.to_string(), "[fd00::1]:49111");
    }

    #[test]
    fn test_exchange_roundtrip_on_loopback() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let port = peer.local_addr().unwrap().port();

        let echo = std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let (len, src) = peer.recv_from(&mut buf).expect("recv");
            peer.send_to(&buf[..len], src).expect("send");
        });

        let request = protocol::encode_tlv_packet(&[tlv::get32(0, 0x003)]);
        let endpoint = Endpoint::new("127.0.0.1", port);
        let (response, _) = endpoint
            .exchange(&request, Duration::from_secs(2), 0)
            .expect("exchange");
        assert_eq!(response, request);
        echo.join().unwrap();
    }

    #[test]
    fn test_exchange_times_out_without_peer() {
        let silent = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let port = silent.local_addr().unwrap().port();

        let endpoint = Endpoint::new("127.0.0.1", port);
        let result = endpoint.exchange(b"ping", Duration::from_millis(50), 1);
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
