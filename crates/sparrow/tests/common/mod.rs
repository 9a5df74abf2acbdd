// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Shared test helpers: a scripted Sparrow node on loopback UDP and TLV
//! response builders.

#![allow(dead_code)]

use sparrow::protocol::{self, element_bytes, Tlv, TLV_GET_REQUEST, TLV_VECTOR_FLAG};
use sparrow::LivenessProbe;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A simulated device: answers every request packet TLV-by-TLV through
/// the supplied responder and records what it was asked.
pub struct SimNode {
    pub port: u16,
    requests: Arc<Mutex<Vec<Vec<Tlv>>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimNode {
    pub fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&Tlv) -> Tlv + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind sim node");
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .expect("set timeout");
        let port = socket.local_addr().unwrap().port();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_requests = requests.clone();
        let thread_stop = stop.clone();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while !thread_stop.load(Ordering::SeqCst) {
                let (len, src) = match socket.recv_from(&mut buf) {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                let Ok((_, tlvs)) = protocol::decode_tlv_packet(&buf[..len]) else {
                    continue;
                };
                let response: Vec<Tlv> = tlvs.iter().map(&respond).collect();
                thread_requests.lock().unwrap().push(tlvs);
                let _ = socket.send_to(&protocol::encode_tlv_packet(&response), src);
            }
        });

        Self {
            port,
            requests,
            stop,
            handle: Some(handle),
        }
    }

    /// Everything the node has been asked so far, one entry per packet.
    pub fn requests(&self) -> Vec<Vec<Tlv>> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for SimNode {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// GET response carrying `data`.
pub fn get_response(request: &Tlv, data: Vec<u8>) -> Tlv {
    let mut t = request.clone();
    t.op = request.op | 1;
    if request.is_vector() {
        t.element_count = (data.len() / element_bytes(request.element_size)) as u32;
        t.length = 4 + (data.len() / 4) as u16;
    } else {
        t.length = 2 + (data.len() / 4) as u16;
    }
    t.data = data;
    t
}

/// Payload-free response (SET/EVENT acks, vector error shells).
pub fn ack(request: &Tlv) -> Tlv {
    let mut t = request.clone();
    t.op = request.op | 1;
    t.data = Vec::new();
    if t.is_vector() {
        t.element_count = 0;
        t.length = 4;
    } else {
        t.length = 2;
    }
    t
}

/// Response with the given protocol error code.
pub fn error_response(request: &Tlv, error: u8) -> Tlv {
    let mut t = if (request.op & !TLV_VECTOR_FLAG) == TLV_GET_REQUEST && !request.is_vector() {
        // Scalar GET responses carry their full payload width even when
        // flagging an error.
        get_response(request, vec![0u8; element_bytes(request.element_size)])
    } else {
        ack(request)
    };
    t.error = error;
    t
}

pub fn u32_bytes(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn u64_bytes(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// 32-byte NUL-padded label payload.
pub fn label_bytes(label: &str) -> Vec<u8> {
    let mut bytes = label.as_bytes().to_vec();
    bytes.resize(32, 0);
    bytes
}

/// IEEE-64 elapsed time with the given seconds (nanoseconds zero).
pub fn ieee64_uptime(seconds: u64) -> Vec<u8> {
    (seconds << 32).to_be_bytes().to_vec()
}

/// Probe that never sees a host alive; keeps tests off the real network.
pub struct NeverProbe;

impl LivenessProbe for NeverProbe {
    fn probe(&self, _host: &str) -> bool {
        false
    }
}
