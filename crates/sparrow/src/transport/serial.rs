// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Serial-radio connection.
//!
//! The radio dongle is reached through a TCP forwarder carrying
//! SLIP-framed encapsulation frames. A reader thread reassembles the
//! byte stream into frames: frames starting with `\r` are dongle debug
//! lines and only logged, everything else is decoded as a SERIAL
//! encapsulation frame and queued for the consumer. Outgoing bytes are
//! wrapped in a SERIAL/LENOPT/CRC frame and SLIP encoded.

use crate::config::SERIAL_RADIO_PORT;
use crate::error::Result;
use crate::protocol::encap::{EncapHeader, SerialFrame};
use crate::protocol::slip::{self, SlipDecoder};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct SerialRadioConnection {
    stream: TcpStream,
    frames: Receiver<SerialFrame>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialRadioConnection {
    /// Connect to the radio forwarder on the default port.
    pub fn connect(host: &str) -> Result<Self> {
        Self::connect_to(host, SERIAL_RADIO_PORT)
    }

    pub fn connect_to(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(Duration::from_secs(1)))?;
        log::info!("[serial] connected to radio at {host}:{port}");

        let (tx, rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let reader_stream = stream.try_clone()?;
        let reader_running = running.clone();
        let reader = std::thread::Builder::new()
            .name("serial-radio-reader".into())
            .spawn(move || reader_loop(reader_stream, tx, reader_running))?;

        Ok(Self {
            stream,
            frames: rx,
            running,
            reader: Some(reader),
        })
    }

    /// Next decoded frame, if one is already queued.
    pub fn next_frame(&self) -> Option<SerialFrame> {
        self.frames.try_recv().ok()
    }

    /// Wait up to `timeout` for the next decoded frame.
    pub fn next_frame_timeout(&self, timeout: Duration) -> Option<SerialFrame> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wrap `data` in a SERIAL encapsulation frame and send it SLIP
    /// encoded.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let frame = slip::encode(&EncapHeader::pack_serial(data));
        self.stream.write_all(&frame)?;
        Ok(())
    }

    /// Stop the reader and close the connection. Idempotent.
    pub fn close(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        log::info!("[serial] connection closed");
    }
}

impl Drop for SerialRadioConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(mut stream: TcpStream, tx: Sender<SerialFrame>, running: Arc<AtomicBool>) {
    let mut decoder = SlipDecoder::new();
    let mut buf = [0u8; 400];
    while running.load(Ordering::SeqCst) {
        let len = match stream.read(&mut buf) {
            Ok(0) => {
                log::info!("[serial] radio closed the connection");
                break;
            }
            Ok(len) => len,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                if running.load(Ordering::SeqCst) {
                    log::warn!("[serial] read error: {err}");
                }
                break;
            }
        };
        for frame in decoder.decode(&buf[..len]) {
            if frame[0] == b'\r' {
                // Dongle debug output, not an encap frame.
                log::debug!(
                    "[serial] dongle: {}",
                    String::from_utf8_lossy(&frame[1..]).trim_end()
                );
                continue;
            }
            match EncapHeader::decode_serial(&frame) {
                Ok(decoded) => {
                    if tx.send(decoded).is_err() {
                        return;
                    }
                }
                Err(err) => log::debug!("[serial] dropping frame: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_frames_and_debug_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().expect("accept");
            // A debug line, then a real frame, split mid-stream.
            let mut bytes = slip::encode(b"\rbooting radio");
            bytes.extend_from_slice(&slip::encode(&EncapHeader::pack_serial(&[1, 2, 3, 4])));
            let half = bytes.len() / 2;
            peer.write_all(&bytes[..half]).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            peer.write_all(&bytes[half..]).unwrap();

            // Consume whatever the client sends before closing.
            let mut buf = [0u8; 256];
            let _ = peer.read(&mut buf);
        });

        let mut conn =
            SerialRadioConnection::connect_to("127.0.0.1", port).expect("connect");
        let frame = conn
            .next_frame_timeout(Duration::from_secs(2))
            .expect("frame");
        assert!(frame.crc_ok);
        assert_eq!(frame.payload, vec![1, 2, 3, 4]);
        // The debug line was logged, not queued.
        assert!(conn.next_frame().is_none());

        conn.send(&[9, 9]).expect("send");
        conn.close();
        conn.close(); // idempotent
        server.join().unwrap();
    }
}
