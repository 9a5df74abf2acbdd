// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! SLIP framing (RFC 1055) for the serial-radio transport.
//!
//! Frames are terminated by END; END and ESC bytes inside a frame are
//! escaped. The decoder is streaming: bytes arrive in arbitrary chunks
//! and complete frames are handed out as they close. An invalid escape
//! sequence is logged and skipped without aborting the stream.

pub const SLIP_END: u8 = 0xC0;
pub const SLIP_ESC: u8 = 0xDB;
pub const SLIP_ESC_END: u8 = 0xDC;
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Encode one frame: escape END/ESC and terminate with END.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1);
    for &byte in data {
        match byte {
            SLIP_END => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_END]),
            SLIP_ESC => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out.push(SLIP_END);
    out
}

/// Streaming SLIP decoder. Escape state and partial frames carry over
/// between [`decode`](SlipDecoder::decode) calls.
#[derive(Debug, Default)]
pub struct SlipDecoder {
    buf: Vec<u8>,
    escaped: bool,
}

impl SlipDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns the frames completed by it.
    /// Empty frames (back-to-back END bytes) are dropped.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if self.escaped {
                match byte {
                    SLIP_ESC_END => self.buf.push(SLIP_END),
                    SLIP_ESC_ESC => self.buf.push(SLIP_ESC),
                    other => {
                        log::warn!("[serial] SLIP framing error: ESC 0x{other:02x}");
                    }
                }
                self.escaped = false;
            } else {
                match byte {
                    SLIP_END => {
                        if !self.buf.is_empty() {
                            frames.push(std::mem::take(&mut self.buf));
                        }
                    }
                    SLIP_ESC => self.escaped = true,
                    other => self.buf.push(other),
                }
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_escapes_special_bytes() {
        let encoded = encode(&[1, SLIP_END, 2, SLIP_ESC, 3]);
        assert_eq!(
            encoded,
            vec![1, SLIP_ESC, SLIP_ESC_END, 2, SLIP_ESC, SLIP_ESC_ESC, 3, SLIP_END]
        );
    }

    #[test]
    fn test_roundtrip_across_chunk_boundaries() {
        let frame = vec![0x10, SLIP_END, SLIP_ESC, 0x42];
        let encoded = encode(&frame);

        // Feed one byte at a time so escapes split across chunks.
        let mut decoder = SlipDecoder::new();
        let mut frames = Vec::new();
        for byte in encoded {
            frames.extend(decoder.decode(&[byte]));
        }
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut input = encode(b"one");
        input.extend_from_slice(&encode(b"two"));
        input.push(SLIP_END); // empty frame, dropped

        let mut decoder = SlipDecoder::new();
        let frames = decoder.decode(&input);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"one");
        assert_eq!(frames[1], b"two");
    }

    #[test]
    fn test_framing_error_resets_escape_state() {
        let mut decoder = SlipDecoder::new();
        // ESC followed by a plain byte is invalid; the byte is dropped
        // and the rest of the stream still decodes.
        let mut input = vec![SLIP_ESC, 0x42];
        input.extend_from_slice(&encode(b"ok"));
        let frames = decoder.decode(&input);
        assert_eq!(frames, vec![b"ok".to_vec()]);
    }
}
