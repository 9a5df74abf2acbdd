// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Encapsulation header encoder/decoder.
//!
//! Every Sparrow packet starts with a 4-byte encapsulation header followed
//! by fingerprint-mode dependent fields and the payload:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |version|  rsvd | payload type  |     error     |fp mode|iv mode|
//! +-------+-------+---------------+---------------+-------+-------+
//! |              fingerprint fields (0/4/8/16 bytes)              |
//! +---------------------------------------------------------------+
//! |                            payload                            |
//! +---------------------------------------------------------------+
//! ```
//!
//! The LENOPT fingerprint mode carries a (u16 option, u16 length) pair.
//! SERIAL-payload frames use LENOPT with the CRC option: the payload is
//! followed by a little-endian CRC32 of header+payload, and a frame is
//! valid iff the CRC32 of the whole frame equals the CRC-32 magic
//! remainder.

use super::constants::*;
use crate::error::{Error, Result};

/// Decoded encapsulation header.
///
/// `fingerprint` holds the raw variant bytes for DEVID / FIP4 /
/// DID_AND_FP modes; LENOPT is decoded into `option`/`length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapHeader {
    pub version: u8,
    pub payload_type: u8,
    pub error: u8,
    pub fpmode: u8,
    pub ivmode: u8,
    pub fingerprint: Vec<u8>,
    pub option: Option<u16>,
    pub length: Option<u16>,
}

/// A decoded SERIAL-payload frame. The payload is handed back even when
/// the CRC check failed; `crc_ok` tells the caller whether to trust it.
#[derive(Debug, Clone)]
pub struct SerialFrame {
    pub header: EncapHeader,
    pub payload: Vec<u8>,
    pub crc_ok: bool,
}

/// Fixed header size in bytes.
const ENCAP_SIZE: usize = 4;

/// Extra header bytes required by a fingerprint mode.
fn fingerprint_len(fpmode: u8) -> usize {
    match fpmode {
        ENC_FP_DEVID => 8,
        ENC_FP_FIP4 => 4,
        ENC_FP_LENOPT => 4,
        ENC_FP_DID_AND_FP => 16,
        _ => 0,
    }
}

impl EncapHeader {
    /// Header for an ordinary TLV packet (version 1, no fingerprint).
    pub fn tlv() -> Self {
        Self {
            version: 1,
            payload_type: ENC_PAYLOAD_TLV,
            error: 0,
            fpmode: ENC_FP_NONE,
            ivmode: 0,
            fingerprint: Vec::new(),
            option: None,
            length: None,
        }
    }

    /// Header with an 8-byte device-id fingerprint.
    pub fn with_device_id(device_id: [u8; 8]) -> Self {
        Self {
            fpmode: ENC_FP_DEVID,
            fingerprint: device_id.to_vec(),
            ..Self::tlv()
        }
    }

    /// Device id carried in DEVID or DID_AND_FP mode, if any.
    pub fn device_id(&self) -> Option<&[u8]> {
        match self.fpmode {
            ENC_FP_DEVID | ENC_FP_DID_AND_FP => Some(&self.fingerprint[..8]),
            _ => None,
        }
    }

    /// Total header size including the fingerprint fields.
    pub fn size(&self) -> usize {
        ENCAP_SIZE + fingerprint_len(self.fpmode)
    }

    /// Pack the header (fixed part plus fingerprint fields).
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.push(self.version << 4);
        out.push(self.payload_type);
        out.push(self.error);
        out.push(self.fpmode << 4 | self.ivmode);
        if self.fpmode == ENC_FP_LENOPT {
            out.extend_from_slice(&self.option.unwrap_or(0).to_be_bytes());
            out.extend_from_slice(&self.length.unwrap_or(0).to_be_bytes());
        } else {
            out.extend_from_slice(&self.fingerprint);
        }
        out
    }

    /// Decode a header from the front of `data`. Returns the header and
    /// the offset where the payload starts.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < ENCAP_SIZE {
            return Err(Error::MalformedHeader {
                needed: ENCAP_SIZE,
                got: data.len(),
            });
        }
        let fpmode = data[3] >> 4;
        let size = ENCAP_SIZE + fingerprint_len(fpmode);
        if data.len() < size {
            return Err(Error::MalformedHeader {
                needed: size,
                got: data.len(),
            });
        }

        let mut header = Self {
            version: data[0] >> 4,
            payload_type: data[1],
            error: data[2],
            fpmode,
            ivmode: data[3] & 0xf,
            fingerprint: Vec::new(),
            option: None,
            length: None,
        };
        if fpmode == ENC_FP_LENOPT {
            header.option = Some(u16::from_be_bytes([data[4], data[5]]));
            header.length = Some(u16::from_be_bytes([data[6], data[7]]));
        } else {
            header.fingerprint = data[ENCAP_SIZE..size].to_vec();
        }
        Ok((header, size))
    }

    /// Build a complete SERIAL frame around `payload`: LENOPT header with
    /// the CRC option, the payload, and a trailing little-endian CRC32 of
    /// header+payload.
    pub fn pack_serial(payload: &[u8]) -> Vec<u8> {
        let header = Self {
            payload_type: ENC_PAYLOAD_SERIAL,
            fpmode: ENC_FP_LENOPT,
            option: Some(ENC_FP_LENOPT_OPTION_CRC),
            length: Some(payload.len() as u16),
            ..Self::tlv()
        };
        let mut out = header.pack();
        out.extend_from_slice(payload);
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode a SERIAL frame: header, payload and CRC validation.
    ///
    /// A CRC mismatch is reported through `crc_ok` rather than an error;
    /// the payload is still returned so callers can decide what to keep.
    pub fn decode_serial(data: &[u8]) -> Result<SerialFrame> {
        let (header, offset) = Self::decode(data)?;
        let length = header.length.unwrap_or(0) as usize;
        let end = offset + length + 4;
        if data.len() < end {
            return Err(Error::MalformedHeader {
                needed: end,
                got: data.len(),
            });
        }
        let payload = data[offset..offset + length].to_vec();
        let crc_ok = crc32fast::hash(&data[..end]) == CRC_MAGIC_REMAINDER;
        if !crc_ok {
            log::debug!(
                "[codec] {}",
                Error::ChecksumInvalid {
                    computed: crc32fast::hash(&data[..end]),
                }
            );
        }
        Ok(SerialFrame {
            header,
            payload,
            crc_ok,
        })
    }
}
