// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! TLV record encoder/decoder and request builders.
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |version|     length (words)    |          variable id          |
//! +-------+-----------------------+-------------------------------+
//! |   instance    |      op       | element size  |     error     |
//! +---------------+---------------+---------------+---------------+
//! |               element offset (vector ops only)                |
//! +---------------------------------------------------------------+
//! |                element count (vector ops only)                |
//! +---------------------------------------------------------------+
//! |                        payload (if any)                       |
//! +---------------------------------------------------------------+
//! ```
//!
//! `length` counts 4-byte words. The vector variant of an op is the op
//! value with bit 7 set and carries the extra offset/count words. A
//! 2-byte all-zero sequence is the NULL terminator closing a TLV list.

use super::constants::*;
use crate::error::{Error, Result};
use std::fmt;

const TLV_HEADER_SIZE: usize = 8;
const TLV_VECTOR_EXT_SIZE: usize = 8;

/// One TLV record, scalar or vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub version: u8,
    /// Declared length in 4-byte words.
    pub length: u16,
    pub variable: u16,
    pub instance: u8,
    pub op: u8,
    pub element_size: u8,
    pub error: u8,
    pub element_offset: u32,
    pub element_count: u32,
    pub data: Vec<u8>,
    pub is_null: bool,
}

impl Default for Tlv {
    fn default() -> Self {
        Self {
            version: 0,
            length: 2,
            variable: 0,
            instance: 0,
            op: TLV_GET_REQUEST,
            element_size: SIZE32,
            error: 0,
            element_offset: 0,
            element_count: 0,
            data: Vec::new(),
            is_null: false,
        }
    }
}

impl Tlv {
    /// The 2-byte NULL terminator.
    pub fn null() -> Self {
        Self {
            length: 0,
            is_null: true,
            ..Self::default()
        }
    }

    pub fn is_vector(&self) -> bool {
        self.op & TLV_VECTOR_FLAG != 0
    }

    /// Encoded size in bytes, payload included.
    pub fn size(&self) -> usize {
        if self.is_null {
            return 2;
        }
        let ext = if self.is_vector() {
            TLV_VECTOR_EXT_SIZE
        } else {
            0
        };
        TLV_HEADER_SIZE + ext + self.data.len()
    }

    /// Signed big-endian value of a 4- or 8-byte payload.
    pub fn int_value(&self) -> Option<i64> {
        match self.data.len() {
            4 => Some(i64::from(i32::from_be_bytes(
                self.data[..4].try_into().ok()?,
            ))),
            8 => Some(i64::from_be_bytes(self.data[..8].try_into().ok()?)),
            _ => None,
        }
    }

    /// Payload as text, cut at the first NUL. Used for label variables.
    pub fn utf8_value(&self) -> String {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.data.len());
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.pack_into(&mut out);
        out
    }

    pub fn pack_into(&self, out: &mut Vec<u8>) {
        if self.is_null {
            out.extend_from_slice(&NULL_TLV);
            return;
        }
        out.push(self.version << 4 | (self.length >> 8) as u8);
        out.push(self.length as u8);
        out.extend_from_slice(&self.variable.to_be_bytes());
        out.push(self.instance);
        out.push(self.op);
        out.push(self.element_size);
        out.push(self.error);
        if self.is_vector() {
            out.extend_from_slice(&self.element_offset.to_be_bytes());
            out.extend_from_slice(&self.element_count.to_be_bytes());
        }
        out.extend_from_slice(&self.data);
    }

    /// Decode one TLV from the front of `data`.
    ///
    /// GET responses carry `4 * 2^element_size` payload bytes per element
    /// (times the element count for vectors). Any other op whose declared
    /// word length exceeds the computed size carries the excess bytes as
    /// payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::TruncatedTlv {
                needed: 2,
                got: data.len(),
            });
        }
        if data[0] == 0 && data[1] == 0 {
            return Ok(Self::null());
        }
        if data.len() < TLV_HEADER_SIZE {
            return Err(Error::TruncatedTlv {
                needed: TLV_HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut tlv = Self {
            version: data[0] >> 4,
            length: u16::from(data[0] & 0xf) << 8 | u16::from(data[1]),
            variable: u16::from_be_bytes([data[2], data[3]]),
            instance: data[4],
            op: data[5],
            element_size: data[6],
            error: data[7],
            ..Self::default()
        };

        let mut header_size = TLV_HEADER_SIZE;
        if tlv.is_vector() {
            header_size += TLV_VECTOR_EXT_SIZE;
            if data.len() < header_size {
                return Err(Error::TruncatedTlv {
                    needed: header_size,
                    got: data.len(),
                });
            }
            tlv.element_offset = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
            tlv.element_count = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
        }

        // Element sizes past SIZE512 are invalid on the wire; fall back to
        // the declared length for those instead of trusting the code.
        let mut payload_len = if tlv.element_size > SIZE512 {
            0
        } else if tlv.op == TLV_GET_RESPONSE {
            element_bytes(tlv.element_size)
        } else if tlv.op == TLV_GET_RESPONSE | TLV_VECTOR_FLAG {
            (tlv.element_count as usize).saturating_mul(element_bytes(tlv.element_size))
        } else {
            0
        };
        let declared = tlv.length as usize * 4;
        if declared > header_size + payload_len {
            if payload_len == 0 {
                log::debug!(
                    "[codec] payload in unexpected op {} ({} bytes)",
                    tlv_op_name(tlv.op),
                    declared - header_size
                );
            }
            payload_len = declared - header_size;
        }

        let end = header_size + payload_len;
        if data.len() < end {
            return Err(Error::TruncatedTlv {
                needed: end,
                got: data.len(),
            });
        }
        tlv.data = data[header_size..end].to_vec();
        Ok(tlv)
    }
}

impl fmt::Display for Tlv {
    /// Compact rendering for log lines: `[instance:0xvar:OP]`, with the
    /// error code and 32-bit value appended when present.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null {
            return write!(f, "[null]");
        }
        write!(
            f,
            "[{}:0x{:03x}:{}",
            self.instance,
            self.variable,
            tlv_op_short_name(self.op)
        )?;
        if self.error != 0 {
            write!(f, "E{}", self.error)?;
        }
        if self.element_size == SIZE32 && self.data.len() == 4 {
            if let Some(value) = self.int_value() {
                write!(f, ":0x{value:03x}")?;
            }
        }
        write!(f, "]")
    }
}

// ===== Request builders =====

/// Scalar GET request.
pub fn get(instance: u8, variable: u16, element_size: u8) -> Tlv {
    Tlv {
        op: TLV_GET_REQUEST,
        instance,
        variable,
        element_size,
        ..Tlv::default()
    }
}

pub fn get32(instance: u8, variable: u16) -> Tlv {
    get(instance, variable, SIZE32)
}

pub fn get64(instance: u8, variable: u16) -> Tlv {
    get(instance, variable, SIZE64)
}

pub fn get128(instance: u8, variable: u16) -> Tlv {
    get(instance, variable, SIZE128)
}

pub fn get256(instance: u8, variable: u16) -> Tlv {
    get(instance, variable, SIZE256)
}

pub fn get512(instance: u8, variable: u16) -> Tlv {
    get(instance, variable, SIZE512)
}

/// Scalar SET request carrying `data`.
pub fn set(instance: u8, variable: u16, element_size: u8, data: Vec<u8>) -> Tlv {
    Tlv {
        op: TLV_SET_REQUEST,
        instance,
        variable,
        element_size,
        length: 2 + (data.len() / 4) as u16,
        data,
        ..Tlv::default()
    }
}

/// Scalar 32-bit SET request.
pub fn set32(instance: u8, variable: u16, value: u32) -> Tlv {
    set(instance, variable, SIZE32, value.to_be_bytes().to_vec())
}

/// Vector GET request for `element_count` elements from `element_offset`.
pub fn get_vector(
    instance: u8,
    variable: u16,
    element_size: u8,
    element_offset: u32,
    element_count: u32,
) -> Tlv {
    Tlv {
        op: TLV_GET_REQUEST | TLV_VECTOR_FLAG,
        instance,
        variable,
        element_size,
        element_offset,
        element_count,
        length: 4,
        ..Tlv::default()
    }
}

/// Vector SET request carrying `data`.
pub fn set_vector(
    instance: u8,
    variable: u16,
    element_size: u8,
    element_offset: u32,
    element_count: u32,
    data: Vec<u8>,
) -> Tlv {
    Tlv {
        op: TLV_SET_REQUEST | TLV_VECTOR_FLAG,
        instance,
        variable,
        element_size,
        element_offset,
        element_count,
        length: 4 + (data.len() / 4) as u16,
        data,
        ..Tlv::default()
    }
}

/// Decode a sequence of TLVs from one encapsulation payload.
///
/// Stops at the NULL terminator or when fewer than 3 bytes remain
/// (trailing padding). The terminator itself is not returned.
pub fn decode_sequence(data: &[u8]) -> Result<Vec<Tlv>> {
    let mut tlvs = Vec::new();
    let mut offset = 0;
    while data.len() - offset >= 3 {
        if data[offset] == 0 && data[offset + 1] == 0 {
            break;
        }
        let tlv = Tlv::decode(&data[offset..])?;
        offset += tlv.size();
        tlvs.push(tlv);
    }
    Ok(tlvs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip_all_sizes() {
        let builders: [(fn(u8, u16) -> Tlv, u8); 5] = [
            (get32, SIZE32),
            (get64, SIZE64),
            (get128, SIZE128),
            (get256, SIZE256),
            (get512, SIZE512),
        ];
        for (builder, element_size) in builders {
            let request = builder(3, 0x102);
            assert_eq!(request.element_size, element_size);
            let decoded = Tlv::decode(&request.pack()).expect("decode");
            assert_eq!(decoded, request);
            assert_eq!(decoded.size(), 8);
        }

        let request = set32(0, VARIABLE_UNIT_CONTROLLER_WATCHDOG, 600);
        let decoded = Tlv::decode(&request.pack()).expect("decode");
        assert_eq!(decoded, request);
        assert_eq!(decoded.int_value(), Some(600));
    }

    #[test]
    fn test_vector_roundtrip_preserves_offset_and_count() {
        for element_size in [SIZE32, SIZE64, SIZE128, SIZE256, SIZE512] {
            let request = get_vector(2, VARIABLE_NSTATS_DATA, element_size, 7, 64);
            let decoded = Tlv::decode(&request.pack()).expect("decode");
            assert_eq!(decoded, request);
            assert_eq!(decoded.element_offset, 7);
            assert_eq!(decoded.element_count, 64);
        }

        let request = set_vector(
            0,
            VARIABLE_EVENT_ARRAY,
            SIZE32,
            0,
            2,
            vec![0, 0, 0, 1, 0, 0, 0, 2],
        );
        let decoded = Tlv::decode(&request.pack()).expect("decode");
        assert_eq!(decoded, request);
        assert_eq!(decoded.size(), 16 + 8);
    }

    #[test]
    fn test_null_tlv_consumes_two_bytes() {
        let tlv = Tlv::decode(&[0, 0]).expect("decode");
        assert!(tlv.is_null);
        assert_eq!(tlv.size(), 2);
        assert_eq!(tlv.pack(), NULL_TLV);
    }

    #[test]
    fn test_get_response_payload_width() {
        // 64-bit scalar GET response: 8 header + 8 payload bytes.
        let mut packed = get64(0, VARIABLE_OBJECT_TYPE).pack();
        packed[5] = TLV_GET_RESPONSE;
        packed[1] = 4; // 2 header words + 2 payload words
        packed.extend_from_slice(&0x0090_DA03_0201_001Du64.to_be_bytes());

        let decoded = Tlv::decode(&packed).expect("decode");
        assert_eq!(decoded.data.len(), 8);
        assert_eq!(decoded.int_value(), Some(0x0090_DA03_0201_001D));
    }

    #[test]
    fn test_truncated_response_is_an_error() {
        let mut packed = get64(0, VARIABLE_OBJECT_TYPE).pack();
        packed[5] = TLV_GET_RESPONSE;
        packed.extend_from_slice(&[1, 2, 3]); // 3 of 8 payload bytes

        assert!(matches!(
            Tlv::decode(&packed),
            Err(Error::TruncatedTlv { needed: 16, got: 11 })
        ));
    }

    #[test]
    fn test_sequence_stops_at_null_and_padding() {
        let mut data = Vec::new();
        get64(0, VARIABLE_OBJECT_TYPE).pack_into(&mut data);
        get32(0, VARIABLE_NUMBER_OF_INSTANCES).pack_into(&mut data);
        data.extend_from_slice(&NULL_TLV);
        data.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]); // after terminator

        let tlvs = decode_sequence(&data).expect("decode");
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].variable, VARIABLE_OBJECT_TYPE);

        // Two trailing bytes of padding instead of a terminator.
        let mut data = get32(1, 0x100).pack();
        data.extend_from_slice(&[0xff, 0x01]);
        let tlvs = decode_sequence(&data).expect("decode");
        assert_eq!(tlvs.len(), 1);
    }

    #[test]
    fn test_display_rendering() {
        let tlv = get32(1, 0x104);
        assert_eq!(tlv.to_string(), "[1:0x104:G]");

        let mut response = set32(0, 0x0c0, 0);
        response.op = TLV_GET_RESPONSE;
        response.error = TLV_ERROR_TIMEOUT;
        assert_eq!(response.to_string(), "[0:0x0c0:GRE7:0x000]");

        assert_eq!(Tlv::null().to_string(), "[null]");
    }
}
