// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Sparrow application-layer wire codec.
//!
//! This module contains the protocol building blocks:
//! - Constants: product/instance types, variable ids, op and error codes
//! - Encapsulation header encode/decode with serial-frame CRC
//! - TLV encode/decode and request builders
//! - SLIP framing for the serial-radio transport
//!
//! All protocol integers are big-endian on the wire.

pub mod constants;
pub mod encap;
pub mod slip;
pub mod tlv;

pub use constants::*;
pub use encap::EncapHeader;
pub use tlv::Tlv;

use crate::error::Result;

/// Encode one encapsulation packet: header (version 1, TLV payload),
/// each TLV's packed bytes, and the NULL terminator.
pub fn encode_tlv_packet(tlvs: &[Tlv]) -> Vec<u8> {
    let mut out = EncapHeader::tlv().pack();
    for tlv in tlvs {
        tlv.pack_into(&mut out);
    }
    out.extend_from_slice(&NULL_TLV);
    out
}

/// Decode an encapsulation packet into its header and TLV sequence.
///
/// The caller is responsible for checking `header.error` before trusting
/// the TLVs.
pub fn decode_tlv_packet(data: &[u8]) -> Result<(EncapHeader, Vec<Tlv>)> {
    let (header, offset) = EncapHeader::decode(data)?;
    let tlvs = tlv::decode_sequence(&data[offset..])?;
    Ok((header, tlvs))
}

/// Seconds component of an IEEE-64 elapsed time (seconds in the high
/// word, nanoseconds in the low word).
pub fn ieee64_seconds(value: u64) -> u64 {
    value >> 32
}

/// Render an IEEE-64 elapsed time as `days:HH:MM:SS'mmm`.
pub fn format_ieee64_elapsed(value: u64) -> String {
    let mut seconds = ieee64_seconds(value);
    let millis = (value & 0xffff_ffff) / 1_000_000;
    let days = seconds / 86_400;
    seconds %= 86_400;
    let hours = seconds / 3_600;
    seconds %= 3_600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{days}:{hours:02}:{minutes:02}:{seconds:02}'{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ieee64_split() {
        let value = (90_061u64 << 32) | 500_000_000;
        assert_eq!(ieee64_seconds(value), 90_061);
        // 1 day, 1 hour, 1 minute, 1 second, 500 ms
        assert_eq!(format_ieee64_elapsed(value), "1:01:01:01'500");
    }

    #[test]
    fn test_packet_roundtrip() {
        let tlvs = vec![
            tlv::get64(0, VARIABLE_OBJECT_TYPE),
            tlv::get32(0, VARIABLE_NUMBER_OF_INSTANCES),
        ];
        let packet = encode_tlv_packet(&tlvs);
        // 4-byte encap header + 2 x 8-byte TLV + 2-byte terminator
        assert_eq!(packet.len(), 4 + 16 + 2);

        let (header, decoded) = decode_tlv_packet(&packet).expect("decode packet");
        assert_eq!(header.version, 1);
        assert_eq!(header.payload_type, ENC_PAYLOAD_TLV);
        assert_eq!(header.error, 0);
        assert_eq!(decoded, tlvs);
    }
}
