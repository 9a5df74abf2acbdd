// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Network-statistics blob decoder.
//!
//! The network-statistics instance exposes its data as a blob read with a
//! vector GET: a 1-byte version, a 1-byte record count, then per record a
//! 1-byte type tag and a type-specific fixed-size body. Only the RPL
//! routing-status body is decoded; an unknown tag stops parsing and is
//! kept for diagnostics, and a truncated record stops parsing with the
//! records decoded so far still usable.

use crate::protocol::{tlv, Tlv, SIZE32, VARIABLE_NSTATS_DATA};
use std::fmt;

pub const NSTATS_TYPE_RPL: u8 = 1;
pub const NSTATS_TYPE_PARENT_INFO: u8 = 2;
pub const NSTATS_TYPE_BEACONS: u8 = 3;
pub const NSTATS_TYPE_NETSELECT: u8 = 4;
pub const NSTATS_TYPE_RADIO: u8 = 5;
pub const NSTATS_TYPE_CONFIG: u8 = 6;

const RPL_BODY_SIZE: usize = 24;

/// RPL routing status snapshot (24-byte record body, big-endian fields;
/// bytes past the DAG rank are reserved).
#[derive(Clone, PartialEq, Eq)]
pub struct NstatsRpl {
    body: [u8; RPL_BODY_SIZE],
}

impl NstatsRpl {
    fn new(body: &[u8]) -> Self {
        let mut record = Self {
            body: [0; RPL_BODY_SIZE],
        };
        record.body.copy_from_slice(body);
        record
    }

    pub fn seqno(&self) -> u8 {
        self.body[0]
    }

    pub fn free_routes(&self) -> u8 {
        self.body[1]
    }

    pub fn free_neighbors(&self) -> u8 {
        self.body[2]
    }

    pub fn parent_switches(&self) -> u8 {
        self.body[3]
    }

    /// Low 4 bytes of the preferred parent's address.
    pub fn parent(&self) -> [u8; 4] {
        [self.body[4], self.body[5], self.body[6], self.body[7]]
    }

    pub fn parent_as_string(&self) -> String {
        self.parent().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn parent_rank(&self) -> u16 {
        u16::from_be_bytes([self.body[8], self.body[9]])
    }

    pub fn parent_etx(&self) -> u16 {
        u16::from_be_bytes([self.body[10], self.body[11]])
    }

    pub fn dag_rank(&self) -> u16 {
        u16::from_be_bytes([self.body[12], self.body[13]])
    }
}

impl fmt::Debug for NstatsRpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NstatsRpl({},{},{})",
            self.seqno(),
            self.dag_rank(),
            self.parent_as_string()
        )
    }
}

/// One decoded statistics record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NstatsRecord {
    Rpl(NstatsRpl),
}

/// A decoded network-statistics blob, possibly partial.
#[derive(Debug, Clone, Default)]
pub struct Nstats {
    pub version: u8,
    pub records: Vec<NstatsRecord>,
    /// First record tag this decoder does not understand, if parsing
    /// stopped on one.
    pub unknown_type: Option<u8>,
}

impl Nstats {
    /// Decode a blob. Returns `None` only when even the 2-byte header is
    /// missing; truncated records yield a partial result instead.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        let mut nstats = Self {
            version: data[0],
            ..Self::default()
        };
        let count = data[1];
        let mut offset = 2;
        for _ in 0..count {
            if offset >= data.len() {
                break;
            }
            let tag = data[offset];
            offset += 1;
            match tag {
                NSTATS_TYPE_RPL => {
                    if offset + RPL_BODY_SIZE > data.len() {
                        return Some(nstats);
                    }
                    nstats
                        .records
                        .push(NstatsRecord::Rpl(NstatsRpl::new(
                            &data[offset..offset + RPL_BODY_SIZE],
                        )));
                    offset += RPL_BODY_SIZE;
                }
                other => {
                    nstats.unknown_type = Some(other);
                    return Some(nstats);
                }
            }
        }
        Some(nstats)
    }

    /// First RPL record, if one was decoded.
    pub fn rpl(&self) -> Option<&NstatsRpl> {
        self.records.iter().map(|NstatsRecord::Rpl(rpl)| rpl).next()
    }
}

/// The vector GET request that reads the statistics blob.
pub fn nstats_fetch_tlv(instance: u8) -> Tlv {
    tlv::get_vector(instance, VARIABLE_NSTATS_DATA, SIZE32, 0, 64)
}
