// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Error types shared across the crate.

use std::fmt;
use std::io;

/// Errors surfaced by the codec, transports and server.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// Invalid configuration value (address, channel, allow-list, ...).
    Config(String),

    // ========================================================================
    // Codec errors
    // ========================================================================
    /// Buffer shorter than the minimum size for the declared header variant.
    MalformedHeader { needed: usize, got: usize },
    /// TLV extends past the end of the buffer.
    TruncatedTlv { needed: usize, got: usize },
    /// Serial frame CRC32 did not match the magic remainder.
    ChecksumInvalid { computed: u32 },

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// No response within the configured timeout and retry budget.
    Timeout,
    /// I/O error with underlying cause.
    Io(io::Error),
    /// Failed to bind a socket at startup (fatal).
    BindFailed(String),
    /// Address could not be parsed or resolved.
    InvalidAddress(String),

    // ========================================================================
    // Protocol errors
    // ========================================================================
    /// The peer is not the expected product (border-router bootstrap).
    UnexpectedProduct { product_type: u64 },
    /// A response did not have the expected shape (missing TLV, bad value).
    UnexpectedResponse(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::MalformedHeader { needed, got } => {
                write!(f, "malformed header: need {needed} bytes, got {got}")
            }
            Error::TruncatedTlv { needed, got } => {
                write!(f, "truncated TLV: need {needed} bytes, got {got}")
            }
            Error::ChecksumInvalid { computed } => {
                write!(f, "serial frame checksum invalid (computed 0x{computed:08x})")
            }
            Error::Timeout => write!(f, "request timed out"),
            Error::Io(err) => write!(f, "i/o error: {err}"),
            Error::BindFailed(addr) => write!(f, "failed to bind {addr}"),
            Error::InvalidAddress(addr) => write!(f, "invalid address: {addr}"),
            Error::UnexpectedProduct { product_type } => {
                write!(f, "unexpected product type 0x{product_type:016x}")
            }
            Error::UnexpectedResponse(msg) => write!(f, "unexpected response: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl Error {
    /// True for errors a caller should retry or back off on rather than
    /// treat as fatal (transport-level failures).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = Error::MalformedHeader { needed: 12, got: 4 };
        assert_eq!(err.to_string(), "malformed header: need 12 bytes, got 4");

        let err = Error::ChecksumInvalid {
            computed: 0xdeadbeef,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout.is_transient());
        assert!(Error::Io(io::Error::new(io::ErrorKind::Other, "x")).is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
        assert!(!Error::BindFailed("[::]:4444".into()).is_transient());
    }
}
