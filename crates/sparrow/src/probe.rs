// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! External liveness probe.
//!
//! Devices that stop answering TLV requests are probed with an ICMP echo
//! before being dropped from the registry. The probe runs as an external
//! command so the server does not need raw-socket privileges.

use std::process::Command;

/// Liveness check for a device that has gone quiet.
pub trait LivenessProbe: Send + Sync {
    /// Returns true when the host answered the probe.
    fn probe(&self, host: &str) -> bool;
}

/// ICMP echo probe via the system `ping` command (one packet, 2 s wait).
#[derive(Debug, Default)]
pub struct PingProbe;

impl LivenessProbe for PingProbe {
    fn probe(&self, host: &str) -> bool {
        let mut cmd = Command::new("ping");
        if host.contains(':') {
            cmd.arg("-6");
        }
        cmd.args(["-c", "1", "-W", "2", host]);
        match cmd.output() {
            Ok(output) => {
                log::debug!(
                    "[probe] ping {} -> {}",
                    host,
                    if output.status.success() { "alive" } else { "no reply" }
                );
                output.status.success()
            }
            Err(err) => {
                log::info!("[probe] failed to run ping for {}: {}", host, err);
                false
            }
        }
    }
}
