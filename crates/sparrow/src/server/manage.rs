// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Management tick.
//!
//! Once per second every known device is walked through the same
//! sequence: re-grab if a watchdog rejection asked for it, discovery
//! (bounded attempts) or liveness probing for undiscovered devices,
//! watchdog refresh, and the periodic fetch. Devices are removed in a
//! second pass so the map is never mutated mid-scan.

use super::DeviceServer;
use crate::config::{
    DISCOVERY_RETRY_LIMIT, FETCH_BACKOFF_STEP_SECS, OFFLINE_REMOVAL_SECS, PING_INTERVAL_SECS,
    WATCHDOG_RETRY_LIMIT, WATCHDOG_RETRY_SECS,
};
use crate::device::{Device, SendTarget};
use crate::nstats::nstats_fetch_tlv;
use crate::protocol::{tlv, VARIABLE_UNIT_BOOT_TIMER, VARIABLE_UNIT_CONTROLLER_WATCHDOG};
use std::sync::Arc;
use std::time::Duration;

impl DeviceServer {
    pub(crate) fn manage_loop(self: Arc<Self>) {
        log::debug!("[server] management tick running");
        while !self.is_stopped() {
            self.manage_once();
            std::thread::sleep(Duration::from_secs(1));
        }
        log::debug!("[server] management tick stopped");
    }

    /// One management pass over every known device. Normally driven by
    /// the internal one-second ticker; exposed for embedders that run
    /// their own scheduler.
    pub fn manage_once(self: &Arc<Self>) {
        let now = self.clock.now();
        let mut remove: Vec<(String, &'static str)> = Vec::new();

        for device in self.get_devices() {
            if self.is_stopped() {
                return;
            }

            if device.take_regrab_request() {
                log::info!("[server] re-grabbing {} after watchdog rejection", device.address);
                self.grab(&SendTarget::Device(device.clone()));
            }

            if !device.is_discovered() {
                if device.discovery_tries() < DISCOVERY_RETRY_LIMIT {
                    self.discover_device(&device);
                }
                if !device.is_discovered() {
                    let (last_seen, last_ping) = {
                        let st = device.state.lock();
                        (st.last_seen, st.last_ping)
                    };
                    let ping_interval = Duration::from_secs(PING_INTERVAL_SECS);
                    if now > last_seen + ping_interval && now > last_ping + ping_interval {
                        self.spawn_ping(&device);
                    }
                    if now > last_seen + Duration::from_secs(OFFLINE_REMOVAL_SECS) {
                        remove.push((device.address.clone(), "not seen for too long"));
                    }
                    continue;
                }
            }

            // Watchdog refresh. The deadline is always advanced before
            // the send, even if the send then fails; the next tick picks
            // the failure up through the bumped retry counter.
            let update_due = {
                let st = device.state.lock();
                st.next_update.map_or(true, |deadline| now > deadline)
            };
            if update_due {
                let tries = {
                    let mut st = device.state.lock();
                    st.update_tries += 1;
                    st.update_tries
                };
                if tries > WATCHDOG_RETRY_LIMIT {
                    remove.push((device.address.clone(), "too many watchdog retries"));
                } else {
                    log::debug!("[server] refreshing watchdog in {}", device.address);
                    device.state.lock().next_update =
                        Some(now + Duration::from_secs(WATCHDOG_RETRY_SECS));
                    let refresh = tlv::set32(
                        0,
                        VARIABLE_UNIT_CONTROLLER_WATCHDOG,
                        self.config.watchdog_secs,
                    );
                    device.send(vec![refresh], None);
                }
            }

            // Periodic fetch with linear backoff on failure.
            let fetch_due = {
                let st = device.state.lock();
                st.next_fetch.map_or(true, |deadline| now >= deadline)
            };
            if fetch_due {
                let tries = {
                    let mut st = device.state.lock();
                    st.fetch_tries += 1;
                    st.fetch_tries
                };
                if self.fetch_periodic(&device) {
                    let mut st = device.state.lock();
                    st.fetch_tries = 0;
                    st.next_fetch = Some(
                        self.clock.now() + Duration::from_secs(self.config.fetch_secs),
                    );
                } else {
                    log::info!(
                        "[server] failed to fetch from {} ({})",
                        device.address,
                        tries
                    );
                    device.state.lock().next_fetch = Some(
                        self.clock.now()
                            + Duration::from_secs(FETCH_BACKOFF_STEP_SECS * u64::from(tries)),
                    );
                }
            }
        }

        for (address, reason) in remove {
            log::info!("[server] removing device {address}: {reason}");
            self.remove_device(&address);
        }
    }

    /// The periodic bundle: boot-timer read for liveness, the statistics
    /// blob when the instance exists, and a re-arm for trigger instances.
    pub(crate) fn fetch_periodic(&self, device: &Arc<Device>) -> bool {
        let mut tlvs = vec![tlv::get64(0, VARIABLE_UNIT_BOOT_TIMER)];
        if let Some(instance) = device.nstats_instance() {
            tlvs.push(nstats_fetch_tlv(instance));
        }
        let mut arm_targets = Vec::new();
        if let Some(instance) = device.button_instance() {
            arm_targets.push(instance);
        }
        if let Some(instance) = device.motion_instance() {
            arm_targets.push(instance);
        }
        if !arm_targets.is_empty() {
            tlvs.extend(Device::arm_tlvs(&arm_targets));
        }
        log::debug!("[server] fetching periodic data from {}", device.address);
        device.send(tlvs, None)
    }

    /// Fire-and-forget liveness probe; a reply refreshes `last_seen`.
    fn spawn_ping(&self, device: &Arc<Device>) {
        device.state.lock().last_ping = self.clock.now();
        log::info!("[server] pinging {} to check liveness", device.address);
        let probe = self.probe.clone();
        let clock = self.clock.clone();
        let device = device.clone();
        let spawned = std::thread::Builder::new()
            .name("liveness-probe".into())
            .spawn(move || {
                if probe.probe(&device.address) {
                    device.state.lock().last_seen = clock.now();
                }
            });
        if let Err(err) = spawned {
            log::warn!("[server] failed to spawn liveness probe: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::test_server;
    use super::*;
    use crate::clock::Clock;
    use crate::device::InstanceInfo;
    use crate::protocol::{INSTANCE_BUTTON_GENERIC, INSTANCE_NETWORK_STATISTICS, INSTANCE_SLEEP};

    #[test]
    fn test_discovery_stops_after_retry_limit() {
        let (server, _clock) = test_server();
        let device = server.add_device("fd00::10");
        device.state.lock().discovery_tries = DISCOVERY_RETRY_LIMIT;

        server.manage_once();

        // No further discovery attempt was made.
        assert_eq!(device.discovery_tries(), DISCOVERY_RETRY_LIMIT);
        assert!(!device.is_discovered());
        assert!(server.get_device("fd00::10").is_some());
    }

    #[test]
    fn test_undiscovered_device_removed_after_offline_window() {
        let (server, clock) = test_server();
        let device = server.add_device("fd00::11");
        device.state.lock().discovery_tries = DISCOVERY_RETRY_LIMIT;

        clock.advance(Duration::from_secs(OFFLINE_REMOVAL_SECS - 1));
        server.manage_once();
        assert!(server.get_device("fd00::11").is_some());

        clock.advance(Duration::from_secs(2));
        server.manage_once();
        assert!(server.get_device("fd00::11").is_none());
    }

    #[test]
    fn test_device_removed_after_watchdog_retry_limit() {
        let (server, _clock) = test_server();
        let device = server.add_device("fd00::12");
        device.set_sleepy();
        device.complete_discovery(0x42, "Node".into(), 10, Vec::new());
        device.state.lock().update_tries = WATCHDOG_RETRY_LIMIT;

        // next_update unset means the refresh is due; the bumped counter
        // crosses the limit and the device goes away in the second pass.
        server.manage_once();
        assert!(server.get_device("fd00::12").is_none());
    }

    #[test]
    fn test_watchdog_deadline_advances_optimistically() {
        let (server, clock) = test_server();
        let device = server.add_device("fd00::13");
        device.set_sleepy();
        device.complete_discovery(0x42, "Node".into(), 10, Vec::new());

        let now = clock.now();
        server.manage_once();

        let st = device.state.lock();
        // The deadline moved ahead even though nothing was acknowledged
        // yet (the refresh sits in the sleepy queue).
        assert_eq!(st.next_update, Some(now + Duration::from_secs(WATCHDOG_RETRY_SECS)));
        assert_eq!(st.update_tries, 1);
        let queue = st.outgoing.as_ref().unwrap();
        assert!(queue
            .iter()
            .any(|t| t.variable == VARIABLE_UNIT_CONTROLLER_WATCHDOG));
    }

    #[test]
    fn test_fetch_bundle_for_sleepy_device() {
        let (server, clock) = test_server();
        let device = server.add_device("fd00::14");
        device.complete_discovery(
            0x42,
            "Node".into(),
            10,
            vec![
                InstanceInfo {
                    index: 1,
                    instance_type: INSTANCE_BUTTON_GENERIC,
                    label: "Button".into(),
                },
                InstanceInfo {
                    index: 2,
                    instance_type: INSTANCE_NETWORK_STATISTICS,
                    label: "Nstats".into(),
                },
                InstanceInfo {
                    index: 3,
                    instance_type: INSTANCE_SLEEP,
                    label: "Sleep".into(),
                },
            ],
        );
        // Pretend the watchdog refresh is not due.
        device.state.lock().next_update = Some(clock.now() + Duration::from_secs(300));

        server.manage_once();

        let st = device.state.lock();
        assert_eq!(st.fetch_tries, 0);
        assert_eq!(
            st.next_fetch,
            Some(clock.now() + Duration::from_secs(server.config().fetch_secs))
        );
        // Boot timer + nstats vector + instance 0 enable + button mask.
        let queue = st.outgoing.as_ref().unwrap();
        assert_eq!(queue.len(), 4);
        assert_eq!(queue[0].variable, VARIABLE_UNIT_BOOT_TIMER);
        assert!(queue[1].is_vector());
        assert_eq!(queue[1].instance, 2);
        assert_eq!(queue[2].instance, 0);
        assert_eq!(queue[3].instance, 1);
    }

    #[test]
    fn test_fetch_backoff_grows_linearly() {
        let (server, clock) = test_server();
        // An unresolvable host makes the immediate send fail fast.
        let device = server.add_device("");
        device.complete_discovery(0x42, "Node".into(), 10, Vec::new());
        device.state.lock().next_update = Some(clock.now() + Duration::from_secs(300));

        server.manage_once();
        {
            let st = device.state.lock();
            assert_eq!(st.fetch_tries, 1);
            assert_eq!(
                st.next_fetch,
                Some(clock.now() + Duration::from_secs(FETCH_BACKOFF_STEP_SECS))
            );
        }

        clock.advance(Duration::from_secs(FETCH_BACKOFF_STEP_SECS + 1));
        server.manage_once();
        let st = device.state.lock();
        assert_eq!(st.fetch_tries, 2);
        assert_eq!(
            st.next_fetch,
            Some(clock.now() + Duration::from_secs(2 * FETCH_BACKOFF_STEP_SECS))
        );
    }

    #[test]
    fn test_regrab_request_is_drained_by_tick() {
        let (server, clock) = test_server();
        let device = server.add_device("fd00::15");
        device.set_sleepy();
        device.complete_discovery(0x42, "Node".into(), 10, Vec::new());
        device.state.lock().next_update = Some(clock.now() + Duration::from_secs(300));
        device.state.lock().next_fetch = Some(clock.now() + Duration::from_secs(60));
        device.state.lock().regrab_requested = true;

        server.manage_once();

        // The grab pair went into the sleepy queue.
        let st = device.state.lock();
        let queue = st.outgoing.as_ref().unwrap();
        assert_eq!(queue.len(), 2);
        assert!(!st.regrab_requested);
    }
}
