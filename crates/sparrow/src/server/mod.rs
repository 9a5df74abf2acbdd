// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Device registry and management server.
//!
//! The [`DeviceServer`] owns the address->device map and runs three kinds
//! of activities: a one-second management tick, one receive loop per
//! bound UDP socket, and fire-and-forget liveness probes and statistics
//! sweeps. The border-router bootstrap is in
//! [`setup`](DeviceServer::setup).
//!
//! Ownership of a device is claimed with a "grab": a SET of this server's
//! transport address into the device's unit controller, paired with a SET
//! of the watchdog period. Two servers can race a grab; the device keeps
//! whichever request it processed last, and the loser finds out when its
//! own watchdog refreshes start failing and re-grabs. There is no
//! arbitration on top of this.

mod ingest;
mod manage;
mod setup;

use crate::clock::{Clock, SystemClock};
use crate::config::{
    ServerConfig, DISCOVERY_TIMEOUT, EXCHANGE_RETRIES, EXCHANGE_TIMEOUT,
};
use crate::device::{Device, InstanceInfo, ResponseCallback, SendTarget};
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventBus, EventKind, EventPayload, ListenerId};
use crate::nstats::nstats_fetch_tlv;
use crate::probe::{LivenessProbe, PingProbe};
use crate::protocol::{
    self, tlv, Tlv, SIZE256, VARIABLE_LOCATION_ID, VARIABLE_NUMBER_OF_INSTANCES,
    VARIABLE_OBJECT_LABEL, VARIABLE_OBJECT_TYPE, VARIABLE_SLEEP_AWAKE_TIME_WHEN_NO_ACTIVITY,
    VARIABLE_UNIT_BOOT_TIMER, VARIABLE_UNIT_CONTROLLER_ADDRESS,
    VARIABLE_UNIT_CONTROLLER_WATCHDOG,
};
use crate::transport::{exchange_tlvs, Endpoint};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{Ipv6Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Addresses and instances learned from the border router at bootstrap.
struct NetInfo {
    /// Server address announced to devices (grab payload and beacon).
    udp_address: Ipv6Addr,
    router_address: Option<Ipv6Addr>,
    router_prefix: Option<Ipv6Addr>,
    radio_instance: Option<u8>,
    router_instance: Option<u8>,
    brm_instance: Option<u8>,
    nstats_instance: Option<u8>,
}

/// The device-management server.
pub struct DeviceServer {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn LivenessProbe>,
    bus: Arc<EventBus>,
    devices: DashMap<String, Arc<Device>>,
    net: Mutex<NetInfo>,
    stop: AtomicBool,
    sockets: Mutex<Vec<Arc<UdpSocket>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceServer {
    /// Server with the real clock and the system `ping` liveness probe.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(PingProbe))
    }

    /// Server with an injected clock and liveness probe.
    pub fn with_parts(
        config: ServerConfig,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Arc<Self> {
        let udp_address = config.udp_address;
        Arc::new(Self {
            config,
            clock,
            probe,
            bus: Arc::new(EventBus::new()),
            devices: DashMap::new(),
            net: Mutex::new(NetInfo {
                udp_address,
                router_address: None,
                router_prefix: None,
                radio_instance: None,
                router_instance: None,
                brm_instance: None,
                nstats_instance: None,
            }),
            stop: AtomicBool::new(false),
            sockets: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address announced to devices in the grab payload and the beacon.
    pub fn server_address(&self) -> Ipv6Addr {
        self.net.lock().udp_address
    }

    pub fn router_address(&self) -> Option<Ipv6Addr> {
        self.net.lock().router_address
    }

    pub fn network_prefix(&self) -> Option<Ipv6Addr> {
        self.net.lock().router_prefix
    }

    // ===================================================================
    // Registry
    // ===================================================================

    /// The device for `address`, adding it if unknown.
    pub fn add_device(&self, address: &str) -> Arc<Device> {
        if let Some(device) = self.get_device(address) {
            return device;
        }
        log::info!("[server] adding device {address}");
        let device = Device::new(
            address,
            self.config.device_port,
            self.clock.clone(),
            self.bus.clone(),
            self.config.watchdog(),
            self.config.guard(),
        );
        self.devices
            .entry(address.to_string())
            .or_insert(device)
            .value()
            .clone()
    }

    pub fn get_device(&self, address: &str) -> Option<Arc<Device>> {
        self.devices.get(address).map(|entry| entry.value().clone())
    }

    /// Snapshot of all known devices.
    pub fn get_devices(&self) -> Vec<Arc<Device>> {
        self.devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn remove_device(&self, address: &str) {
        self.devices.remove(address);
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // ===================================================================
    // Events
    // ===================================================================

    pub fn add_event_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.bus.add_listener(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) {
        self.bus.remove_listener(id)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ===================================================================
    // Device operations
    // ===================================================================

    /// Send TLVs to a target; queued when the target is a sleepy device.
    pub fn send_tlv(
        &self,
        target: &SendTarget,
        tlvs: Vec<Tlv>,
        callback: Option<ResponseCallback>,
    ) -> bool {
        target.send(tlvs, callback)
    }

    /// Claim ownership of a device: SET this server's transport address
    /// into the unit controller plus a SET of the watchdog period.
    ///
    /// For a sleepy device with an equivalent watchdog SET already
    /// pending, the grab is a no-op.
    pub fn grab(&self, target: &SendTarget) -> bool {
        let watchdog_set = tlv::set32(
            0,
            VARIABLE_UNIT_CONTROLLER_WATCHDOG,
            self.config.watchdog_secs,
        );
        if let SendTarget::Device(device) = target {
            if device.is_sleepy() && device.has_pending(&watchdog_set) {
                log::debug!("[server] grab of {} already pending", device.address);
                return true;
            }
        }
        let address_set = tlv::set(
            0,
            VARIABLE_UNIT_CONTROLLER_ADDRESS,
            SIZE256,
            self.grab_payload(),
        );
        log::info!("[server] grabbing {}", target.address());
        if !target.send(vec![address_set, watchdog_set], None) {
            log::info!("[server] failed to grab {} (time out)", target.address());
            return false;
        }
        true
    }

    /// [`grab`](DeviceServer::grab) by address, through the managed
    /// device when one exists.
    pub fn grab_device(&self, address: &str) -> bool {
        let target = match self.get_device(address) {
            Some(device) => SendTarget::Device(device),
            None => SendTarget::Address(Endpoint::new(address, self.config.device_port)),
        };
        self.grab(&target)
    }

    /// The unit-controller address payload: reserved bytes, type 0x02,
    /// server port, 16-byte IPv6 address, location id, trailing reserved
    /// bytes.
    fn grab_payload(&self) -> Vec<u8> {
        let address = self.net.lock().udp_address;
        let mut payload = Vec::with_capacity(32);
        payload.extend_from_slice(&[0, 0, 0, 0x02, 0, 0]);
        payload.extend_from_slice(&self.config.udp_port.to_be_bytes());
        payload.extend_from_slice(&address.octets());
        payload.extend_from_slice(&self.config.grab_location.to_be_bytes());
        payload.extend_from_slice(&[0, 0, 0, 0]);
        payload
    }

    /// Write a location id into a device's unit controller.
    pub fn set_location(&self, address: &str, location: u32) -> Result<Vec<Tlv>> {
        log::info!("[server] setting location on {address} => {location}");
        let endpoint = Endpoint::new(address, self.config.device_port);
        exchange_tlvs(
            &endpoint,
            &[tlv::set32(0, VARIABLE_LOCATION_ID, location)],
            EXCHANGE_TIMEOUT,
            EXCHANGE_RETRIES,
        )
    }

    /// Ask sleepy devices to stay awake for `seconds` after their next
    /// check-in. `"all"` covers every device with a sleep instance.
    /// Returns the number of devices the request was queued for.
    pub fn wakeup(&self, target: &str, seconds: u32) -> usize {
        let devices = if target == "all" {
            self.get_devices()
        } else {
            self.get_device(target).into_iter().collect()
        };
        let mut woken = 0;
        for device in devices {
            let Some(sleep_instance) = device.sleep_instance() else {
                continue;
            };
            log::debug!("[server] waking {} for {}s", device.address, seconds);
            let awake = tlv::set32(
                sleep_instance,
                VARIABLE_SLEEP_AWAKE_TIME_WHEN_NO_ACTIVITY,
                seconds,
            );
            if device.send(vec![awake], None) {
                woken += 1;
            }
        }
        woken
    }

    /// Background sweep requesting the statistics blob from every device
    /// that has the network-statistics instance, paced 500 ms apart.
    pub fn fetch_nstats(self: &Arc<Self>) {
        let server = self.clone();
        let spawned = std::thread::Builder::new()
            .name("nstats-sweep".into())
            .spawn(move || server.fetch_nstats_sweep());
        if let Err(err) = spawned {
            log::warn!("[server] failed to start nstats sweep: {err}");
        }
    }

    pub(crate) fn fetch_nstats_sweep(&self) {
        for device in self.get_devices() {
            if self.is_stopped() {
                return;
            }
            let Some(instance) = device.nstats_instance() else {
                continue;
            };
            log::debug!(
                "[server] fetching network statistics from {}",
                device.address
            );
            if !device.send(vec![nstats_fetch_tlv(instance)], None) {
                log::info!(
                    "[server] failed to fetch network statistics from {}",
                    device.address
                );
            }
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }

    // ===================================================================
    // Discovery
    // ===================================================================

    /// Run TLV discovery for a device: identity batch, then one
    /// type+label pair per instance; on success grab it, arm any trigger
    /// instances and emit a discovery event.
    ///
    /// A discovery already in flight for the same device makes this a
    /// no-op. Attempts are counted; the management tick stops retrying
    /// after the retry limit and falls back to liveness probing.
    pub fn discover_device(self: &Arc<Self>, device: &Arc<Device>) {
        let Some(_gate) = device.begin_discovery() else {
            return;
        };
        log::info!("[server] discovering {}", device.address);
        let info = match discover_endpoint(device.endpoint()) {
            Ok(info) => info,
            Err(err) => {
                log::info!("[server] discovery of {} failed: {}", device.address, err);
                return;
            }
        };
        log::info!(
            "[server] found {} \"{}\" type 0x{:016x}",
            device.address,
            info.label,
            info.product_type
        );
        device.complete_discovery(
            info.product_type,
            info.label,
            info.boot_seconds,
            info.instances,
        );

        let needs_grab = device.state.lock().next_update.is_none();
        if needs_grab && self.grab(&SendTarget::Device(device.clone())) {
            let mut st = device.state.lock();
            st.next_update = Some(
                self.clock.now() + self.config.watchdog().saturating_sub(self.config.guard()),
            );
        }

        let mut arm_targets = Vec::new();
        if let Some(instance) = device.button_instance() {
            arm_targets.push(instance);
        }
        if let Some(instance) = device.motion_instance() {
            arm_targets.push(instance);
        }
        if !arm_targets.is_empty() {
            log::info!(
                "[server] arming {} trigger instance(s) on {}",
                arm_targets.len(),
                device.address
            );
            device.arm(&arm_targets);
        }

        self.bus.dispatch(&DeviceEvent::new(
            device.clone(),
            EventKind::Discovery,
            EventPayload::None,
        ));
    }

    /// Address allow-list check for unmanaged senders.
    pub fn is_device_acceptable(&self, host: &str, _device_type: u64) -> bool {
        match &self.config.accept_nodes {
            None => true,
            Some(suffixes) => suffixes.iter().any(|suffix| host.ends_with(suffix)),
        }
    }

    // ===================================================================
    // Lifecycle
    // ===================================================================

    /// Spawn the management tick and one ingest loop per bound socket.
    /// [`setup`](DeviceServer::setup) (or `bind_sockets`) must have run.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let sockets: Vec<Arc<UdpSocket>> = self.sockets.lock().clone();
        if sockets.is_empty() {
            return Err(Error::Config("server sockets not bound".into()));
        }
        let mut threads = self.threads.lock();
        let server = self.clone();
        threads.push(
            std::thread::Builder::new()
                .name("sparrow-manage".into())
                .spawn(move || server.manage_loop())?,
        );
        for socket in sockets {
            let server = self.clone();
            threads.push(
                std::thread::Builder::new()
                    .name("sparrow-ingest".into())
                    .spawn(move || server.ingest_loop(&socket))?,
            );
        }
        Ok(())
    }

    /// Bootstrap against the border router if not done yet, then run
    /// until [`stop`](DeviceServer::stop).
    pub fn serve(self: &Arc<Self>) -> Result<()> {
        if self.net.lock().radio_instance.is_none() {
            self.setup()?;
        }
        log::info!(
            "[server] device server started at [{}]:{}",
            self.server_address(),
            self.config.udp_port
        );
        self.start()?;
        self.join();
        Ok(())
    }

    /// Signal every loop to finish. Loops poll the flag at least once a
    /// second, so shutdown is prompt.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Wait for all server threads to finish.
    pub fn join(&self) {
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
    }
}

/// Discovery result for one endpoint.
pub(crate) struct DiscoveryInfo {
    pub product_type: u64,
    pub label: String,
    pub boot_seconds: u64,
    pub instances: Vec<InstanceInfo>,
}

/// The discovery exchanges: a batched GET for object type, label,
/// instance count and boot timer (slow timeout - devices answer slowly
/// while joining the mesh), then a type+label GET pair per instance.
/// Per-instance errors are tolerated with placeholder values.
pub(crate) fn discover_endpoint(endpoint: &Endpoint) -> Result<DiscoveryInfo> {
    let batch = [
        tlv::get64(0, VARIABLE_OBJECT_TYPE),
        tlv::get256(0, VARIABLE_OBJECT_LABEL),
        tlv::get32(0, VARIABLE_NUMBER_OF_INSTANCES),
        tlv::get64(0, VARIABLE_UNIT_BOOT_TIMER),
    ];
    let tlvs = exchange_tlvs(endpoint, &batch, DISCOVERY_TIMEOUT, EXCHANGE_RETRIES)?;
    if tlvs.len() < 4 {
        return Err(Error::UnexpectedResponse(format!(
            "discovery batch returned {} TLV(s)",
            tlvs.len()
        )));
    }
    if tlvs[0].error != 0 || tlvs[2].error != 0 {
        return Err(Error::UnexpectedResponse(
            "discovery batch rejected".into(),
        ));
    }
    let product_type = tlvs[0].int_value().unwrap_or(0) as u64;
    let label = tlvs[1].utf8_value();
    let count = tlvs[2].int_value().unwrap_or(0).clamp(0, 255) as u8;
    let boot_seconds = match tlvs[3].int_value() {
        Some(value) if tlvs[3].error == 0 => protocol::ieee64_seconds(value as u64),
        _ => 0,
    };

    let mut instances = Vec::with_capacity(count as usize);
    for index in 1..=count {
        let pair = [
            tlv::get64(index, VARIABLE_OBJECT_TYPE),
            tlv::get256(index, VARIABLE_OBJECT_LABEL),
        ];
        let tlvs = exchange_tlvs(endpoint, &pair, EXCHANGE_TIMEOUT, EXCHANGE_RETRIES)?;
        let mut instance_type = u64::MAX;
        let mut instance_label = "<failed to discover>".to_string();
        if let Some(t) = tlvs.first() {
            if t.error == 0 {
                instance_type = t.int_value().unwrap_or(0) as u64;
            }
        }
        if let Some(t) = tlvs.get(1) {
            if t.error == 0 {
                instance_label = t.utf8_value();
            }
        }
        instances.push(InstanceInfo {
            index,
            instance_type,
            label: instance_label,
        });
    }
    Ok(DiscoveryInfo {
        product_type,
        label,
        boot_seconds,
        instances,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{test_server, NeverProbe};
    use super::*;
    use crate::clock::testing::MockClock;
    use crate::protocol::{INSTANCE_SLEEP, TLV_SET_REQUEST};

    #[test]
    fn test_add_device_is_idempotent() {
        let (server, _clock) = test_server();
        let first = server.add_device("fd00::1");
        let second = server.add_device("fd00::1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(server.device_count(), 1);

        server.remove_device("fd00::1");
        assert!(server.get_device("fd00::1").is_none());
    }

    #[test]
    fn test_grab_payload_layout() {
        let (server, _clock) = test_server();
        let payload = server.grab_payload();
        assert_eq!(payload.len(), 32);
        assert_eq!(&payload[..3], &[0, 0, 0]);
        assert_eq!(payload[3], 0x02);
        assert_eq!(&payload[6..8], &4444u16.to_be_bytes());
        assert_eq!(
            &payload[8..24],
            &Ipv6Addr::new(0xaaaa, 0, 0, 0, 0, 0, 0, 1).octets()
        );
        // Grab location defaults to 0.
        assert_eq!(&payload[24..28], &[0, 0, 0, 0]);
        assert_eq!(&payload[28..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_grab_is_idempotent_for_sleepy_device() {
        let (server, _clock) = test_server();
        let device = server.add_device("fd00::2");
        device.set_sleepy();

        let target = SendTarget::Device(device.clone());
        assert!(server.grab(&target));
        assert_eq!(device.pending_count(), 2);

        // An equivalent watchdog SET is already pending; no second send.
        assert!(server.grab(&target));
        assert_eq!(device.pending_count(), 2);

        let st = device.state.lock();
        let queue = st.outgoing.as_ref().unwrap();
        assert_eq!(queue[0].variable, VARIABLE_UNIT_CONTROLLER_ADDRESS);
        assert_eq!(queue[0].op, TLV_SET_REQUEST);
        assert_eq!(queue[0].data.len(), 32);
        assert_eq!(queue[1].variable, VARIABLE_UNIT_CONTROLLER_WATCHDOG);
        assert_eq!(queue[1].int_value(), Some(600));
    }

    #[test]
    fn test_wakeup_queues_awake_time_for_sleepy_devices() {
        let (server, _clock) = test_server();
        let sleepy = server.add_device("fd00::3");
        sleepy.complete_discovery(
            0x42,
            "Sleeper".into(),
            10,
            vec![InstanceInfo {
                index: 2,
                instance_type: INSTANCE_SLEEP,
                label: "Sleep".into(),
            }],
        );
        assert!(sleepy.is_sleepy());
        // A device without a sleep instance is skipped.
        server.add_device("fd00::4");

        assert_eq!(server.wakeup("all", 30), 1);
        assert_eq!(sleepy.pending_count(), 1);
        let st = sleepy.state.lock();
        let queue = st.outgoing.as_ref().unwrap();
        assert_eq!(queue[0].instance, 2);
        assert_eq!(
            queue[0].variable,
            VARIABLE_SLEEP_AWAKE_TIME_WHEN_NO_ACTIVITY
        );
        assert_eq!(queue[0].int_value(), Some(30));
    }

    #[test]
    fn test_acceptance_policy() {
        let (server, _clock) = test_server();
        assert!(server.is_device_acceptable("fd00::17", 0));

        let mut config = ServerConfig::default();
        config.accept_nodes = Some(vec!["::17".into(), "::42".into()]);
        let server = DeviceServer::with_parts(
            config,
            Arc::new(MockClock::new()),
            Arc::new(NeverProbe),
        );
        assert!(server.is_device_acceptable("fd00::17", 0));
        assert!(server.is_device_acceptable("fd00::42", 0));
        assert!(!server.is_device_acceptable("fd00::18", 0));
    }
}
