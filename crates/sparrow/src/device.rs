// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Per-node state machine.
//!
//! A [`Device`] carries everything the server knows about one node: its
//! identity and discovered instance roles, the watchdog and fetch
//! deadlines the management tick works from, and - for sleepy devices -
//! the outgoing-TLV queue that batches requests until the node checks in.
//!
//! All mutable state is owned by a single mutex per device, so the
//! management tick and the ingestion loops never race on deadlines or the
//! queue. The lock is never held across network I/O: `flush` takes the
//! whole queue out under the lock and sends it afterwards, which makes
//! the drain atomic with respect to concurrent enqueues.

use crate::clock::Clock;
use crate::events::{DeviceEvent, EventBus, EventKind, EventPayload};
use crate::nstats::{Nstats, NstatsRpl};
use crate::protocol::{self, tlv, Tlv};
use crate::protocol::{
    tlv_error_name, INSTANCE_BUTTON_GENERIC, INSTANCE_LAMP, INSTANCE_LEDS_GENERIC,
    INSTANCE_MOTION_GENERIC, INSTANCE_NETWORK_STATISTICS, INSTANCE_SLEEP, INSTANCE_TEMP_GENERIC,
    SIZE32, TLV_EVENT_RESPONSE, TLV_GET_RESPONSE, TLV_SET_RESPONSE, TLV_VECTOR_FLAG,
    VARIABLE_EVENT_ARRAY, VARIABLE_GPIO_TRIGGER_COUNTER, VARIABLE_NSTATS_DATA,
    VARIABLE_SLEEP_DEFAULT_AWAKE_TIME, VARIABLE_UNIT_BOOT_TIMER,
    VARIABLE_UNIT_CONTROLLER_WATCHDOG,
};
use crate::transport::Endpoint;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Called with the device and the response TLVs after a send completes.
pub type ResponseCallback = Arc<dyn Fn(&Arc<Device>, &[Tlv]) + Send + Sync>;

/// One discovered instance slot on a device.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub index: u8,
    pub instance_type: u64,
    pub label: String,
}

/// Mutable device state, owned by the device's mutex.
pub(crate) struct DeviceState {
    pub product_type: Option<u64>,
    pub label: String,
    pub boot_time: Option<SystemTime>,
    pub instances: Vec<InstanceInfo>,

    pub button_instance: Option<u8>,
    pub leds_instance: Option<u8>,
    pub temperature_instance: Option<u8>,
    pub nstats_instance: Option<u8>,
    pub sleep_instance: Option<u8>,
    pub motion_instance: Option<u8>,
    pub lamp_instance: Option<u8>,

    /// Watchdog refresh deadline; `None` means due now.
    pub next_update: Option<Instant>,
    pub update_tries: u32,
    /// Periodic fetch deadline; `None` means due now.
    pub next_fetch: Option<Instant>,
    pub fetch_tries: u32,
    pub discovery_tries: u32,

    pub last_seen: Instant,
    pub last_ping: Instant,

    pub button_counter: Option<i64>,
    pub motion_counter: Option<i64>,
    pub nstats_rpl: Option<NstatsRpl>,

    /// Outgoing queue; `Some` switches the device into sleepy mode where
    /// sends are batched until the next flush.
    pub outgoing: Option<Vec<Tlv>>,
    pub callbacks: Vec<ResponseCallback>,

    /// Set when a watchdog error implies another owner took the device;
    /// drained by the registry, which re-grabs.
    pub regrab_requested: bool,
}

/// One managed node.
pub struct Device {
    pub address: String,
    endpoint: Endpoint,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    watchdog: Duration,
    guard: Duration,
    pub(crate) state: Mutex<DeviceState>,
    /// Re-entrancy guard: a concurrent discovery attempt for the same
    /// device is a no-op.
    discovery_gate: Mutex<()>,
}

impl Device {
    pub fn new(
        address: &str,
        device_port: u16,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
        watchdog: Duration,
        guard: Duration,
    ) -> Arc<Self> {
        let now = clock.now();
        Arc::new(Self {
            address: address.to_string(),
            endpoint: Endpoint::new(address, device_port),
            clock,
            bus,
            watchdog,
            guard,
            state: Mutex::new(DeviceState {
                product_type: None,
                label: "unknown".into(),
                boot_time: None,
                instances: Vec::new(),
                button_instance: None,
                leds_instance: None,
                temperature_instance: None,
                nstats_instance: None,
                sleep_instance: None,
                motion_instance: None,
                lamp_instance: None,
                next_update: None,
                update_tries: 0,
                next_fetch: None,
                fetch_tries: 0,
                discovery_tries: 0,
                last_seen: now,
                // Avoid pinging immediately after add.
                last_ping: now,
                button_counter: None,
                motion_counter: None,
                nstats_rpl: None,
                outgoing: None,
                callbacks: Vec::new(),
                regrab_requested: false,
            }),
            discovery_gate: Mutex::new(()),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_discovered(&self) -> bool {
        self.state.lock().product_type.is_some()
    }

    pub fn product_type(&self) -> Option<u64> {
        self.state.lock().product_type
    }

    pub fn label(&self) -> String {
        self.state.lock().label.clone()
    }

    pub fn boot_time(&self) -> Option<SystemTime> {
        self.state.lock().boot_time
    }

    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.state.lock().instances.clone()
    }

    /// Index of the first instance of the given well-known type.
    pub fn instance_of(&self, instance_type: u64) -> Option<u8> {
        self.state
            .lock()
            .instances
            .iter()
            .find(|info| info.instance_type == instance_type)
            .map(|info| info.index)
    }

    pub fn button_instance(&self) -> Option<u8> {
        self.state.lock().button_instance
    }

    pub fn motion_instance(&self) -> Option<u8> {
        self.state.lock().motion_instance
    }

    pub fn nstats_instance(&self) -> Option<u8> {
        self.state.lock().nstats_instance
    }

    pub fn sleep_instance(&self) -> Option<u8> {
        self.state.lock().sleep_instance
    }

    pub fn leds_instance(&self) -> Option<u8> {
        self.state.lock().leds_instance
    }

    pub fn lamp_instance(&self) -> Option<u8> {
        self.state.lock().lamp_instance
    }

    /// Last decoded RPL routing snapshot.
    pub fn nstats_rpl(&self) -> Option<NstatsRpl> {
        self.state.lock().nstats_rpl.clone()
    }

    pub fn is_sleepy(&self) -> bool {
        self.state.lock().outgoing.is_some()
    }

    /// Switch into queued-send mode. Requests from now on are batched
    /// until the device checks in and the queue is flushed.
    pub fn set_sleepy(&self) {
        let mut st = self.state.lock();
        if st.outgoing.is_none() {
            st.outgoing = Some(Vec::new());
        }
    }

    /// Number of TLVs waiting in the outgoing queue.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .outgoing
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub fn discovery_tries(&self) -> u32 {
        self.state.lock().discovery_tries
    }

    /// Take the re-grab request flag, clearing it.
    pub(crate) fn take_regrab_request(&self) -> bool {
        std::mem::take(&mut self.state.lock().regrab_requested)
    }

    /// Claim the discovery gate, bumping the attempt counter. `None` when
    /// another discovery for this device is already in flight.
    pub(crate) fn begin_discovery(&self) -> Option<MutexGuard<'_, ()>> {
        let gate = self.discovery_gate.try_lock()?;
        self.state.lock().discovery_tries += 1;
        Some(gate)
    }

    /// True if an equivalent TLV (same instance, variable, op and
    /// payload) is already waiting in the outgoing queue.
    pub(crate) fn has_pending(&self, tlv: &Tlv) -> bool {
        self.state.lock().outgoing.as_ref().is_some_and(|queue| {
            queue.iter().any(|queued| {
                queued.instance == tlv.instance
                    && queued.variable == tlv.variable
                    && queued.op == tlv.op
                    && queued.data == tlv.data
            })
        })
    }

    /// Record the discovery result: identity, instance list and roles.
    pub(crate) fn complete_discovery(
        &self,
        product_type: u64,
        label: String,
        boot_seconds: u64,
        instances: Vec<InstanceInfo>,
    ) {
        let mut st = self.state.lock();
        st.product_type = Some(product_type);
        st.label = label;
        st.boot_time = SystemTime::now().checked_sub(Duration::from_secs(boot_seconds));
        for info in &instances {
            match info.instance_type {
                INSTANCE_BUTTON_GENERIC => st.button_instance = Some(info.index),
                INSTANCE_LEDS_GENERIC => st.leds_instance = Some(info.index),
                INSTANCE_TEMP_GENERIC => st.temperature_instance = Some(info.index),
                INSTANCE_NETWORK_STATISTICS => st.nstats_instance = Some(info.index),
                INSTANCE_MOTION_GENERIC => st.motion_instance = Some(info.index),
                INSTANCE_LAMP => st.lamp_instance = Some(info.index),
                INSTANCE_SLEEP => {
                    st.sleep_instance = Some(info.index);
                    if st.outgoing.is_none() {
                        st.outgoing = Some(Vec::new());
                    }
                }
                _ => {}
            }
        }
        st.instances = instances;
    }

    /// Send TLVs to the device, or queue them if the device is sleepy.
    ///
    /// For a sleepy device the TLVs are appended to the outgoing queue
    /// (the callback joins the pending callback list) and `true` is
    /// returned without network I/O. Otherwise the TLVs go out as one
    /// encapsulated request and the response is processed before this
    /// returns.
    pub fn send(self: &Arc<Self>, tlvs: Vec<Tlv>, callback: Option<ResponseCallback>) -> bool {
        {
            let mut st = self.state.lock();
            if let Some(queue) = st.outgoing.as_mut() {
                queue.extend(tlvs);
                let pending = queue.len();
                if let Some(callback) = callback {
                    st.callbacks.push(callback);
                }
                log::debug!("[device] {} queueing, {} pending", self.address, pending);
                return true;
            }
        }
        let callbacks: Vec<ResponseCallback> = callback.into_iter().collect();
        self.send_immediately(&tlvs, &callbacks)
    }

    /// Drain the outgoing queue into one encapsulated send.
    ///
    /// The queue and callback list are taken out atomically, so sends
    /// that arrive while the batch is on the wire start a new queue.
    pub fn flush(self: &Arc<Self>) {
        let (tlvs, callbacks) = {
            let mut st = self.state.lock();
            match st.outgoing.as_mut() {
                Some(queue) if !queue.is_empty() => {
                    (std::mem::take(queue), std::mem::take(&mut st.callbacks))
                }
                _ => return,
            }
        };
        log::debug!(
            "[device] flushing {} TLV(s) to {}",
            tlvs.len(),
            self.address
        );
        self.send_immediately(&tlvs, &callbacks);
    }

    fn send_immediately(self: &Arc<Self>, tlvs: &[Tlv], callbacks: &[ResponseCallback]) -> bool {
        let packet = protocol::encode_tlv_packet(tlvs);
        let response = match self.endpoint.exchange_default(&packet) {
            Ok((data, _)) => data,
            Err(err) => {
                log::info!("[device] failed to send to {}: {}", self.address, err);
                return false;
            }
        };
        let (header, response) = match protocol::decode_tlv_packet(&response) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::info!("[device] bad response from {}: {}", self.address, err);
                return false;
            }
        };
        if header.error != 0 {
            log::info!(
                "[device] {} encap error {} in response",
                self.address,
                header.error
            );
            return false;
        }
        self.process_response(&response);
        for callback in callbacks {
            callback(self, &response);
        }
        true
    }

    /// Dispatch response TLVs by (instance, variable, op).
    ///
    /// Unknown combinations are ignored. Events (button, motion, nstats)
    /// are emitted after the state lock is released, so listeners may
    /// call back into the device.
    pub fn process_response(self: &Arc<Self>, tlvs: &[Tlv]) {
        let now = self.clock.now();
        let mut events: Vec<DeviceEvent> = Vec::new();
        let mut rearm: Vec<u8> = Vec::new();
        let mut resend_watchdog = false;
        {
            let mut st = self.state.lock();
            st.last_seen = now;
            for t in tlvs {
                if t.error != 0 {
                    log::info!(
                        "[device] {} error {} ({}) in {}",
                        self.address,
                        t.error,
                        tlv_error_name(t.error),
                        t
                    );
                    if t.instance == 0 && t.variable == VARIABLE_UNIT_CONTROLLER_WATCHDOG {
                        // Another owner took the device; the registry
                        // will re-grab.
                        log::info!(
                            "[device] {} rejected watchdog refresh, requesting re-grab",
                            self.address
                        );
                        st.regrab_requested = true;
                    }
                    continue;
                }
                if t.instance == 0 {
                    match t.variable {
                        VARIABLE_UNIT_BOOT_TIMER if t.op == TLV_GET_RESPONSE => {
                            self.update_boot_time(&mut st, t);
                        }
                        VARIABLE_UNIT_CONTROLLER_WATCHDOG => match t.op {
                            TLV_GET_RESPONSE => match t.int_value() {
                                Some(remaining) if remaining > 0 => {
                                    st.next_update = Some(
                                        now + Duration::from_secs(remaining as u64)
                                            .saturating_sub(self.guard),
                                    );
                                    st.update_tries = 0;
                                }
                                Some(_) => {
                                    // Already expired; refresh right away.
                                    resend_watchdog = true;
                                }
                                None => {}
                            },
                            TLV_SET_RESPONSE => {
                                log::debug!("[device] watchdog updated in {}", self.address);
                                st.next_update =
                                    Some(now + self.watchdog.saturating_sub(self.guard));
                                st.update_tries = 0;
                            }
                            _ => {}
                        },
                        VARIABLE_SLEEP_DEFAULT_AWAKE_TIME => {
                            if st.outgoing.is_none() {
                                log::debug!("[device] {} is a sleepy device", self.address);
                                st.outgoing = Some(Vec::new());
                            }
                        }
                        _ => {}
                    }
                } else if st.button_instance == Some(t.instance) {
                    match t.variable {
                        VARIABLE_GPIO_TRIGGER_COUNTER => st.button_counter = t.int_value(),
                        VARIABLE_EVENT_ARRAY
                            if (t.op & !TLV_VECTOR_FLAG) == TLV_EVENT_RESPONSE =>
                        {
                            rearm.push(t.instance);
                            if let Some(counter) = st.button_counter {
                                log::info!(
                                    "[device] button pressed at {} ({} times)",
                                    self.address,
                                    counter
                                );
                                events.push(DeviceEvent::new(
                                    self.clone(),
                                    EventKind::Button,
                                    EventPayload::Counter(counter),
                                ));
                            }
                        }
                        _ => {}
                    }
                } else if st.motion_instance == Some(t.instance) {
                    match t.variable {
                        VARIABLE_GPIO_TRIGGER_COUNTER => st.motion_counter = t.int_value(),
                        VARIABLE_EVENT_ARRAY
                            if (t.op & !TLV_VECTOR_FLAG) == TLV_EVENT_RESPONSE =>
                        {
                            rearm.push(t.instance);
                            if let Some(counter) = st.motion_counter {
                                log::info!(
                                    "[device] motion at {} ({} times)",
                                    self.address,
                                    counter
                                );
                                events.push(DeviceEvent::new(
                                    self.clone(),
                                    EventKind::Motion,
                                    EventPayload::Counter(counter),
                                ));
                            }
                        }
                        _ => {}
                    }
                } else if st.nstats_instance == Some(t.instance)
                    && t.variable == VARIABLE_NSTATS_DATA
                {
                    if let Some(nstats) = Nstats::decode(&t.data) {
                        if let Some(rpl) = nstats.rpl() {
                            st.nstats_rpl = Some(rpl.clone());
                            events.push(DeviceEvent::new(
                                self.clone(),
                                EventKind::NstatsRpl,
                                EventPayload::Rpl(rpl.clone()),
                            ));
                        }
                    }
                }
            }
        }

        if resend_watchdog {
            let refresh = tlv::set32(
                0,
                VARIABLE_UNIT_CONTROLLER_WATCHDOG,
                self.watchdog.as_secs() as u32,
            );
            self.send(vec![refresh], None);
        }
        if !rearm.is_empty() {
            self.arm(&rearm);
        }
        for event in &events {
            self.bus.dispatch(event);
        }
    }

    fn update_boot_time(&self, st: &mut DeviceState, t: &Tlv) {
        let Some(value) = t.int_value() else { return };
        let seconds = protocol::ieee64_seconds(value as u64);
        log::debug!(
            "[device] {} booted {} ago",
            self.address,
            protocol::format_ieee64_elapsed(value as u64)
        );
        let previous = st.boot_time;
        st.boot_time = SystemTime::now().checked_sub(Duration::from_secs(seconds));
        if let (Some(previous), Some(current)) = (previous, st.boot_time) {
            if let Ok(moved_back) = previous.duration_since(current) {
                if moved_back > Duration::from_secs(30) {
                    log::info!("[device] reboot detected at {}", self.address);
                }
            }
        }
    }

    /// The two-level event-array SET sequence that (re-)arms trigger
    /// event reporting: enable on instance 0, then the trigger mask per
    /// target instance.
    pub(crate) fn arm_tlvs(instances: &[u8]) -> Vec<Tlv> {
        let mut tlvs = vec![tlv::set_vector(
            0,
            VARIABLE_EVENT_ARRAY,
            SIZE32,
            0,
            1,
            1u32.to_be_bytes().to_vec(),
        )];
        for &instance in instances {
            let mut mask = 1u32.to_be_bytes().to_vec();
            mask.extend_from_slice(&2u32.to_be_bytes());
            tlvs.push(tlv::set_vector(
                instance,
                VARIABLE_EVENT_ARRAY,
                SIZE32,
                0,
                2,
                mask,
            ));
        }
        tlvs
    }

    /// Arm (or re-arm) trigger event reporting for the given instances.
    pub fn arm(self: &Arc<Self>, instances: &[u8]) -> bool {
        if !self.send(Self::arm_tlvs(instances), None) {
            log::info!("[device] failed to arm {}", self.address);
            return false;
        }
        true
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device({})", self.address)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Where a TLV batch goes: a managed device (queued when sleepy) or a
/// raw address reached directly.
#[derive(Clone)]
pub enum SendTarget {
    Device(Arc<Device>),
    Address(Endpoint),
}

impl SendTarget {
    /// Send TLVs to the target. Callbacks only apply to device targets;
    /// for raw addresses the response is discarded after the exchange.
    pub fn send(&self, tlvs: Vec<Tlv>, callback: Option<ResponseCallback>) -> bool {
        match self {
            SendTarget::Device(device) => device.send(tlvs, callback),
            SendTarget::Address(endpoint) => {
                let packet = protocol::encode_tlv_packet(&tlvs);
                match endpoint.exchange_default(&packet) {
                    Ok(_) => true,
                    Err(err) => {
                        log::info!("[device] failed to send to {}: {}", endpoint, err);
                        false
                    }
                }
            }
        }
    }

    pub fn address(&self) -> String {
        match self {
            SendTarget::Device(device) => device.address.clone(),
            SendTarget::Address(endpoint) => endpoint.host.clone(),
        }
    }
}

impl From<Arc<Device>> for SendTarget {
    fn from(device: Arc<Device>) -> Self {
        SendTarget::Device(device)
    }
}

impl From<Endpoint> for SendTarget {
    fn from(endpoint: Endpoint) -> Self {
        SendTarget::Address(endpoint)
    }
}
