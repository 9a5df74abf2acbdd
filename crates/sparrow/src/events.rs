// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Device event fan-out.
//!
//! Listeners are kept in a copy-on-write list: registration swaps in a
//! new list, dispatch iterates a snapshot. A listener added or removed
//! during a dispatch takes effect on the next event, and no lock is held
//! while listener code runs.

use crate::device::Device;
use crate::nstats::NstatsRpl;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Device finished TLV discovery.
    Discovery,
    /// Button trigger fired.
    Button,
    /// Motion trigger fired.
    Motion,
    /// New RPL routing telemetry arrived.
    NstatsRpl,
}

/// Event payload, fixed at creation time.
#[derive(Debug, Clone)]
pub enum EventPayload {
    None,
    /// Trigger counter value for button/motion events.
    Counter(i64),
    /// Decoded RPL record for telemetry events.
    Rpl(NstatsRpl),
}

/// An immutable fact about a device, broadcast to all listeners.
#[derive(Clone)]
pub struct DeviceEvent {
    pub device: Arc<Device>,
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl DeviceEvent {
    pub fn new(device: Arc<Device>, kind: EventKind, payload: EventPayload) -> Self {
        Self {
            device,
            kind,
            payload,
        }
    }
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEvent")
            .field("device", &self.device.address)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Identifies a registered listener for later removal.
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Broadcast bus from the registry to external collaborators (UI, MQTT
/// bridge, CLI).
pub struct EventBus {
    listeners: ArcSwap<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener; returns the id to pass to [`remove_listener`].
    ///
    /// [`remove_listener`]: EventBus::remove_listener
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.listeners.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push((id, listener.clone()));
            next
        });
        id
    }

    /// Unregister a listener. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|(lid, _)| *lid != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Broadcast an event to a snapshot of the current listeners.
    pub fn dispatch(&self, event: &DeviceEvent) {
        let snapshot = self.listeners.load();
        log::debug!(
            "[events] {} {:?} -> {} listener(s)",
            event.device.address,
            event.kind,
            snapshot.len()
        );
        for (_, listener) in snapshot.iter() {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_event(bus: &Arc<EventBus>) -> DeviceEvent {
        let device = Device::new(
            "fd00::1",
            49111,
            Arc::new(SystemClock),
            bus.clone(),
            Duration::from_secs(600),
            Duration::from_secs(300),
        );
        DeviceEvent::new(device, EventKind::Discovery, EventPayload::None)
    }

    #[test]
    fn test_add_dispatch_remove() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = calls.clone();
        let id = bus.add_listener(move |event| {
            assert_eq!(event.kind, EventKind::Discovery);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.listener_count(), 1);

        let event = test_event(&bus);
        bus.dispatch(&event);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.remove_listener(id);
        assert_eq!(bus.listener_count(), 0);
        bus.dispatch(&event);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Unknown ids are ignored.
        bus.remove_listener(9999);
    }

    #[test]
    fn test_listener_added_during_dispatch_sees_next_event() {
        let bus = Arc::new(EventBus::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let dispatch_bus = bus.clone();
        let late = late_calls.clone();
        bus.add_listener(move |_| {
            // Registration during a dispatch lands in a fresh list; the
            // in-flight snapshot is not affected.
            let seen = late.clone();
            dispatch_bus.add_listener(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        });

        let event = test_event(&bus);
        bus.dispatch(&event);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 2);

        bus.dispatch(&event);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }
}
