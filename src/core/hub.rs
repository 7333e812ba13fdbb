//! Fan-out event broker for network state changes.
//!
//! Each subscriber owns an independent bounded queue: a slow consumer loses
//! its own oldest events (counted, never silently) and cannot stall the
//! publisher or any other subscriber. Per-subscriber `seen` bookkeeping
//! guarantees a handle is never reported `Lost` (or changed) before it was
//! reported `Available`, and `Lost` fires at most once per transition.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;

use crate::config;
use crate::core::registry::{RegistryDiff, RegistrySnapshot};
use crate::core::types::{ConnectionProperties, NetCapabilities, NetHandle, NetSpecifier};

/// Identifier of one subscription. Valid until `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// A network state-change notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NetEvent {
    /// A network matching the subscription became usable.
    Available(NetHandle),
    /// A matching network is about to go away.
    Losing { handle: NetHandle, max_ms_to_live: u32 },
    /// A previously announced network stopped matching or was removed.
    Lost(NetHandle),
    /// Capability snapshot of an announced network changed.
    CapabilitiesChanged {
        handle: NetHandle,
        capabilities: NetCapabilities,
    },
    /// Connection properties of an announced network changed.
    PropertiesChanged {
        handle: NetHandle,
        properties: ConnectionProperties,
    },
    /// Access policy toggled for an announced network.
    BlockedStatusChanged { handle: NetHandle, blocked: bool },
    /// No matching network appeared within the subscription grace period.
    Unavailable,
}

struct SubState {
    events: VecDeque<NetEvent>,
    /// Handles this subscriber has been told `Available` about.
    seen: HashSet<NetHandle>,
    /// A match was delivered at least once; gates the grace timer.
    satisfied: bool,
    closed: bool,
}

struct Subscriber {
    id: SubscriptionId,
    specifier: Option<NetSpecifier>,
    state: Mutex<SubState>,
    notify: Notify,
    grace_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Subscriber {
    fn wants(&self, record: &crate::core::types::NetworkRecord) -> bool {
        self.specifier.as_ref().map_or(true, |s| s.matches(record))
    }
}

/// Single-writer, multi-reader event fan-out.
pub struct EventHub {
    subs: DashMap<u64, Arc<Subscriber>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    queue_capacity: usize,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_queue_capacity(config::SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            subs: DashMap::new(),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            queue_capacity,
        }
    }

    /// Registers a subscription and returns its receiving half.
    ///
    /// Networks in `snapshot` that already match are announced immediately.
    /// Otherwise a grace timer is armed (when a tokio runtime is present):
    /// at expiry with still nothing matching, exactly one `Unavailable` is
    /// delivered and the subscription stays registered, waking up again if a
    /// match appears later.
    pub fn subscribe(
        self: &Arc<Self>,
        specifier: Option<NetSpecifier>,
        snapshot: &RegistrySnapshot,
        grace: Duration,
    ) -> NetConnection {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sub = Arc::new(Subscriber {
            id,
            specifier,
            state: Mutex::new(SubState {
                events: VecDeque::new(),
                seen: HashSet::new(),
                satisfied: false,
                closed: false,
            }),
            notify: Notify::new(),
            grace_task: Mutex::new(None),
        });
        self.subs.insert(id.0, sub.clone());

        let satisfied = {
            let mut st = sub.state.lock().unwrap();
            let mut matching: Vec<NetHandle> = snapshot
                .records()
                .filter(|r| sub.wants(r))
                .map(|r| r.handle)
                .collect();
            matching.sort();
            for handle in matching {
                if st.seen.insert(handle) {
                    st.satisfied = true;
                    Self::push_locked(&mut st, NetEvent::Available(handle), self);
                }
            }
            st.satisfied
        };
        if satisfied {
            sub.notify.notify_one();
        } else if !grace.is_zero() {
            self.arm_grace_timer(&sub, grace);
        }

        tracing::debug!("subscription {id} registered");
        NetConnection {
            id,
            hub: self.clone(),
            sub,
        }
    }

    /// Cancels a subscription. Idempotent; pending events stay readable
    /// until drained, then `recv` reports closure.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, sub)) = self.subs.remove(&id.0) else {
            return false;
        };
        if let Some(task) = sub.grace_task.lock().unwrap().take() {
            task.abort();
        }
        sub.state.lock().unwrap().closed = true;
        sub.notify.notify_one();
        tracing::debug!("subscription {id} cancelled");
        true
    }

    /// Fan-out for an added or updated record, driven by the registry diff.
    pub fn notify_record(
        &self,
        record: &crate::core::types::NetworkRecord,
        diff: &RegistryDiff,
    ) {
        for entry in self.subs.iter() {
            let sub = entry.value();
            let matches = sub.wants(record);
            let mut st = sub.state.lock().unwrap();
            if st.closed {
                continue;
            }
            let announced = st.seen.contains(&record.handle);
            if matches && !announced {
                st.seen.insert(record.handle);
                st.satisfied = true;
                Self::push_locked(&mut st, NetEvent::Available(record.handle), self);
            } else if matches && announced {
                if diff.capabilities_changed || diff.metered_changed {
                    Self::push_locked(
                        &mut st,
                        NetEvent::CapabilitiesChanged {
                            handle: record.handle,
                            capabilities: record.capabilities.clone(),
                        },
                        self,
                    );
                }
                if diff.properties_changed {
                    Self::push_locked(
                        &mut st,
                        NetEvent::PropertiesChanged {
                            handle: record.handle,
                            properties: record.properties.clone(),
                        },
                        self,
                    );
                }
                if diff.blocked_changed {
                    Self::push_locked(
                        &mut st,
                        NetEvent::BlockedStatusChanged {
                            handle: record.handle,
                            blocked: record.blocked,
                        },
                        self,
                    );
                }
            } else if !matches && announced {
                st.seen.remove(&record.handle);
                Self::push_locked(&mut st, NetEvent::Lost(record.handle), self);
            }
            drop(st);
            sub.notify.notify_one();
        }
    }

    /// Fan-out for a removed network: `Lost`, once, to subscribers that had
    /// the handle announced.
    pub fn notify_removed(&self, handle: NetHandle) {
        for entry in self.subs.iter() {
            let sub = entry.value();
            let mut st = sub.state.lock().unwrap();
            if st.closed || !st.seen.remove(&handle) {
                continue;
            }
            Self::push_locked(&mut st, NetEvent::Lost(handle), self);
            drop(st);
            sub.notify.notify_one();
        }
    }

    /// Fan-out for a network about to disappear.
    pub fn notify_losing(&self, handle: NetHandle, max_ms_to_live: u32) {
        for entry in self.subs.iter() {
            let sub = entry.value();
            let mut st = sub.state.lock().unwrap();
            if st.closed || !st.seen.contains(&handle) {
                continue;
            }
            Self::push_locked(
                &mut st,
                NetEvent::Losing {
                    handle,
                    max_ms_to_live,
                },
                self,
            );
            drop(st);
            sub.notify.notify_one();
        }
    }

    /// Events discarded because a subscriber queue was full. Diagnostic.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    /// Appends an event with drop-oldest overflow. The caller holds the
    /// subscriber's state lock, which is the FIFO serialization point.
    fn push_locked(st: &mut SubState, event: NetEvent, hub: &EventHub) {
        if st.events.len() >= hub.queue_capacity {
            let dropped = st.events.pop_front();
            hub.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("subscriber queue full, dropped oldest event {dropped:?}");
        }
        st.events.push_back(event);
    }

    fn arm_grace_timer(self: &Arc<Self>, sub: &Arc<Subscriber>, grace: Duration) {
        // Without a runtime (pure-sync callers) the grace period is
        // inert; unavailable signaling requires the async manager.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let hub = Arc::downgrade(self);
        let weak = Arc::downgrade(sub);
        let task = runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let (Some(hub), Some(sub)) = (hub.upgrade(), weak.upgrade()) else {
                return;
            };
            let mut st = sub.state.lock().unwrap();
            if st.closed || st.satisfied {
                return;
            }
            EventHub::push_locked(&mut st, NetEvent::Unavailable, &hub);
            drop(st);
            sub.notify.notify_one();
            tracing::debug!("subscription {} reported unavailable", sub.id);
        });
        *sub.grace_task.lock().unwrap() = Some(task);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a subscription.
///
/// Events arrive in registry-transition order for this subscriber. Dropping
/// the connection cancels the subscription.
pub struct NetConnection {
    id: SubscriptionId,
    hub: Arc<EventHub>,
    sub: Arc<Subscriber>,
}

impl NetConnection {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next pending event, or `None` once the subscription is cancelled and
    /// drained.
    pub fn try_recv(&self) -> Option<NetEvent> {
        self.sub.state.lock().unwrap().events.pop_front()
    }

    /// Waits for the next event. Returns `None` after cancellation once all
    /// pending events have been drained.
    pub async fn recv(&self) -> Option<NetEvent> {
        loop {
            {
                let mut st = self.sub.state.lock().unwrap();
                if let Some(event) = st.events.pop_front() {
                    return Some(event);
                }
                if st.closed {
                    return None;
                }
            }
            self.sub.notify.notified().await;
        }
    }

    /// Boundary adapter for callback-style consumers: drains this
    /// connection on a spawned task, invoking `callback` per event. The
    /// task ends when the subscription is cancelled.
    pub fn spawn_callback<F>(self, mut callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(NetEvent) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(event) = self.recv().await {
                callback(event);
            }
        })
    }
}

impl std::fmt::Debug for NetConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetConnection").field("id", &self.id).finish()
    }
}

impl Drop for NetConnection {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::NetworkRegistry;
    use crate::core::types::{
        ConnectionProperties, NetBearType, NetCap, NetCapabilities, NetworkRecord,
    };

    fn make_record(handle: NetHandle, caps: Vec<NetCap>) -> NetworkRecord {
        NetworkRecord {
            handle,
            capabilities: NetCapabilities::new(NetBearType::Wifi, caps),
            metered: false,
            blocked: false,
            score: 50,
            validated_seq: 0,
            properties: ConnectionProperties::default(),
        }
    }

    fn hub_and_registry() -> (Arc<EventHub>, NetworkRegistry) {
        (Arc::new(EventHub::new()), NetworkRegistry::new())
    }

    #[test]
    fn test_existing_match_announced_on_subscribe() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        registry.upsert(make_record(handle, vec![NetCap::Internet]));

        let conn = hub.subscribe(
            Some(NetSpecifier::require([NetCap::Internet])),
            &registry.snapshot(),
            Duration::ZERO,
        );
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(handle)));
        assert_eq!(conn.try_recv(), None);
    }

    #[test]
    fn test_lost_requires_prior_available() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        registry.upsert(make_record(handle, vec![NetCap::Mms]));

        // Specifier never matched this network.
        let conn = hub.subscribe(
            Some(NetSpecifier::require([NetCap::Internet])),
            &registry.snapshot(),
            Duration::ZERO,
        );
        assert_eq!(conn.try_recv(), None);

        hub.notify_losing(handle, 1000);
        hub.notify_removed(handle);
        assert_eq!(conn.try_recv(), None, "never-announced handle leaked a lost event");
    }

    #[test]
    fn test_lost_fires_exactly_once_per_transition() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        let record = make_record(handle, vec![NetCap::Internet]);
        registry.upsert(record.clone());

        let conn = hub.subscribe(
            Some(NetSpecifier::require([NetCap::Internet])),
            &registry.snapshot(),
            Duration::ZERO,
        );
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(handle)));

        hub.notify_removed(handle);
        hub.notify_removed(handle);
        assert_eq!(conn.try_recv(), Some(NetEvent::Lost(handle)));
        assert_eq!(conn.try_recv(), None, "duplicate lost for one removal");
    }

    #[test]
    fn test_stop_matching_delivers_lost_then_rematch_available() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        let record = make_record(handle, vec![NetCap::Internet]);
        let diff_caps = RegistryDiff {
            capabilities_changed: true,
            ..RegistryDiff::default()
        };
        registry.upsert(record.clone());

        let conn = hub.subscribe(
            Some(NetSpecifier::require([NetCap::Internet])),
            &registry.snapshot(),
            Duration::ZERO,
        );
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(handle)));

        // Capabilities drop Internet: subscriber loses the network.
        let degraded = make_record(handle, vec![NetCap::Mms]);
        hub.notify_record(&degraded, &diff_caps);
        assert_eq!(conn.try_recv(), Some(NetEvent::Lost(handle)));

        // Capabilities recover: announced again.
        hub.notify_record(&record, &diff_caps);
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(handle)));
        assert_eq!(conn.try_recv(), None);
    }

    #[test]
    fn test_wildcard_subscriber_sees_everything_in_order() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        let conn = hub.subscribe(None, &registry.snapshot(), Duration::ZERO);

        let mut record = make_record(handle, vec![NetCap::Internet]);
        hub.notify_record(
            &record,
            &RegistryDiff {
                added: true,
                ..RegistryDiff::default()
            },
        );
        record.blocked = true;
        hub.notify_record(
            &record,
            &RegistryDiff {
                blocked_changed: true,
                ..RegistryDiff::default()
            },
        );
        hub.notify_losing(handle, 500);
        hub.notify_removed(handle);

        assert_eq!(conn.try_recv(), Some(NetEvent::Available(handle)));
        assert_eq!(
            conn.try_recv(),
            Some(NetEvent::BlockedStatusChanged {
                handle,
                blocked: true
            })
        );
        assert_eq!(
            conn.try_recv(),
            Some(NetEvent::Losing {
                handle,
                max_ms_to_live: 500
            })
        );
        assert_eq!(conn.try_recv(), Some(NetEvent::Lost(handle)));
    }

    #[test]
    fn test_capability_and_property_change_events() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        let mut record = make_record(handle, vec![NetCap::Internet]);
        registry.upsert(record.clone());

        let conn = hub.subscribe(None, &registry.snapshot(), Duration::ZERO);
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(handle)));

        record.capabilities.link_down_kbps = 80_000;
        record.properties.interface_name = "wlan0".into();
        hub.notify_record(
            &record,
            &RegistryDiff {
                capabilities_changed: true,
                properties_changed: true,
                ..RegistryDiff::default()
            },
        );
        assert_eq!(
            conn.try_recv(),
            Some(NetEvent::CapabilitiesChanged {
                handle,
                capabilities: record.capabilities.clone()
            })
        );
        assert_eq!(
            conn.try_recv(),
            Some(NetEvent::PropertiesChanged {
                handle,
                properties: record.properties.clone()
            })
        );
    }

    #[test]
    fn test_slow_subscriber_drops_oldest_only() {
        let hub = Arc::new(EventHub::with_queue_capacity(3));
        let registry = NetworkRegistry::new();
        let conn = hub.subscribe(None, &registry.snapshot(), Duration::ZERO);

        let added = RegistryDiff {
            added: true,
            ..RegistryDiff::default()
        };
        let handles: Vec<NetHandle> = (1..=5).map(NetHandle).collect();
        for &handle in &handles {
            hub.notify_record(&make_record(handle, vec![NetCap::Internet]), &added);
        }

        // Capacity 3: the two oldest were dropped, newest three survive.
        assert_eq!(hub.dropped_events(), 2);
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(NetHandle(3))));
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(NetHandle(4))));
        assert_eq!(conn.try_recv(), Some(NetEvent::Available(NetHandle(5))));
        assert_eq!(conn.try_recv(), None);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_stops_delivery() {
        let (hub, registry) = hub_and_registry();
        let conn = hub.subscribe(None, &registry.snapshot(), Duration::ZERO);
        let id = conn.id();

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.notify_record(
            &make_record(NetHandle(9), vec![NetCap::Internet]),
            &RegistryDiff {
                added: true,
                ..RegistryDiff::default()
            },
        );
        assert_eq!(conn.try_recv(), None);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_cancels_subscription() {
        let (hub, registry) = hub_and_registry();
        let conn = hub.subscribe(None, &registry.snapshot(), Duration::ZERO);
        assert_eq!(hub.subscriber_count(), 1);
        drop(conn);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_fires_once_after_grace() {
        let (hub, registry) = hub_and_registry();
        let conn = hub.subscribe(
            Some(NetSpecifier::require([NetCap::Internet])),
            &registry.snapshot(),
            Duration::from_millis(20),
        );

        assert_eq!(conn.recv().await, Some(NetEvent::Unavailable));

        // Subscription stays registered: a later match still fires.
        let handle = NetHandle(1);
        hub.notify_record(
            &make_record(handle, vec![NetCap::Internet]),
            &RegistryDiff {
                added: true,
                ..RegistryDiff::default()
            },
        );
        assert_eq!(conn.recv().await, Some(NetEvent::Available(handle)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(conn.try_recv(), None, "unavailable fired more than once");
    }

    #[tokio::test]
    async fn test_match_before_grace_cancels_unavailable() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        registry.upsert(make_record(handle, vec![NetCap::Internet]));

        let conn = hub.subscribe(
            Some(NetSpecifier::require([NetCap::Internet])),
            &registry.snapshot(),
            Duration::from_millis(20),
        );
        assert_eq!(conn.recv().await, Some(NetEvent::Available(handle)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(conn.try_recv(), None, "unavailable fired despite a match");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hundred_concurrent_subscribers_each_get_one_available() {
        let (hub, registry) = hub_and_registry();
        let registry = Arc::new(registry);

        let mut joins = Vec::new();
        for _ in 0..100 {
            let hub = hub.clone();
            let registry = registry.clone();
            joins.push(tokio::spawn(async move {
                hub.subscribe(
                    Some(NetSpecifier::require([NetCap::Internet])),
                    &registry.snapshot(),
                    Duration::from_secs(5),
                )
            }));
        }
        let mut conns = Vec::new();
        for join in joins {
            conns.push(join.await.unwrap());
        }
        assert_eq!(hub.subscriber_count(), 100);

        let handle = registry.allocate_handle();
        let record = make_record(handle, vec![NetCap::Internet]);
        let diff = registry.upsert(record.clone());
        hub.notify_record(&record, &diff);

        for conn in &conns {
            assert_eq!(conn.recv().await, Some(NetEvent::Available(handle)));
            assert_eq!(conn.try_recv(), None, "subscriber saw a duplicate event");
        }
    }

    #[tokio::test]
    async fn test_callback_adapter_drains_events() {
        let (hub, registry) = hub_and_registry();
        let handle = registry.allocate_handle();
        registry.upsert(make_record(handle, vec![NetCap::Internet]));

        let conn = hub.subscribe(None, &registry.snapshot(), Duration::ZERO);
        let id = conn.id();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let task = conn.spawn_callback(move |event| {
            let _ = tx.send(event);
        });

        assert_eq!(rx.recv().await, Some(NetEvent::Available(handle)));
        hub.unsubscribe(id);
        task.await.unwrap();
    }
}
