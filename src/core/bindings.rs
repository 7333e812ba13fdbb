//! Per-process and per-socket network bindings.
//!
//! A process binding overrides default routing for every socket the process
//! creates afterwards; a socket binding overrides both for one socket. All
//! writes happen under the manager's exclusive section, so a network removal
//! can purge its bindings atomically; reads are lock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::core::types::NetHandle;
use crate::error::NetError;

/// process → bound network. Absence means the system default network.
pub struct ProcessBindingTable {
    bindings: DashMap<u32, NetHandle>,
}

impl ProcessBindingTable {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Binds `pid` to `handle`, replacing any previous binding. Handle
    /// validity is the caller's responsibility (checked under the manager's
    /// write section against the registry).
    pub fn bind(&self, pid: u32, handle: NetHandle) {
        self.bindings.insert(pid, handle);
    }

    /// Removes the binding for `pid`. Idempotent: clearing an absent binding
    /// is not an error.
    pub fn clear(&self, pid: u32) -> bool {
        self.bindings.remove(&pid).is_some()
    }

    pub fn get(&self, pid: u32) -> Option<NetHandle> {
        self.bindings.get(&pid).map(|entry| *entry.value())
    }

    /// Drops every binding that references `handle` and returns the affected
    /// pids. Called while the network's removal is still inside the
    /// exclusive section, so affected processes revert to default-network
    /// behavior before `remove` returns.
    pub fn purge_handle(&self, handle: NetHandle) -> Vec<u32> {
        let affected: Vec<u32> = self
            .bindings
            .iter()
            .filter(|entry| *entry.value() == handle)
            .map(|entry| *entry.key())
            .collect();
        for pid in &affected {
            self.bindings.remove(pid);
        }
        affected
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for ProcessBindingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Fresh,
    Bound(NetHandle),
    Connected(Option<NetHandle>),
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// A transport socket as seen by the control plane: a token plus a binding
/// state machine (`Fresh → Bound → Connected`).
///
/// Network binding must happen before connect; once `mark_connected` has
/// run, `bind` fails with `AlreadyConnected`. A cancelled connect rolls the
/// socket back with `release_binding`, leaving no partial state behind.
#[derive(Debug)]
pub struct NetSocket {
    id: u64,
    state: Mutex<SocketState>,
}

impl NetSocket {
    pub fn new() -> Self {
        Self {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(SocketState::Fresh),
        }
    }

    /// Token identifying this socket at the transport boundary.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Associates this socket with a network, bypassing any process-level
    /// binding. Rebinding before connect replaces the previous binding.
    pub fn bind(&self, handle: NetHandle) -> Result<(), NetError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            SocketState::Connected(_) => Err(NetError::AlreadyConnected(format!(
                "socket {} already completed connect",
                self.id
            ))),
            _ => {
                *state = SocketState::Bound(handle);
                Ok(())
            }
        }
    }

    /// Records connect completion. The binding (if any) is frozen: later
    /// process-level unbinding never retroactively affects this socket.
    pub fn mark_connected(&self) -> Result<(), NetError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            SocketState::Connected(_) => Err(NetError::AlreadyConnected(format!(
                "socket {} already connected",
                self.id
            ))),
            SocketState::Fresh => {
                *state = SocketState::Connected(None);
                Ok(())
            }
            SocketState::Bound(handle) => {
                *state = SocketState::Connected(Some(handle));
                Ok(())
            }
        }
    }

    /// Rolls a not-yet-connected socket back to unbound. Used when a connect
    /// is cancelled or times out after the binding was acquired.
    pub fn release_binding(&self) {
        let mut state = self.state.lock().unwrap();
        if let SocketState::Bound(_) = *state {
            *state = SocketState::Fresh;
        }
    }

    /// The network this socket is pinned to, if any.
    pub fn bound_net(&self) -> Option<NetHandle> {
        match *self.state.lock().unwrap() {
            SocketState::Bound(handle) => Some(handle),
            SocketState::Connected(handle) => handle,
            SocketState::Fresh => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock().unwrap(), SocketState::Connected(_))
    }
}

impl Default for NetSocket {
    fn default() -> Self {
        Self::new()
    }
}
