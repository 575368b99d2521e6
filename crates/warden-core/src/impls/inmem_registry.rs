//! InMemoryRegistry - in-process membership service.
//!
//! Models an ephemeral-node registry:
//! - a registration lives until `unregister`, `evict`, or (with a session
//!   TTL) until it goes unrenewed for longer than the TTL;
//! - expired sessions are reaped lazily, on the next call from any member;
//! - locks are released when their holder's session ends;
//! - `set_available(false)` makes every call fail, simulating a partition.
//!
//! Listeners are invoked synchronously, after the internal lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{CoordinationError, HostId};
use crate::ports::{MembershipEvent, MembershipListener, Registry, SubscriptionId};

type SharedListener = Arc<dyn Fn(MembershipEvent) + Send + Sync>;

struct RegistryState {
    members: HashMap<HostId, Instant>,
    locks: HashMap<String, HostId>,
    available: bool,
    next_subscription: u64,
    listeners: Vec<(SubscriptionId, SharedListener)>,
}

impl RegistryState {
    /// Drop `host` and every lock it holds. Returns whether it was a member.
    fn remove_member(&mut self, host: &HostId) -> bool {
        self.locks.retain(|_, holder| holder != host);
        self.members.remove(host).is_some()
    }

    fn expire_sessions(&mut self, ttl: Option<Duration>) -> Vec<HostId> {
        let Some(ttl) = ttl else {
            return Vec::new();
        };
        let now = Instant::now();
        let expired: Vec<HostId> = self
            .members
            .iter()
            .filter(|(_, renewed)| now.duration_since(**renewed) > ttl)
            .map(|(host, _)| host.clone())
            .collect();
        for host in &expired {
            self.remove_member(host);
        }
        expired
    }
}

#[derive(Clone)]
pub struct InMemoryRegistry {
    state: Arc<Mutex<RegistryState>>,
    session_ttl: Option<Duration>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    /// Registry whose sessions never expire on their own.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                members: HashMap::new(),
                locks: HashMap::new(),
                available: true,
                next_subscription: 0,
                listeners: Vec::new(),
            })),
            session_ttl: None,
        }
    }

    /// Registry whose sessions expire when not renewed within `ttl`.
    pub fn with_session_ttl(ttl: Duration) -> Self {
        Self {
            session_ttl: Some(ttl),
            ..Self::new()
        }
    }

    /// Terminate `host`'s session as if the process had crashed.
    pub fn evict(&self, host: &HostId) {
        let removed = {
            let mut state = self.lock();
            state.remove_member(host)
        };
        if removed {
            debug!(host = %host, "registry: session evicted");
            self.notify(vec![MembershipEvent::MemberRemoved(host.clone())]);
        }
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Current holder of lock `name`.
    pub fn lock_holder(&self, name: &str) -> Option<HostId> {
        self.lock().locks.get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reap expired sessions and check availability, then run `op`.
    /// Events produced by the reap and by `op` are delivered afterwards.
    fn with_state<R>(
        &self,
        op: impl FnOnce(&mut RegistryState, &mut Vec<MembershipEvent>) -> Result<R, CoordinationError>,
    ) -> Result<R, CoordinationError> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            if !state.available {
                return Err(CoordinationError::Unreachable(
                    "registry unavailable".to_string(),
                ));
            }
            for host in state.expire_sessions(self.session_ttl) {
                debug!(host = %host, "registry: session expired");
                events.push(MembershipEvent::MemberRemoved(host));
            }
            op(&mut state, &mut events)
        };
        self.notify(events);
        result
    }

    fn notify(&self, events: Vec<MembershipEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<SharedListener> = self
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for event in events {
            for listener in &listeners {
                listener(event.clone());
            }
        }
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn register(&self, host: &HostId) -> Result<(), CoordinationError> {
        self.with_state(|state, events| {
            let fresh = state.members.insert(host.clone(), Instant::now()).is_none();
            if fresh {
                events.push(MembershipEvent::MemberAdded(host.clone()));
            }
            Ok(())
        })
    }

    async fn unregister(&self, host: &HostId) -> Result<(), CoordinationError> {
        self.with_state(|state, events| {
            if state.remove_member(host) {
                events.push(MembershipEvent::MemberRemoved(host.clone()));
            }
            Ok(())
        })
    }

    async fn renew(&self, host: &HostId) -> Result<(), CoordinationError> {
        self.with_state(|state, _| match state.members.get_mut(host) {
            Some(renewed) => {
                *renewed = Instant::now();
                Ok(())
            }
            None => Err(CoordinationError::NotRegistered(host.clone())),
        })
    }

    async fn list_members(&self) -> Result<HashSet<HostId>, CoordinationError> {
        self.with_state(|state, _| Ok(state.members.keys().cloned().collect()))
    }

    fn subscribe(&self, listener: MembershipListener) -> SubscriptionId {
        let mut state = self.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.listeners.push((id, Arc::from(listener)));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().listeners.retain(|(sid, _)| *sid != id);
    }

    async fn try_lock(&self, name: &str, owner: &HostId) -> Result<bool, CoordinationError> {
        self.with_state(|state, _| {
            if !state.members.contains_key(owner) {
                return Err(CoordinationError::NotRegistered(owner.clone()));
            }
            match state.locks.get(name) {
                Some(holder) => Ok(holder == owner),
                None => {
                    state.locks.insert(name.to_string(), owner.clone());
                    Ok(true)
                }
            }
        })
    }

    async fn unlock(&self, name: &str, owner: &HostId) -> Result<(), CoordinationError> {
        self.with_state(|state, _| match state.locks.get(name) {
            Some(holder) if holder == owner => {
                state.locks.remove(name);
                Ok(())
            }
            _ => Err(CoordinationError::LockNotHeld(name.to_string())),
        })
    }
}
