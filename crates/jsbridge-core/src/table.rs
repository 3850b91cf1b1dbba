//! Slot allocator and recycler for handle proxies
//!
//! The table owns every [`HandleProxy`] of a session together with the
//! identity map and the string cache. It never talks to the engine: engine
//! handles that fall out of it are returned to the caller, which releases
//! them on the engine thread.

use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use jsbridge_engine::{CompiledScript, Persistent};

use crate::config::SessionConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::ObjectIdentityMap;
use crate::proxy::{
    DisposalState, HandleId, HandleProxy, HandleValue, NO_OBJECT_ID, ProxyInfo, Released,
};
use crate::string_cache::StringCache;
use crate::transitions::PendingTransition;
use crate::value_type::ValueType;

/// What the session learned about a value before taking the table lock
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Classification {
    pub value_type: ValueType,
    pub object_id: i32,
    pub type_descriptor: Option<i32>,
}

impl Classification {
    pub fn of(value_type: ValueType) -> Self {
        Self {
            value_type,
            object_id: NO_OBJECT_ID,
            type_descriptor: None,
        }
    }
}

/// Handle table counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandleStats {
    /// Slots ever created (live and cached)
    pub total_slots: usize,
    /// Cached slots waiting to be reused
    pub recycled: usize,
    pub in_use: usize,
    pub disposing: usize,
    pub weak: usize,
    pub pending_weak: usize,
    pub pending_strong: usize,
    pub identity_mappings: usize,
    /// Engine handles waiting for the engine thread
    pub pending_releases: usize,
    pub pooled_strings: usize,
}

#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<HandleProxy>,
    recycled: Vec<HandleId>,
    identity: ObjectIdentityMap,
    strings: StringCache,
    /// Proxies currently in `WeakFlagged`
    weak: usize,
}

impl HandleTable {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            slots: Vec::with_capacity(config.initial_handle_capacity),
            recycled: Vec::new(),
            identity: ObjectIdentityMap::with_capacity(config.initial_handle_capacity),
            strings: StringCache::with_capacity(config.initial_string_capacity),
            weak: 0,
        }
    }

    fn slot(id: HandleId) -> Option<usize> {
        usize::try_from(id).ok()
    }

    /// Proxy in slot `id`, whatever its state
    pub fn get(&self, id: HandleId) -> Option<&HandleProxy> {
        self.slots.get(Self::slot(id)?)
    }

    fn get_mut(&mut self, id: HandleId) -> Option<&mut HandleProxy> {
        let index = Self::slot(id)?;
        self.slots.get_mut(index)
    }

    /// Proxy in slot `id` if it currently wraps a value
    pub fn live(&self, id: HandleId) -> BridgeResult<&HandleProxy> {
        self.get(id)
            .filter(|proxy| proxy.is_live())
            .ok_or(BridgeError::InvalidHandle(id))
    }

    fn live_mut(&mut self, id: HandleId) -> BridgeResult<&mut HandleProxy> {
        self.get_mut(id)
            .filter(|proxy| proxy.is_live())
            .ok_or(BridgeError::InvalidHandle(id))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn has_recycled(&self) -> bool {
        !self.recycled.is_empty()
    }

    /// Proxies waiting on the engine's collector
    pub fn weak_count(&self) -> usize {
        self.weak
    }

    pub fn identity(&self) -> &ObjectIdentityMap {
        &self.identity
    }

    pub fn strings_mut(&mut self) -> &mut StringCache {
        &mut self.strings
    }

    /// Live proxy mapped to a managed object id
    pub fn proxy_for_object(&self, object_id: i32) -> Option<HandleId> {
        let id = self.identity.get(object_id)?;
        self.get(id).filter(|proxy| proxy.is_live()).map(|_| id)
    }

    /// Put a freshly created engine handle into a slot.
    ///
    /// Reuses the most recently disposed slot when there is one. Object
    /// values get their managed id installed (or an internal one assigned).
    pub(crate) fn install(
        &mut self,
        handle: Option<Persistent>,
        script: Option<Arc<CompiledScript>>,
        class: Classification,
    ) -> BridgeResult<HandleId> {
        let id = match self.recycled.pop() {
            Some(id) => {
                trace!(id, "reusing recycled slot");
                id
            }
            None => {
                let id = HandleId::try_from(self.slots.len())
                    .map_err(|_| BridgeError::internal("handle table is full"))?;
                self.slots.push(HandleProxy::new(id));
                id
            }
        };

        let proxy = self.get_mut(id).ok_or(BridgeError::InvalidHandle(id))?;
        proxy
            .initialize(handle, script, class.value_type)
            .map_err(|err| BridgeError::internal(err.to_string()))?;
        proxy.set_type_descriptor(class.type_descriptor);

        if class.value_type.is_object() {
            self.set_managed_id(id, class.object_id)?;
        }
        Ok(id)
    }

    /// Associate a proxy with a managed object id.
    ///
    /// `-1` asks for a fresh internal id (-2, -3, ...). Returns the id the
    /// proxy ends up with.
    pub fn set_managed_id(&mut self, id: HandleId, object_id: i32) -> BridgeResult<i32> {
        let previous = self.live(id)?.object_id();
        if previous >= 0 {
            self.identity.remove(previous, id);
        }

        let assigned = if object_id == NO_OBJECT_ID {
            self.identity.next_internal_id()
        } else {
            object_id
        };
        if let Some(evicted) = self.identity.insert(assigned, id) {
            if let Some(proxy) = self.get_mut(evicted) {
                proxy.set_object_id(NO_OBJECT_ID);
            }
            trace!(object_id = assigned, evicted, "identity mapping replaced");
        }
        self.live_mut(id)?.set_object_id(assigned);
        Ok(assigned)
    }

    pub fn add_ref(&mut self, id: HandleId) -> BridgeResult<u32> {
        Ok(self.live_mut(id)?.add_ref())
    }

    pub fn release_ref(&mut self, id: HandleId) -> BridgeResult<u32> {
        Ok(self.live_mut(id)?.release_ref())
    }

    fn pending_live_mut(&mut self, pending: PendingTransition) -> BridgeResult<&mut HandleProxy> {
        self.get_mut(pending.id)
            .filter(|proxy| proxy.is_live() && proxy.epoch() == pending.epoch)
            .ok_or(BridgeError::InvalidHandle(pending.id))
    }

    /// Take a managed reference on the use of the slot named by `pending`
    pub(crate) fn add_ref_pending(&mut self, pending: PendingTransition) -> BridgeResult<u32> {
        Ok(self.pending_live_mut(pending)?.add_ref())
    }

    /// Drop a managed reference, unless the slot was recycled since `pending` was taken
    pub(crate) fn release_ref_pending(&mut self, pending: PendingTransition) -> BridgeResult<u32> {
        Ok(self.pending_live_mut(pending)?.release_ref())
    }

    pub(crate) fn try_dispose_pending(&mut self, pending: PendingTransition) -> Option<Released> {
        self.pending_proxy(pending)?;
        self.try_dispose(pending.id)
    }

    /// Store a value snapshot, unless the slot was recycled since `pending` was taken
    pub(crate) fn set_value(
        &mut self,
        pending: PendingTransition,
        value: HandleValue,
    ) -> BridgeResult<()> {
        let index = Self::slot(pending.id)
            .filter(|&index| index < self.slots.len())
            .filter(|&index| self.slots[index].is_live() && self.slots[index].epoch() == pending.epoch)
            .ok_or(BridgeError::InvalidHandle(pending.id))?;
        self.slots[index].set_value(value, &mut self.strings);
        Ok(())
    }

    pub(crate) fn next_internal_id(&mut self) -> i32 {
        self.identity.next_internal_id()
    }

    /// Start disposal without releasing anything yet.
    ///
    /// Refused while the managed side holds more than one reference, and
    /// for type descriptors.
    pub(crate) fn mark_disposing(&mut self, id: HandleId) -> bool {
        let Some(proxy) = self.get_mut(id) else {
            return false;
        };
        if proxy.state() != DisposalState::InUse
            || proxy.managed_refs() >= 2
            || proxy.is_type_descriptor()
        {
            return false;
        }
        proxy.set_state(DisposalState::ManagedDisposing).is_ok()
    }

    /// Immediate disposal for values nobody else claims
    pub(crate) fn try_dispose(&mut self, id: HandleId) -> Option<Released> {
        if !self.mark_disposing(id) {
            return None;
        }
        self.dispose(id)
    }

    /// Clear a disposing proxy and recycle its slot.
    ///
    /// A no-op for proxies that are in use or already cached.
    pub(crate) fn dispose(&mut self, id: HandleId) -> Option<Released> {
        let index = Self::slot(id).filter(|&index| index < self.slots.len())?;
        let proxy = &mut self.slots[index];
        let state = proxy.state();
        if !state.is_disposing() {
            return None;
        }
        let object_id = proxy.object_id();
        let released = proxy.clear(&mut self.strings).ok()?;
        if object_id >= 0 {
            self.identity.remove(object_id, id);
        }
        if state == DisposalState::WeakFlagged {
            self.weak -= 1;
        }
        self.recycled.push(id);
        trace!(id, object_id, "slot recycled");
        Some(released)
    }

    fn pending_proxy(&self, pending: PendingTransition) -> Option<&HandleProxy> {
        self.get(pending.id)
            .filter(|proxy| proxy.epoch() == pending.epoch)
    }

    /// Request for the current use of slot `id`
    pub(crate) fn pending(&self, id: HandleId) -> BridgeResult<PendingTransition> {
        let proxy = self.live(id)?;
        Ok(PendingTransition {
            id,
            epoch: proxy.epoch(),
        })
    }

    /// Engine handle to make weak, if the proxy may become weak
    pub(crate) fn weak_candidate(&self, pending: PendingTransition) -> Option<Persistent> {
        self.pending_proxy(pending)
            .filter(|proxy| proxy.state() == DisposalState::ManagedDisposing)
            .filter(|proxy| proxy.object_id() >= 0)
            .and_then(|proxy| proxy.handle())
    }

    /// Engine handle to make strong, if the proxy is weak
    pub(crate) fn strong_candidate(&self, pending: PendingTransition) -> Option<Persistent> {
        self.pending_proxy(pending)
            .filter(|proxy| proxy.state() == DisposalState::WeakFlagged)
            .and_then(|proxy| proxy.handle())
    }

    /// Record a transition the engine already performed.
    ///
    /// Returns `false` when the slot moved on in the meantime.
    pub(crate) fn complete_transition(
        &mut self,
        pending: PendingTransition,
        to: DisposalState,
    ) -> bool {
        let Some(proxy) = self.get_mut(pending.id) else {
            return false;
        };
        if proxy.epoch() != pending.epoch {
            return false;
        }
        let from = proxy.state();
        if proxy.set_state(to).is_err() {
            return false;
        }
        if from == DisposalState::WeakFlagged {
            self.weak -= 1;
        }
        if to == DisposalState::WeakFlagged {
            self.weak += 1;
        }
        true
    }

    /// Dispose the use of the slot named by `pending`, if it is still current
    pub(crate) fn dispose_pending(&mut self, pending: PendingTransition) -> Option<Released> {
        self.pending_proxy(pending)?;
        self.dispose(pending.id)
    }

    /// Snapshot of a weak proxy named by an engine notice
    pub(crate) fn weak_notice(&self, pending: PendingTransition) -> Option<ProxyInfo> {
        self.pending_proxy(pending)
            .filter(|proxy| proxy.state() == DisposalState::WeakFlagged)
            .map(HandleProxy::info)
    }

    pub fn stats(&self) -> HandleStats {
        let mut stats = HandleStats {
            total_slots: self.slots.len(),
            recycled: self.recycled.len(),
            identity_mappings: self.identity.len(),
            pooled_strings: self.strings.pooled(),
            ..HandleStats::default()
        };
        for proxy in &self.slots {
            match proxy.state() {
                DisposalState::InUse => stats.in_use += 1,
                DisposalState::ManagedDisposing => stats.disposing += 1,
                DisposalState::WeakFlagged => stats.weak += 1,
                DisposalState::Cached => {}
            }
        }
        stats
    }

    /// Clear every proxy, returning the engine handles they held
    pub(crate) fn clear_all(&mut self) -> Vec<Persistent> {
        let mut handles = Vec::new();
        for proxy in &mut self.slots {
            if let Some(handle) = proxy.reset(&mut self.strings).persistent {
                handles.push(handle);
            }
        }
        self.recycled = self.slots.iter().map(HandleProxy::id).rev().collect();
        self.identity.clear();
        self.weak = 0;
        handles
    }
}
