//! Handle proxies and their disposal state machine
//!
//! A [`HandleProxy`] is the native record behind one integer handle id given
//! to the managed side. Proxies live in the [`crate::table::HandleTable`] and
//! are recycled rather than freed: the id of a slot never changes, the value
//! inside it does.
//!
//! ```text
//!            try_dispose / mark_disposing
//!   InUse ───────────────────────────────► ManagedDisposing ◄──┐
//!     ▲                                      │        ▲        │ make strong
//!     │ resolve                   make weak  │        │        │ (or GC kept it)
//!     │                                      ▼        │        │
//!   Cached ◄──────── dispose ────────────  WeakFlagged ────────┘
//!          ◄──────── dispose ──── ManagedDisposing
//! ```

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use jsbridge_engine::{CompiledScript, Persistent};

use crate::string_cache::{NativeString, StringCache};
use crate::value_type::ValueType;

/// Integer id of a handle proxy, stable across recycling
pub type HandleId = i32;

/// Object id meaning "no managed object"
pub const NO_OBJECT_ID: i32 = -1;

/// Disposal state of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum DisposalState {
    InUse = 0,
    ManagedDisposing = 1,
    WeakFlagged = 2,
    Cached = 3,
}

/// A transition the state machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal disposal transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: DisposalState,
    pub to: DisposalState,
}

impl DisposalState {
    pub fn is_legal(self, to: DisposalState) -> bool {
        use DisposalState::*;
        matches!(
            (self, to),
            (InUse, ManagedDisposing)
                | (ManagedDisposing, WeakFlagged)
                | (WeakFlagged, ManagedDisposing)
                | (ManagedDisposing, Cached)
                | (WeakFlagged, Cached)
                | (Cached, InUse)
        )
    }

    pub fn transition(self, to: DisposalState) -> Result<DisposalState, IllegalTransition> {
        if self.is_legal(to) {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }

    /// Disposal has started (managed side gave it up or it is weak)
    pub fn is_disposing(self) -> bool {
        matches!(self, DisposalState::ManagedDisposing | DisposalState::WeakFlagged)
    }
}

/// Snapshot of a proxy's value, as marshalled to the managed side
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HandleValue {
    #[default]
    None,
    Bool(bool),
    Int32(i32),
    Number(f64),
    String(NativeString),
}

impl HandleValue {
    pub fn as_text(&self) -> Option<String> {
        match self {
            HandleValue::String(text) => Some(text.to_string_lossy()),
            _ => None,
        }
    }
}

/// Read-only view of a proxy, handed to GC callbacks and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyInfo {
    pub id: HandleId,
    pub object_id: i32,
    pub value_type: ValueType,
    pub state: DisposalState,
    pub managed_refs: u32,
    pub type_descriptor: Option<i32>,
}

impl ProxyInfo {
    pub fn is_weak(&self) -> bool {
        self.state == DisposalState::WeakFlagged
    }
}

/// What the proxy holds alive in the engine
pub(crate) struct Released {
    pub persistent: Option<Persistent>,
}

/// Native record behind a handle id
pub struct HandleProxy {
    id: HandleId,
    object_id: i32,
    value_type: ValueType,
    state: DisposalState,
    managed_refs: u32,
    type_descriptor: Option<i32>,
    /// Bumped on every re-initialization; tells stale queue entries apart
    epoch: u32,
    handle: Option<Persistent>,
    script: Option<Arc<CompiledScript>>,
    value: HandleValue,
}

impl HandleProxy {
    pub(crate) fn new(id: HandleId) -> Self {
        Self {
            id,
            object_id: NO_OBJECT_ID,
            value_type: ValueType::Uninitialized,
            state: DisposalState::Cached,
            managed_refs: 0,
            type_descriptor: None,
            epoch: 0,
            handle: None,
            script: None,
            value: HandleValue::None,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn object_id(&self) -> i32 {
        self.object_id
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn state(&self) -> DisposalState {
        self.state
    }

    pub fn managed_refs(&self) -> u32 {
        self.managed_refs
    }

    pub fn type_descriptor(&self) -> Option<i32> {
        self.type_descriptor
    }

    pub fn value(&self) -> &HandleValue {
        &self.value
    }

    pub(crate) fn epoch(&self) -> u32 {
        self.epoch
    }

    pub(crate) fn handle(&self) -> Option<Persistent> {
        self.handle
    }

    pub(crate) fn script(&self) -> Option<&Arc<CompiledScript>> {
        self.script.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.state != DisposalState::Cached
    }

    /// Type descriptor proxies stay alive for the whole session
    pub fn is_type_descriptor(&self) -> bool {
        self.type_descriptor.is_some()
    }

    pub fn info(&self) -> ProxyInfo {
        ProxyInfo {
            id: self.id,
            object_id: self.object_id,
            value_type: self.value_type,
            state: self.state,
            managed_refs: self.managed_refs,
            type_descriptor: self.type_descriptor,
        }
    }

    /// Move to `to`, refusing transitions the state machine does not allow
    pub(crate) fn set_state(&mut self, to: DisposalState) -> Result<(), IllegalTransition> {
        self.state = self.state.transition(to)?;
        Ok(())
    }

    /// Bring a cached slot back into use with a fresh engine value
    pub(crate) fn initialize(
        &mut self,
        handle: Option<Persistent>,
        script: Option<Arc<CompiledScript>>,
        value_type: ValueType,
    ) -> Result<(), IllegalTransition> {
        self.set_state(DisposalState::InUse)?;
        self.epoch = self.epoch.wrapping_add(1);
        self.handle = handle;
        self.script = script;
        self.value_type = value_type;
        self.object_id = NO_OBJECT_ID;
        self.type_descriptor = None;
        self.managed_refs = 0;
        Ok(())
    }

    pub(crate) fn set_object_id(&mut self, object_id: i32) {
        self.object_id = object_id;
    }

    pub(crate) fn set_type_descriptor(&mut self, descriptor: Option<i32>) {
        self.type_descriptor = descriptor;
    }

    pub(crate) fn set_value(&mut self, value: HandleValue, strings: &mut StringCache) {
        if let HandleValue::String(old) = std::mem::replace(&mut self.value, value) {
            strings.recycle(old);
        }
    }

    pub(crate) fn add_ref(&mut self) -> u32 {
        self.managed_refs = self.managed_refs.saturating_add(1);
        self.managed_refs
    }

    pub(crate) fn release_ref(&mut self) -> u32 {
        self.managed_refs = self.managed_refs.saturating_sub(1);
        self.managed_refs
    }

    /// Drop everything the proxy holds and park it as `Cached`.
    ///
    /// Only legal from a disposing state; the caller owns the returned engine
    /// handle and must release it on the engine thread.
    pub(crate) fn clear(&mut self, strings: &mut StringCache) -> Result<Released, IllegalTransition> {
        self.set_state(DisposalState::Cached)?;
        Ok(self.reset(strings))
    }

    /// Unconditional clear, used when the owning session is torn down
    pub(crate) fn reset(&mut self, strings: &mut StringCache) -> Released {
        self.state = DisposalState::Cached;
        self.epoch = self.epoch.wrapping_add(1);
        self.object_id = NO_OBJECT_ID;
        self.value_type = ValueType::Uninitialized;
        self.type_descriptor = None;
        self.managed_refs = 0;
        self.script = None;
        self.set_value(HandleValue::None, strings);
        Released {
            persistent: self.handle.take(),
        }
    }
}

impl std::fmt::Debug for HandleProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleProxy")
            .field("id", &self.id)
            .field("object_id", &self.object_id)
            .field("value_type", &self.value_type)
            .field("state", &self.state)
            .field("managed_refs", &self.managed_refs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use DisposalState::*;
        assert!(InUse.is_legal(ManagedDisposing));
        assert!(ManagedDisposing.is_legal(WeakFlagged));
        assert!(WeakFlagged.is_legal(ManagedDisposing));
        assert!(WeakFlagged.is_legal(Cached));
        assert!(Cached.is_legal(InUse));

        assert!(!InUse.is_legal(Cached));
        assert!(!InUse.is_legal(WeakFlagged));
        assert!(!Cached.is_legal(Cached));
        assert!(!Cached.is_legal(ManagedDisposing));
    }

    #[test]
    fn test_illegal_transition_reports_states() {
        let err = DisposalState::InUse
            .transition(DisposalState::WeakFlagged)
            .unwrap_err();
        assert_eq!(err.from, DisposalState::InUse);
        assert_eq!(err.to, DisposalState::WeakFlagged);
        assert_eq!(
            err.to_string(),
            "illegal disposal transition InUse -> WeakFlagged"
        );
    }

    #[test]
    fn test_clear_requires_disposing_state() {
        let mut strings = StringCache::default();
        let mut proxy = HandleProxy::new(0);
        assert!(proxy.clear(&mut strings).is_err());
        assert_eq!(proxy.state(), DisposalState::Cached);
    }

    #[test]
    fn test_reset_recycles_string() {
        let mut strings = StringCache::default();
        let mut proxy = HandleProxy::new(3);
        let text = strings.encode("value");
        proxy.set_value(HandleValue::String(text), &mut strings);
        assert_eq!(proxy.value().as_text().as_deref(), Some("value"));

        let released = proxy.reset(&mut strings);
        assert!(released.persistent.is_none());
        assert_eq!(strings.pooled(), 1);
        assert_eq!(proxy.value(), &HandleValue::None);
        assert_eq!(proxy.id(), 3);
    }

    #[test]
    fn test_refs_saturate() {
        let mut proxy = HandleProxy::new(0);
        assert_eq!(proxy.release_ref(), 0);
        assert_eq!(proxy.add_ref(), 1);
        assert_eq!(proxy.add_ref(), 2);
        assert_eq!(proxy.release_ref(), 1);
    }
}
