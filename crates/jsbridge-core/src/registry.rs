//! Process-wide session liveness registry
//!
//! Managed finalizers may run on a collector thread long after the session
//! that created a handle went away. They consult this registry first and, if
//! the session is gone, only free memory.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::debug;

/// Process-unique id of an [`crate::EngineSession`]
pub type SessionId = u32;

static REGISTRY: LazyLock<DisposedSessions> = LazyLock::new(DisposedSessions::new);
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// Thread-safe session liveness registry.
///
/// Only live sessions are tracked; teardown removes the entry, so the set
/// stays as large as the number of sessions alive at once.
#[derive(Debug, Default)]
pub struct DisposedSessions {
    live: RwLock<FxHashSet<SessionId>>,
}

impl DisposedSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static DisposedSessions {
        &REGISTRY
    }

    /// Allocate a fresh session id (never reused within the process)
    pub fn next_id() -> SessionId {
        NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Record `id` as live
    pub fn register(&self, id: SessionId) {
        self.live.write().insert(id);
        debug!(session = id, "session registered");
    }

    /// Forget `id`. From then on it reads as disposed.
    pub fn unregister(&self, id: SessionId) {
        if self.live.write().remove(&id) {
            debug!(session = id, "session unregistered");
        }
    }

    /// `true` unless `id` is registered.
    ///
    /// Unknown ids count as disposed: nothing may touch an engine the
    /// registry cannot vouch for.
    pub fn is_disposed(&self, id: SessionId) -> bool {
        !self.live.read().contains(&id)
    }

    /// Sessions currently tracked
    pub fn live_count(&self) -> usize {
        self.live.read().len()
    }
}
