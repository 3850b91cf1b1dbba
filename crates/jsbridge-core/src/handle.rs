//! Owning handle wrapper for Rust callers

use std::sync::Weak;

use tracing::trace;

use crate::error::BridgeResult;
use crate::proxy::{HandleId, HandleValue, ProxyInfo};
use crate::registry::{DisposedSessions, SessionId};
use crate::session::{EngineSession, SessionInner};
use crate::transitions::PendingTransition;
use crate::value_type::ValueType;

/// Holds one managed reference on a handle id.
///
/// Dropping the last `Handle` for an id disposes the proxy. Drops may happen
/// on any thread and after the session is gone; in that case nothing is
/// touched. A handle is tied to one use of its slot: once the proxy is
/// disposed some other way and the slot recycled, clones and drops leave the
/// new occupant alone.
pub struct Handle {
    session: Weak<SessionInner>,
    session_id: SessionId,
    claim: PendingTransition,
}

impl Handle {
    pub(crate) fn new(session: &EngineSession, id: HandleId) -> BridgeResult<Self> {
        let claim = session.claim(id)?;
        Ok(Self {
            session: session.downgrade(),
            session_id: session.id(),
            claim,
        })
    }

    pub fn id(&self) -> HandleId {
        self.claim.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The owning session, unless it was disposed
    pub fn session(&self) -> Option<EngineSession> {
        if DisposedSessions::global().is_disposed(self.session_id) {
            return None;
        }
        self.session.upgrade().map(EngineSession::from_inner)
    }

    pub fn info(&self) -> Option<ProxyInfo> {
        self.session()?.handle_info(self.claim.id)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.session()?.value_type(self.claim.id).ok()
    }

    pub fn value(&self) -> Option<HandleValue> {
        self.session()?.update_value(self.claim.id).ok()
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        if let Some(session) = self.session()
            && let Err(err) = session.claim_again(self.claim)
        {
            trace!(session = self.session_id, id = self.claim.id, %err, "clone of a stale handle");
        }
        Self {
            session: self.session.clone(),
            session_id: self.session_id,
            claim: self.claim,
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let Some(session) = self.session() else {
            trace!(session = self.session_id, id = self.claim.id, "handle dropped after session disposal");
            return;
        };
        session.release_claim(self.claim);
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("session", &self.session_id)
            .field("id", &self.claim.id)
            .field("epoch", &self.claim.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::DisposalState;

    #[test]
    fn test_last_drop_disposes() {
        let session = EngineSession::default();
        let id = session.create_string("owned").unwrap();
        let handle = session.wrap(id).unwrap();
        let copy = handle.clone();
        assert_eq!(session.handle_info(id).unwrap().managed_refs, 2);

        drop(handle);
        assert_eq!(session.handle_info(id).unwrap().state, DisposalState::InUse);
        drop(copy);
        assert_eq!(session.handle_info(id).unwrap().state, DisposalState::Cached);
    }

    #[test]
    fn test_drop_after_session_disposed() {
        let session = EngineSession::default();
        let handle = session.wrap(session.create_integer(3).unwrap()).unwrap();
        assert_eq!(handle.value(), Some(HandleValue::Int32(3)));
        session.shutdown();
        assert!(handle.session().is_none());
        assert!(handle.info().is_none());
        drop(handle);
    }

    #[test]
    fn test_drop_on_other_thread() {
        let session = EngineSession::default();
        let id = session.create_object(7).unwrap();
        let handle = session.wrap(id).unwrap();
        std::thread::spawn(move || drop(handle)).join().unwrap();
        assert_eq!(session.handle_info(id).unwrap().state, DisposalState::Cached);
        assert_eq!(session.stats().pending_releases, 1);
    }

    #[test]
    fn test_stale_handle_leaves_recycled_slot_alone() {
        let session = EngineSession::default();
        let id = session.create_object(30).unwrap();
        let handle = session.wrap(id).unwrap();
        let copy = handle.clone();
        drop(copy);

        assert!(session.mark_disposing(id));
        session.request_weak(id).unwrap();
        session.force_gc().unwrap();
        assert_eq!(session.handle_info(id).unwrap().state, DisposalState::Cached);

        let unrelated = session.create_string("unrelated").unwrap();
        assert_eq!(unrelated, id);

        let stale_copy = handle.clone();
        assert_eq!(session.handle_info(id).unwrap().managed_refs, 0);
        drop(stale_copy);
        drop(handle);
        let info = session.handle_info(id).unwrap();
        assert_eq!(info.state, DisposalState::InUse);
        assert_eq!(info.managed_refs, 0);
        assert_eq!(session.update_value(id).unwrap().as_text().as_deref(), Some("unrelated"));
    }

    #[test]
    fn test_stale_handle_after_explicit_dispose() {
        let session = EngineSession::default();
        let id = session.create_integer(5).unwrap();
        let handle = session.wrap(id).unwrap();
        session.release_managed_ref(id).unwrap();
        assert!(session.try_dispose(id));

        let replacement = session.create_integer(6).unwrap();
        assert_eq!(replacement, id);
        drop(handle);
        assert_eq!(session.handle_info(id).unwrap().state, DisposalState::InUse);
        assert_eq!(session.update_value(id).unwrap(), HandleValue::Int32(6));
    }
}
