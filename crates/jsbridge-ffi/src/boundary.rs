//! Session registry and the guard every export runs under
//!
//! Hosts refer to sessions by id. An id stays unusable once its session is
//! destroyed (or flagged in [`DisposedSessions`]), so late disposals from a
//! host finalizer find nothing and return their failure sentinel.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, error};

use jsbridge_core::{BridgeResult, DisposedSessions, EngineSession, HandleId, HandleValue};

use crate::types::FfiSession;

/// Returned instead of a session id on failure
pub const NO_SESSION: FfiSession = 0;
/// Returned instead of a handle (or template) id on failure
pub const NO_HANDLE: i32 = -1;
/// Returned instead of a managed object id on failure
pub const NO_OBJECT: i32 = -2;

pub(crate) struct SessionEntry {
    pub session: EngineSession,
    /// Last marshalled value per handle, backing `FfiValue::text`
    values: Mutex<FxHashMap<HandleId, HandleValue>>,
}

impl SessionEntry {
    /// Keep a text value alive for the host; other kinds need no storage
    pub fn retain(&self, id: HandleId, value: HandleValue) {
        let mut values = self.values.lock();
        match value {
            HandleValue::String(_) => {
                values.insert(id, value);
            }
            _ => {
                values.remove(&id);
            }
        }
    }

    pub fn forget(&self, id: HandleId) {
        self.values.lock().remove(&id);
    }
}

static SESSIONS: LazyLock<RwLock<FxHashMap<FfiSession, Arc<SessionEntry>>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

pub(crate) fn register(session: EngineSession) -> FfiSession {
    let id = session.id();
    let entry = Arc::new(SessionEntry {
        session,
        values: Mutex::new(FxHashMap::default()),
    });
    SESSIONS.write().insert(id, entry);
    id
}

pub(crate) fn unregister(id: FfiSession) -> Option<Arc<SessionEntry>> {
    SESSIONS.write().remove(&id)
}

/// The entry for a live session. The registry lock is released on return.
pub(crate) fn lookup(id: FfiSession) -> Option<Arc<SessionEntry>> {
    if DisposedSessions::global().is_disposed(id) {
        return None;
    }
    SESSIONS.read().get(&id).cloned()
}

/// Run an export body, turning a panic into `fallback`
pub(crate) fn guard<T>(export: &'static str, fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!(export, "panic caught at the ffi boundary");
            fallback
        }
    }
}

/// [`guard`] plus session lookup
pub(crate) fn with_session<T: Copy>(
    id: FfiSession,
    export: &'static str,
    fallback: T,
    f: impl FnOnce(&SessionEntry) -> T,
) -> T {
    guard(export, fallback, || match lookup(id) {
        Some(entry) => f(&entry),
        None => {
            debug!(export, session = id, "unknown or disposed session");
            fallback
        }
    })
}

/// Collapse a bridge result into its sentinel
pub(crate) trait OrSentinel<T> {
    fn or_sentinel(self, export: &'static str, fallback: T) -> T;
}

impl<T> OrSentinel<T> for BridgeResult<T> {
    fn or_sentinel(self, export: &'static str, fallback: T) -> T {
        self.unwrap_or_else(|err| {
            debug!(export, %err, "ffi call failed");
            fallback
        })
    }
}

/// Copy host UTF-16 into a `String`; `None` for a null pointer.
///
/// # Safety
///
/// `ptr` must be null or valid for `len` reads.
pub(crate) unsafe fn text(ptr: *const u16, len: usize) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees `len` readable code units behind `ptr`
    let units = unsafe { std::slice::from_raw_parts(ptr, len) };
    Some(String::from_utf16_lossy(units))
}

/// Borrow a host array of handle ids; empty for null.
///
/// # Safety
///
/// `ptr` must be null or valid for `count` reads for the lifetime `'a`.
pub(crate) unsafe fn ids<'a>(ptr: *const i32, count: usize) -> &'a [i32] {
    if ptr.is_null() || count == 0 {
        return &[];
    }
    // SAFETY: caller guarantees `count` readable ids behind `ptr`
    unsafe { std::slice::from_raw_parts(ptr, count) }
}

pub(crate) fn utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_catches_panic() {
        assert_eq!(guard("test", -1, || -> i32 { panic!("boom") }), -1);
        assert_eq!(guard("test", -1, || 4), 4);
    }

    #[test]
    fn test_text_conversion() {
        let units = utf16("héllo");
        assert_eq!(
            unsafe { text(units.as_ptr(), units.len()) }.as_deref(),
            Some("héllo")
        );
        assert_eq!(unsafe { text(std::ptr::null(), 3) }, None);
        assert!(unsafe { ids(std::ptr::null(), 2) }.is_empty());
    }

    #[test]
    fn test_unknown_session_lookup() {
        assert!(lookup(NO_SESSION).is_none());
        assert_eq!(with_session(NO_SESSION, "test", NO_HANDLE, |_| 5), NO_HANDLE);
    }
}
