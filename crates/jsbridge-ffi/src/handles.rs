//! Handle lifetime exports
//!
//! All of these are safe to call from a host finalizer thread, including
//! after the session is gone: an unknown session short-circuits before any
//! engine access.

use jsbridge_core::TransitionOutcome;

use crate::boundary::{NO_HANDLE, NO_OBJECT, OrSentinel, with_session};
use crate::types::{FfiHandleInfo, FfiSession};

/// [`TransitionOutcome`] as returned by the weak/strong exports
fn outcome(outcome: TransitionOutcome) -> i32 {
    match outcome {
        TransitionOutcome::Applied => 0,
        TransitionOutcome::Queued => 1,
        TransitionOutcome::Ignored => 2,
    }
}

/// Dispose a handle nobody else holds. `false` if refused or unknown.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_try_dispose(session: FfiSession, id: i32) -> bool {
    with_session(session, "jsbridge_try_dispose", false, |entry| {
        entry.forget(id);
        entry.session.try_dispose(id)
    })
}

/// Finish disposal of a handle already marked disposing (or weak)
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_dispose(session: FfiSession, id: i32) -> bool {
    with_session(session, "jsbridge_dispose", false, |entry| {
        entry.forget(id);
        entry.session.dispose(id)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_mark_disposing(session: FfiSession, id: i32) -> bool {
    with_session(session, "jsbridge_mark_disposing", false, |entry| {
        entry.session.mark_disposing(id)
    })
}

/// `0` applied, `1` queued, `2` ignored, `-1` on failure
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_make_weak(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_make_weak", -1, |entry| {
        entry
            .session
            .request_weak(id)
            .map(outcome)
            .or_sentinel("jsbridge_make_weak", -1)
    })
}

/// `0` applied, `1` queued, `2` ignored, `-1` on failure
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_make_strong(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_make_strong", -1, |entry| {
        entry
            .session
            .request_strong(id)
            .map(outcome)
            .or_sentinel("jsbridge_make_strong", -1)
    })
}

/// Managed object id of a handle (`-1` for none), `-2` on failure
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_managed_object_id(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_managed_object_id", NO_OBJECT, |entry| {
        entry
            .session
            .managed_object_id(id)
            .or_sentinel("jsbridge_managed_object_id", NO_OBJECT)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_set_managed_object_id(session: FfiSession, id: i32, object_id: i32) -> i32 {
    with_session(session, "jsbridge_set_managed_object_id", NO_OBJECT, |entry| {
        entry
            .session
            .set_managed_object_id(id, object_id)
            .or_sentinel("jsbridge_set_managed_object_id", NO_OBJECT)
    })
}

/// New reference count, or `-1`
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_add_managed_ref(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_add_managed_ref", NO_HANDLE, |entry| {
        entry
            .session
            .add_managed_ref(id)
            .map(|count| i32::try_from(count).unwrap_or(i32::MAX))
            .or_sentinel("jsbridge_add_managed_ref", NO_HANDLE)
    })
}

/// Remaining reference count, or `-1`
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_release_managed_ref(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_release_managed_ref", NO_HANDLE, |entry| {
        entry
            .session
            .release_managed_ref(id)
            .map(|count| i32::try_from(count).unwrap_or(i32::MAX))
            .or_sentinel("jsbridge_release_managed_ref", NO_HANDLE)
    })
}

/// # Safety
///
/// `out` must be null or point to writable memory for one `FfiHandleInfo`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_handle_info(session: FfiSession, id: i32, out: *mut FfiHandleInfo) -> bool {
    with_session(session, "jsbridge_handle_info", false, |entry| {
        // SAFETY: caller guarantees `out` is null or writable
        let (Some(out), Some(info)) = (unsafe { out.as_mut() }, entry.session.handle_info(id)) else {
            return false;
        };
        *out = FfiHandleInfo::from(&info);
        true
    })
}
