//! Session lifecycle, scripts and collection

use std::sync::Arc;

use jsbridge_core::{EngineSession, ProxyInfo, SessionConfig};
use tracing::debug;

use crate::boundary::{self, NO_HANDLE, NO_SESSION, OrSentinel, guard, text, with_session};
use crate::types::{FfiHandleInfo, FfiSession, FfiSessionConfig, FfiStats, GcCallbackFn};

/// Write the default configuration into `out`.
///
/// # Safety
///
/// `out` must be null or point to writable memory for one `FfiSessionConfig`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_default_config(out: *mut FfiSessionConfig) -> bool {
    guard("jsbridge_default_config", false, || {
        // SAFETY: caller guarantees `out` is null or writable
        match unsafe { out.as_mut() } {
            Some(out) => {
                *out = FfiSessionConfig::from(&SessionConfig::default());
                true
            }
            None => false,
        }
    })
}

/// Create a session. `config` may be null for defaults. Returns `0` on failure.
///
/// # Safety
///
/// `config` must be null or point to a valid `FfiSessionConfig`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_session_create(config: *const FfiSessionConfig) -> FfiSession {
    guard("jsbridge_session_create", NO_SESSION, || {
        // SAFETY: caller guarantees `config` is null or valid
        let config = unsafe { config.as_ref() }
            .map(SessionConfig::from)
            .unwrap_or_default();
        boundary::register(EngineSession::new(config))
    })
}

/// Tear a session down. Every handle id it gave out becomes invalid.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_session_destroy(session: FfiSession) -> bool {
    guard("jsbridge_session_destroy", false, || match boundary::unregister(session) {
        Some(entry) => {
            entry.session.shutdown();
            debug!(session, "session destroyed through ffi");
            true
        }
        None => false,
    })
}

/// Compile without running. Returns a script handle or an error handle.
///
/// # Safety
///
/// `source` must be valid for `source_len` reads, and `name` null or valid
/// for `name_len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_compile(
    session: FfiSession,
    source: *const u16,
    source_len: usize,
    name: *const u16,
    name_len: usize,
) -> i32 {
    with_session(session, "jsbridge_compile", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantees
        let (Some(source), name) = (unsafe { text(source, source_len) }, unsafe { text(name, name_len) })
        else {
            return NO_HANDLE;
        };
        entry
            .session
            .compile(&source, name.as_deref().unwrap_or_default())
            .or_sentinel("jsbridge_compile", NO_HANDLE)
    })
}

/// Compile and run. Returns the result handle or an error handle.
///
/// # Safety
///
/// Same as [`jsbridge_compile`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_execute(
    session: FfiSession,
    source: *const u16,
    source_len: usize,
    name: *const u16,
    name_len: usize,
) -> i32 {
    with_session(session, "jsbridge_execute", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantees
        let (Some(source), name) = (unsafe { text(source, source_len) }, unsafe { text(name, name_len) })
        else {
            return NO_HANDLE;
        };
        entry
            .session
            .execute(&source, name.as_deref().unwrap_or_default())
            .or_sentinel("jsbridge_execute", NO_HANDLE)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_execute_compiled(session: FfiSession, script: i32) -> i32 {
    with_session(session, "jsbridge_execute_compiled", NO_HANDLE, |entry| {
        entry
            .session
            .execute_compiled(script)
            .or_sentinel("jsbridge_execute_compiled", NO_HANDLE)
    })
}

/// Ask running script to stop. Callable from any thread.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_terminate_execution(session: FfiSession) -> bool {
    with_session(session, "jsbridge_terminate_execution", false, |entry| {
        entry.session.terminate_execution();
        true
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_is_executing(session: FfiSession) -> bool {
    with_session(session, "jsbridge_is_executing", false, |entry| {
        entry.session.is_executing()
    })
}

/// `true` from a termination request until the running script unwinds
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_is_terminating(session: FfiSession) -> bool {
    with_session(session, "jsbridge_is_terminating", false, |entry| {
        entry.session.is_terminating()
    })
}

/// Install (or with null, remove) the callback consulted for weak proxies
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_register_gc_callback(
    session: FfiSession,
    callback: Option<GcCallbackFn>,
) -> bool {
    with_session(session, "jsbridge_register_gc_callback", false, |entry| {
        let callback = callback.map(|callback| {
            let gc: jsbridge_core::GcCallback = Arc::new(move |info: &ProxyInfo| {
                let info = FfiHandleInfo::from(info);
                callback(session, &info)
            });
            gc
        });
        entry.session.register_gc_callback(callback);
        true
    })
}

/// Full collection. `false` when refused (script running) or on failure.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_force_gc(session: FfiSession) -> bool {
    with_session(session, "jsbridge_force_gc", false, |entry| {
        entry
            .session
            .force_gc()
            .map(|stats| stats.is_some())
            .or_sentinel("jsbridge_force_gc", false)
    })
}

/// Idle-time collection. Returns how many proxies were disposed, `-1` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_idle_notification(session: FfiSession) -> i32 {
    with_session(session, "jsbridge_idle_notification", -1, |entry| {
        entry
            .session
            .idle_notification()
            .map(|disposed| i32::try_from(disposed).unwrap_or(i32::MAX))
            .or_sentinel("jsbridge_idle_notification", -1)
    })
}

/// Apply queued weak/strong requests now, if no script is running
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_drain_transitions(session: FfiSession) -> bool {
    with_session(session, "jsbridge_drain_transitions", false, |entry| {
        entry.session.drain_transitions();
        true
    })
}

/// # Safety
///
/// `out` must be null or point to writable memory for one `FfiStats`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_stats(session: FfiSession, out: *mut FfiStats) -> bool {
    with_session(session, "jsbridge_stats", false, |entry| {
        // SAFETY: caller guarantees `out` is null or writable
        let Some(out) = (unsafe { out.as_mut() }) else {
            return false;
        };
        *out = FfiStats::from(&entry.session.stats());
        true
    })
}
