//! Engine lock guard
//!
//! Every engine access goes through an [`EngineLock`]. Taking one flushes
//! the engine handles that disposal paths queued while they could not touch
//! the engine.

use std::ops::Deref;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use jsbridge_engine::Isolate;

use crate::deferred::DeferredReleases;

/// RAII access to a session's isolate.
///
/// Reentrant: a native callback running inside a script may take the lock
/// again on the same thread.
pub struct EngineLock<'a> {
    guard: ReentrantMutexGuard<'a, Isolate>,
}

impl<'a> EngineLock<'a> {
    pub(crate) fn acquire(isolate: &'a ReentrantMutex<Isolate>, releases: &DeferredReleases) -> Self {
        Self::flushed(isolate.lock(), releases)
    }

    /// Like [`EngineLock::acquire`] but gives up if another thread holds the engine
    pub(crate) fn try_acquire(
        isolate: &'a ReentrantMutex<Isolate>,
        releases: &DeferredReleases,
    ) -> Option<Self> {
        isolate
            .try_lock()
            .map(|guard| Self::flushed(guard, releases))
    }

    fn flushed(guard: ReentrantMutexGuard<'a, Isolate>, releases: &DeferredReleases) -> Self {
        releases.process_all(&guard);
        Self { guard }
    }
}

impl Deref for EngineLock<'_> {
    type Target = Isolate;

    fn deref(&self) -> &Isolate {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsbridge_engine::Value;

    #[test]
    fn test_acquire_flushes_releases() {
        let isolate = ReentrantMutex::new(Isolate::new());
        let releases = DeferredReleases::new();
        let handle = isolate.lock().new_persistent(Value::Int32(1));
        releases.defer(handle);

        let engine = EngineLock::acquire(&isolate, &releases);
        assert!(!releases.has_pending());
        assert_eq!(engine.persistent_value(handle), None);
    }

    #[test]
    fn test_reentrant_on_same_thread() {
        let isolate = ReentrantMutex::new(Isolate::new());
        let releases = DeferredReleases::new();
        let outer = EngineLock::acquire(&isolate, &releases);
        let inner = EngineLock::try_acquire(&isolate, &releases);
        assert!(inner.is_some());
        drop(inner);
        drop(outer);
    }

    #[test]
    fn test_try_acquire_fails_across_threads() {
        let isolate = std::sync::Arc::new(ReentrantMutex::new(Isolate::new()));
        let releases = std::sync::Arc::new(DeferredReleases::new());
        let _held = EngineLock::acquire(&isolate, &releases);

        let (isolate2, releases2) = (isolate.clone(), releases.clone());
        let acquired = std::thread::spawn(move || {
            EngineLock::try_acquire(&isolate2, &releases2).is_some()
        })
        .join()
        .unwrap();
        assert!(!acquired);
    }
}
