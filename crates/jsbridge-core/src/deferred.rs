//! Deferred release of engine handles
//!
//! Disposal can be requested from any thread, but persistent handles may
//! only be reset by whoever holds the engine lock. Disposal paths therefore
//! queue the handle here; the queue is emptied every time an
//! [`crate::lock::EngineLock`] is taken.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use jsbridge_engine::{Isolate, Persistent};

pub struct DeferredReleases {
    queue: Mutex<Vec<Persistent>>,
    /// Lock-free check for the hot path
    pending: AtomicUsize,
}

impl Default for DeferredReleases {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredReleases {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::with_capacity(8)),
            pending: AtomicUsize::new(0),
        }
    }

    /// Queue a handle for release. Safe from any thread.
    pub fn defer(&self, handle: Persistent) {
        self.queue.lock().push(handle);
        let pending = self.pending.fetch_add(1, Ordering::Release) + 1;
        trace!(pending, "engine handle release deferred");
    }

    pub fn defer_all(&self, handles: impl IntoIterator<Item = Persistent>) {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.extend(handles);
        self.pending
            .fetch_add(queue.len() - before, Ordering::Release);
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Reset every queued handle. Caller must hold the engine lock.
    pub fn process_all(&self, isolate: &Isolate) -> usize {
        if !self.has_pending() {
            return 0;
        }
        let handles = std::mem::take(&mut *self.queue.lock());
        let count = handles.len();
        for handle in handles {
            isolate.reset_persistent(handle);
        }
        self.pending.fetch_sub(count, Ordering::Release);
        if count > 0 {
            trace!(count, "processed deferred handle releases");
        }
        count
    }
}

impl std::fmt::Debug for DeferredReleases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReleases")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsbridge_engine::Value;

    #[test]
    fn test_queue_creation() {
        let queue = DeferredReleases::new();
        assert!(!queue.has_pending());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_process_resets_handles() {
        let isolate = Isolate::new();
        let queue = DeferredReleases::new();
        let a = isolate.new_persistent(Value::Int32(1));
        let b = isolate.new_persistent(Value::Int32(2));

        queue.defer(a);
        queue.defer_all([b]);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.process_all(&isolate), 2);
        assert!(!queue.has_pending());
        assert_eq!(isolate.persistent_value(a), None);
        assert_eq!(isolate.persistent_value(b), None);
    }

    #[test]
    fn test_cross_thread_defer() {
        let isolate = Isolate::new();
        let queue = std::sync::Arc::new(DeferredReleases::new());
        let handle = isolate.new_persistent(Value::Bool(true));

        let remote = queue.clone();
        std::thread::spawn(move || remote.defer(handle))
            .join()
            .unwrap();

        assert!(queue.has_pending());
        queue.process_all(&isolate);
        assert_eq!(isolate.persistent_value(handle), None);
    }
}
