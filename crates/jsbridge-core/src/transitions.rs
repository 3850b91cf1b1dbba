//! Deferred weak/strong transitions
//!
//! Requests that arrive while a script is executing (or while another thread
//! owns the engine) are parked here and applied at the next safe point. Each
//! list has its own mutex so a collector thread queueing a request never
//! waits on the handle table lock.

use parking_lot::Mutex;

use crate::proxy::HandleId;

/// A queued request for one proxy.
///
/// The epoch pins the request to one use of the slot: if the slot was
/// recycled in the meantime the request is dropped when drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransition {
    pub id: HandleId,
    pub epoch: u32,
}

impl PendingTransition {
    /// Token handed to the engine's weak notice machinery
    pub fn token(self) -> u64 {
        (u64::from(self.id as u32) << 32) | u64::from(self.epoch)
    }

    pub fn from_token(token: u64) -> Self {
        Self {
            id: (token >> 32) as u32 as HandleId,
            epoch: token as u32,
        }
    }
}

#[derive(Debug, Default)]
pub struct TransitionQueue {
    weak: Mutex<Vec<PendingTransition>>,
    strong: Mutex<Vec<PendingTransition>>,
}

impl TransitionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_weak(&self, pending: PendingTransition) {
        self.weak.lock().push(pending);
    }

    pub fn push_strong(&self, pending: PendingTransition) {
        self.strong.lock().push(pending);
    }

    /// Most recent weak request (LIFO)
    pub fn pop_weak(&self) -> Option<PendingTransition> {
        self.weak.lock().pop()
    }

    pub fn pop_strong(&self) -> Option<PendingTransition> {
        self.strong.lock().pop()
    }

    /// Withdraw a weak request that was never applied
    pub fn cancel_weak(&self, pending: PendingTransition) -> bool {
        let mut weak = self.weak.lock();
        let before = weak.len();
        weak.retain(|entry| *entry != pending);
        weak.len() != before
    }

    pub fn pending_weak(&self) -> usize {
        self.weak.lock().len()
    }

    pub fn pending_strong(&self) -> usize {
        self.strong.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_weak() == 0 && self.pending_strong() == 0
    }

    pub fn clear(&self) {
        self.weak.lock().clear();
        self.strong.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_packing() {
        let pending = PendingTransition { id: 12, epoch: 7 };
        let token = pending.token();
        assert_eq!(token, (12u64 << 32) | 7);
        assert_eq!(PendingTransition::from_token(token), pending);
    }

    #[test]
    fn test_lists_are_independent() {
        let queue = TransitionQueue::new();
        queue.push_weak(PendingTransition { id: 1, epoch: 1 });
        queue.push_weak(PendingTransition { id: 2, epoch: 1 });
        queue.push_strong(PendingTransition { id: 3, epoch: 4 });

        assert_eq!(queue.pending_weak(), 2);
        assert_eq!(queue.pending_strong(), 1);
        assert_eq!(queue.pop_weak().map(|p| p.id), Some(2));
        assert_eq!(queue.pop_strong().map(|p| p.id), Some(3));
        assert_eq!(queue.pop_strong(), None);
        assert!(!queue.is_empty());

        queue.push_weak(PendingTransition { id: 1, epoch: 1 });
        assert!(queue.cancel_weak(PendingTransition { id: 1, epoch: 1 }));
        assert!(!queue.cancel_weak(PendingTransition { id: 1, epoch: 2 }));

        queue.clear();
        assert!(queue.is_empty());
    }
}
