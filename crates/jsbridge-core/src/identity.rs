//! Managed object id → handle proxy map
//!
//! Indexed directly by the (non-negative) managed object id. Growth jumps to
//! `(id + 100) * 2` so a run of increasing ids only reallocates a handful of
//! times.

use crate::proxy::HandleId;

const GROWTH_SLACK: usize = 100;

/// First auto-assigned id for objects without a managed counterpart
const FIRST_INTERNAL_ID: i32 = -2;

#[derive(Debug)]
pub struct ObjectIdentityMap {
    entries: Vec<Option<HandleId>>,
    mapped: usize,
    next_internal_id: i32,
}

impl Default for ObjectIdentityMap {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl ObjectIdentityMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            mapped: 0,
            next_internal_id: FIRST_INTERNAL_ID,
        }
    }

    /// Proxy currently representing `object_id`
    pub fn get(&self, object_id: i32) -> Option<HandleId> {
        let index = usize::try_from(object_id).ok()?;
        self.entries.get(index).copied().flatten()
    }

    /// Map `object_id` to `handle`, evicting whatever held the id before.
    ///
    /// Returns the evicted proxy, if any. Negative ids are ignored.
    pub fn insert(&mut self, object_id: i32, handle: HandleId) -> Option<HandleId> {
        let index = usize::try_from(object_id).ok()?;
        if index >= self.entries.len() {
            let new_len = (index + GROWTH_SLACK) * 2;
            self.entries.resize(new_len, None);
        }
        let previous = self.entries[index].replace(handle);
        if previous.is_none() {
            self.mapped += 1;
        }
        previous.filter(|&old| old != handle)
    }

    /// Drop the mapping for `object_id` if it still points at `handle`
    pub fn remove(&mut self, object_id: i32, handle: HandleId) -> bool {
        let Ok(index) = usize::try_from(object_id) else {
            return false;
        };
        match self.entries.get_mut(index) {
            Some(slot) if *slot == Some(handle) => {
                *slot = None;
                self.mapped -= 1;
                true
            }
            _ => false,
        }
    }

    /// Next auto-assigned negative id (-2, -3, ...)
    pub fn next_internal_id(&mut self) -> i32 {
        let id = self.next_internal_id;
        self.next_internal_id = self.next_internal_id.saturating_sub(1);
        id
    }

    /// Number of live mappings
    pub fn len(&self) -> usize {
        self.mapped
    }

    pub fn is_empty(&self) -> bool {
        self.mapped == 0
    }

    /// Size of the backing array
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.mapped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut map = ObjectIdentityMap::default();
        assert_eq!(map.insert(5, 10), None);
        assert_eq!(map.get(5), Some(10));
        assert_eq!(map.get(4), None);
        assert_eq!(map.get(-1), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_growth_rule() {
        let mut map = ObjectIdentityMap::default();
        map.insert(0, 1);
        assert_eq!(map.capacity(), 200);
        map.insert(1_000_000, 2);
        assert_eq!(map.capacity(), (1_000_000 + 100) * 2);
        assert_eq!(map.get(1_000_000), Some(2));
    }

    #[test]
    fn test_insert_evicts_previous_mapping() {
        let mut map = ObjectIdentityMap::default();
        map.insert(3, 1);
        assert_eq!(map.insert(3, 2), Some(1));
        assert_eq!(map.get(3), Some(2));
        assert_eq!(map.len(), 1);
        // re-installing the same proxy evicts nothing
        assert_eq!(map.insert(3, 2), None);
    }

    #[test]
    fn test_remove_only_own_mapping() {
        let mut map = ObjectIdentityMap::default();
        map.insert(7, 1);
        map.insert(7, 2);
        assert!(!map.remove(7, 1));
        assert_eq!(map.get(7), Some(2));
        assert!(map.remove(7, 2));
        assert!(map.is_empty());
    }

    #[test]
    fn test_internal_ids_decrease() {
        let mut map = ObjectIdentityMap::default();
        assert_eq!(map.next_internal_id(), -2);
        assert_eq!(map.next_internal_id(), -3);
        assert_eq!(map.next_internal_id(), -4);
    }
}
