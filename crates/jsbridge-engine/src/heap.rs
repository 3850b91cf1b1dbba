//! Object heap and persistent handles
//!
//! Objects are stored in generational slots. Reclamation is an explicit
//! mark/sweep pass over the roots handed in by the isolate plus every strong
//! persistent. Weak persistents whose target is otherwise unreachable are
//! revived for one cycle: the target is kept, the persistent turns strong
//! and its token is queued as a weak notice for the embedder.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::template::{FunctionTemplateId, NativeAccessor, ObjectTemplateId};
use crate::value::{ObjectRef, Persistent, PropertyAttributes, Value};

/// Error constructor family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorName {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
}

impl ErrorName {
    pub const ALL: [ErrorName; 5] = [
        ErrorName::Error,
        ErrorName::TypeError,
        ErrorName::RangeError,
        ErrorName::ReferenceError,
        ErrorName::SyntaxError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorName::Error => "Error",
            ErrorName::TypeError => "TypeError",
            ErrorName::RangeError => "RangeError",
            ErrorName::ReferenceError => "ReferenceError",
            ErrorName::SyntaxError => "SyntaxError",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    Native(FunctionTemplateId),
    ErrorConstructor(ErrorName),
}

pub(crate) enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(FunctionKind),
    Date(f64),
    RegExp { source: Arc<str>, flags: Arc<str> },
    BoolObject(bool),
    NumberObject(f64),
    StringObject(Arc<str>),
    Error,
}

/// Content of an internal field slot
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InternalField {
    #[default]
    Empty,
    /// Opaque embedder integer (never traced)
    External(i64),
    Value(Value),
}

#[derive(Clone)]
pub(crate) enum PropertySlot {
    Data(Value),
    Accessor(Arc<dyn NativeAccessor>),
}

#[derive(Clone)]
pub(crate) struct Property {
    pub slot: PropertySlot,
    pub attributes: PropertyAttributes,
}

pub(crate) struct HeapObject {
    pub kind: ObjectKind,
    pub properties: IndexMap<Arc<str>, Property>,
    pub prototype: Option<ObjectRef>,
    pub internal_fields: Vec<InternalField>,
    pub private: FxHashMap<Arc<str>, Value>,
    pub type_tag: Option<i32>,
    pub template: Option<ObjectTemplateId>,
}

impl HeapObject {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            properties: IndexMap::new(),
            prototype: None,
            internal_fields: Vec::new(),
            private: FxHashMap::default(),
            type_tag: None,
            template: None,
        }
    }

    pub fn with_prototype(mut self, prototype: Option<ObjectRef>) -> Self {
        self.prototype = prototype;
        self
    }

    pub fn data(&self, name: &str) -> Option<&Value> {
        match self.properties.get(name).map(|p| &p.slot) {
            Some(PropertySlot::Data(value)) => Some(value),
            _ => None,
        }
    }

    pub fn define(&mut self, name: &str, value: Value, attributes: PropertyAttributes) {
        self.properties.insert(
            Arc::from(name),
            Property {
                slot: PropertySlot::Data(value),
                attributes,
            },
        );
    }

    fn children(&self, out: &mut Vec<ObjectRef>) {
        out.extend(self.prototype);
        for property in self.properties.values() {
            if let PropertySlot::Data(Value::Object(obj)) = &property.slot {
                out.push(*obj);
            }
        }
        for field in &self.internal_fields {
            if let InternalField::Value(Value::Object(obj)) = field {
                out.push(*obj);
            }
        }
        out.extend(self.private.values().filter_map(Value::as_object));
        if let ObjectKind::Array(elements) = &self.kind {
            out.extend(elements.iter().filter_map(Value::as_object));
        }
    }
}

struct ObjectSlot {
    generation: u32,
    object: Option<HeapObject>,
    marked: bool,
}

struct PersistentSlot {
    generation: u32,
    value: Option<Value>,
    weak_token: Option<u64>,
}

/// Result of one collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects reclaimed by the sweep
    pub freed: usize,
    /// Weak targets revived and reported as notices
    pub revived: usize,
    /// Objects alive after the pass
    pub live: usize,
}

/// Point-in-time heap counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub persistents: usize,
    pub weak_persistents: usize,
    pub pending_weak_notices: usize,
}

#[derive(Default)]
pub(crate) struct Heap {
    objects: Vec<ObjectSlot>,
    free_objects: Vec<u32>,
    persistents: Vec<PersistentSlot>,
    free_persistents: Vec<u32>,
    weak_notices: Vec<u64>,
}

impl Heap {
    pub fn alloc(&mut self, object: HeapObject) -> ObjectRef {
        if let Some(index) = self.free_objects.pop() {
            let slot = &mut self.objects[index as usize];
            slot.object = Some(object);
            return ObjectRef::new(index, slot.generation);
        }
        self.objects.push(ObjectSlot {
            generation: 0,
            object: Some(object),
            marked: false,
        });
        ObjectRef::new((self.objects.len() - 1) as u32, 0)
    }

    pub fn get(&self, obj: ObjectRef) -> Option<&HeapObject> {
        self.objects
            .get(obj.index as usize)
            .filter(|slot| slot.generation == obj.generation)
            .and_then(|slot| slot.object.as_ref())
    }

    pub fn get_mut(&mut self, obj: ObjectRef) -> Option<&mut HeapObject> {
        self.objects
            .get_mut(obj.index as usize)
            .filter(|slot| slot.generation == obj.generation)
            .and_then(|slot| slot.object.as_mut())
    }

    pub fn is_live(&self, obj: ObjectRef) -> bool {
        self.get(obj).is_some()
    }

    pub fn new_persistent(&mut self, value: Value) -> Persistent {
        if let Some(index) = self.free_persistents.pop() {
            let slot = &mut self.persistents[index as usize];
            slot.value = Some(value);
            slot.weak_token = None;
            return Persistent {
                index,
                generation: slot.generation,
            };
        }
        self.persistents.push(PersistentSlot {
            generation: 0,
            value: Some(value),
            weak_token: None,
        });
        Persistent {
            index: (self.persistents.len() - 1) as u32,
            generation: 0,
        }
    }

    fn persistent_slot(&self, handle: Persistent) -> Option<&PersistentSlot> {
        self.persistents
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    fn persistent_slot_mut(&mut self, handle: Persistent) -> Option<&mut PersistentSlot> {
        self.persistents
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    pub fn persistent_value(&self, handle: Persistent) -> Option<Value> {
        self.persistent_slot(handle).and_then(|slot| slot.value.clone())
    }

    pub fn reset_persistent(&mut self, handle: Persistent) -> bool {
        let Some(slot) = self.persistent_slot_mut(handle) else {
            return false;
        };
        slot.value = None;
        slot.weak_token = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_persistents.push(handle.index);
        true
    }

    pub fn make_weak(&mut self, handle: Persistent, token: u64) -> bool {
        match self.persistent_slot_mut(handle) {
            Some(slot) => {
                slot.weak_token = Some(token);
                true
            }
            None => false,
        }
    }

    pub fn clear_weak(&mut self, handle: Persistent) -> bool {
        match self.persistent_slot_mut(handle) {
            Some(slot) => slot.weak_token.take().is_some(),
            None => false,
        }
    }

    pub fn is_weak(&self, handle: Persistent) -> bool {
        self.persistent_slot(handle)
            .is_some_and(|slot| slot.weak_token.is_some())
    }

    pub fn take_weak_notices(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.weak_notices)
    }

    pub fn has_weak_notices(&self) -> bool {
        !self.weak_notices.is_empty()
    }

    pub fn stats(&self) -> HeapStats {
        let live_persistents = self.persistents.iter().filter(|p| p.value.is_some());
        HeapStats {
            live_objects: self.objects.iter().filter(|s| s.object.is_some()).count(),
            persistents: live_persistents.clone().count(),
            weak_persistents: live_persistents.filter(|p| p.weak_token.is_some()).count(),
            pending_weak_notices: self.weak_notices.len(),
        }
    }

    fn mark(&mut self, mut work: Vec<ObjectRef>) {
        let mut children = Vec::new();
        while let Some(obj) = work.pop() {
            let Some(slot) = self.objects.get_mut(obj.index as usize) else {
                continue;
            };
            if slot.generation != obj.generation || slot.marked {
                continue;
            }
            let Some(object) = slot.object.as_ref() else {
                continue;
            };
            slot.marked = true;
            children.clear();
            object.children(&mut children);
            work.extend_from_slice(&children);
        }
    }

    fn is_marked(&self, obj: ObjectRef) -> bool {
        self.objects
            .get(obj.index as usize)
            .is_some_and(|slot| slot.generation == obj.generation && slot.marked)
    }

    /// Mark from `roots` and strong persistents, revive weak targets, sweep.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> GcStats {
        for slot in &mut self.objects {
            slot.marked = false;
        }

        let mut work: Vec<ObjectRef> = roots.into_iter().filter_map(|v| v.as_object()).collect();
        work.extend(
            self.persistents
                .iter()
                .filter(|p| p.weak_token.is_none())
                .filter_map(|p| p.value.as_ref().and_then(Value::as_object)),
        );
        self.mark(work);

        let mut revived = Vec::new();
        for index in 0..self.persistents.len() {
            let (target, token) = {
                let slot = &self.persistents[index];
                match (slot.value.as_ref().and_then(Value::as_object), slot.weak_token) {
                    (Some(target), Some(token)) => (target, token),
                    _ => continue,
                }
            };
            if self.is_marked(target) || !self.is_live(target) {
                continue;
            }
            self.persistents[index].weak_token = None;
            self.weak_notices.push(token);
            revived.push(target);
        }
        let revived_count = revived.len();
        self.mark(revived);

        let mut freed = 0;
        let mut live = 0;
        for (index, slot) in self.objects.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                live += 1;
                continue;
            }
            slot.object = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free_objects.push(index as u32);
            freed += 1;
        }

        trace!(freed, revived = revived_count, live, "heap collected");
        GcStats {
            freed,
            revived: revived_count,
            live,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> HeapObject {
        HeapObject::new(ObjectKind::Ordinary)
    }

    #[test]
    fn test_unrooted_objects_are_swept() {
        let mut heap = Heap::default();
        let kept = heap.alloc(plain());
        let dropped = heap.alloc(plain());
        let stats = heap.collect([Value::Object(kept)]);
        assert_eq!(stats.freed, 1);
        assert!(heap.is_live(kept));
        assert!(!heap.is_live(dropped));
    }

    #[test]
    fn test_stale_reference_after_slot_reuse() {
        let mut heap = Heap::default();
        let first = heap.alloc(plain());
        heap.collect(std::iter::empty());
        let second = heap.alloc(plain());
        assert_eq!(first.index, second.index);
        assert_ne!(first, second);
        assert!(heap.get(first).is_none());
        assert!(heap.get(second).is_some());
    }

    #[test]
    fn test_children_are_traced() {
        let mut heap = Heap::default();
        let child = heap.alloc(plain());
        let element = heap.alloc(plain());
        let mut parent = plain();
        parent.define("child", Value::Object(child), PropertyAttributes::NONE);
        let array = heap.alloc(HeapObject::new(ObjectKind::Array(vec![Value::Object(element)])));
        parent.private.insert(Arc::from("list"), Value::Object(array));
        let parent = heap.alloc(parent);
        let handle = heap.new_persistent(Value::Object(parent));

        let stats = heap.collect(std::iter::empty());
        assert_eq!(stats.freed, 0);
        assert!(heap.is_live(child));
        assert!(heap.is_live(element));

        assert!(heap.reset_persistent(handle));
        let stats = heap.collect(std::iter::empty());
        assert_eq!(stats.freed, 4);
    }

    #[test]
    fn test_weak_target_is_revived_once() {
        let mut heap = Heap::default();
        let obj = heap.alloc(plain());
        let handle = heap.new_persistent(Value::Object(obj));
        assert!(heap.make_weak(handle, 42));
        assert!(heap.is_weak(handle));

        let stats = heap.collect(std::iter::empty());
        assert_eq!(stats.revived, 1);
        assert_eq!(stats.freed, 0);
        assert!(heap.is_live(obj));
        assert!(!heap.is_weak(handle));
        assert_eq!(heap.take_weak_notices(), vec![42]);
        assert!(heap.take_weak_notices().is_empty());

        // Strong again: survives without a notice.
        let stats = heap.collect(std::iter::empty());
        assert_eq!(stats.revived, 0);
        assert!(heap.is_live(obj));
    }

    #[test]
    fn test_reachable_weak_target_is_not_reported() {
        let mut heap = Heap::default();
        let obj = heap.alloc(plain());
        let handle = heap.new_persistent(Value::Object(obj));
        heap.make_weak(handle, 7);
        heap.collect([Value::Object(obj)]);
        assert!(heap.is_weak(handle));
        assert!(!heap.has_weak_notices());
    }

    #[test]
    fn test_persistent_reset_invalidates_handle() {
        let mut heap = Heap::default();
        let handle = heap.new_persistent(Value::Int32(1));
        assert_eq!(heap.persistent_value(handle), Some(Value::Int32(1)));
        assert!(heap.reset_persistent(handle));
        assert!(!heap.reset_persistent(handle));
        assert_eq!(heap.persistent_value(handle), None);
        assert!(!heap.make_weak(handle, 1));

        let reused = heap.new_persistent(Value::Null);
        assert_eq!(reused.index, handle.index);
        assert_eq!(heap.persistent_value(handle), None);
        assert_eq!(heap.stats().persistents, 1);
    }
}
