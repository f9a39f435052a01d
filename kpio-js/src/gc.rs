//! Heap and garbage collector.
//!
//! Objects and scope records live in generational arenas. Collection is a
//! plain mark-and-sweep from an explicit root set. Unreachable objects that
//! carry a finalizer survive one extra cycle: they are marked finalized and
//! handed back to the caller, which runs the finalizers. A finalized object
//! is never queued again and is freed by a later cycle once unreachable.

use alloc::vec;
use alloc::vec::Vec;

use crate::object::{Callable, JsObject, ObjectId, ObjectKind, Scope, ScopeId};
use crate::value::Value;

/// Generational slot handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Handle { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena allocator with slot reuse.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    pub fn alloc(&mut self, value: T) -> Handle {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            Handle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            Handle::new(index, 0)
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    fn free_index(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.value.take().is_some() {
                self.free_list.push(index as u32);
                self.live -= 1;
            }
        }
    }

    fn handle_at(&self, index: usize) -> Option<Handle> {
        self.slots
            .get(index)
            .filter(|slot| slot.value.is_some())
            .map(|slot| Handle::new(index as u32, slot.generation))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// GC statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Live objects.
    pub objects: usize,
    /// Live scope records.
    pub scopes: usize,
    /// Objects allocated since the last collection.
    pub allocations_since_gc: usize,
    /// Completed collections.
    pub collections: usize,
}

/// Root set of a collection.
#[derive(Default)]
pub struct Roots {
    pub values: Vec<Value>,
    pub objects: Vec<ObjectId>,
    pub scopes: Vec<ScopeId>,
}

/// Outcome of a collection.
#[derive(Debug, Default)]
pub struct Collection {
    /// Objects freed in this cycle.
    pub freed: usize,
    /// Objects whose finalizer must run now.
    pub finalize: Vec<ObjectId>,
}

enum Edge {
    Object(ObjectId),
    Scope(ScopeId),
}

/// The engine heap.
#[derive(Default)]
pub struct Heap {
    objects: Arena<JsObject>,
    scopes: Arena<Scope>,
    allocations: usize,
    collections: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, obj: JsObject) -> ObjectId {
        self.allocations += 1;
        ObjectId(self.objects.alloc(obj))
    }

    pub fn alloc_scope(&mut self, scope: Scope) -> ScopeId {
        ScopeId(self.scopes.alloc(scope))
    }

    pub fn get(&self, id: ObjectId) -> Option<&JsObject> {
        self.objects.get(id.0)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut JsObject> {
        self.objects.get_mut(id.0)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(id.0)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn allocations_since_gc(&self) -> usize {
        self.allocations
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            objects: self.objects.len(),
            scopes: self.scopes.len(),
            allocations_since_gc: self.allocations,
            collections: self.collections,
        }
    }

    /// Mark from `roots`, queue finalizable garbage and sweep the rest.
    pub fn collect(&mut self, roots: &Roots) -> Collection {
        let mut marked_objects = vec![false; self.objects.capacity()];
        let mut marked_scopes = vec![false; self.scopes.capacity()];
        let mut work: Vec<Edge> = Vec::new();

        for value in &roots.values {
            push_value(value, &mut work);
        }
        work.extend(roots.objects.iter().map(|id| Edge::Object(*id)));
        work.extend(roots.scopes.iter().map(|id| Edge::Scope(*id)));
        self.mark(&mut work, &mut marked_objects, &mut marked_scopes);

        // Finalizable garbage is revived for this cycle only.
        let mut finalize = Vec::new();
        for index in 0..self.objects.capacity() {
            if marked_objects[index] {
                continue;
            }
            let Some(handle) = self.objects.handle_at(index) else {
                continue;
            };
            let Some(obj) = self.objects.get_mut(handle) else {
                continue;
            };
            if obj.finalizer.is_some() && !obj.finalized {
                obj.finalized = true;
                finalize.push(ObjectId(handle));
                work.push(Edge::Object(ObjectId(handle)));
            }
        }
        self.mark(&mut work, &mut marked_objects, &mut marked_scopes);

        let mut freed = 0;
        for (index, marked) in marked_objects.iter().enumerate() {
            if !marked && self.objects.handle_at(index).is_some() {
                self.objects.free_index(index);
                freed += 1;
            }
        }
        for (index, marked) in marked_scopes.iter().enumerate() {
            if !marked {
                self.scopes.free_index(index);
            }
        }

        self.allocations = 0;
        self.collections += 1;
        Collection { freed, finalize }
    }

    fn mark(&self, work: &mut Vec<Edge>, objects: &mut [bool], scopes: &mut [bool]) {
        while let Some(edge) = work.pop() {
            match edge {
                Edge::Object(id) => {
                    let index = id.0.index() as usize;
                    let Some(obj) = self.objects.get(id.0) else {
                        continue;
                    };
                    if objects[index] {
                        continue;
                    }
                    objects[index] = true;
                    trace_object(obj, work);
                }
                Edge::Scope(id) => {
                    let index = id.0.index() as usize;
                    let Some(scope) = self.scopes.get(id.0) else {
                        continue;
                    };
                    if scopes[index] {
                        continue;
                    }
                    scopes[index] = true;
                    for value in scope.bindings.values() {
                        push_value(value, work);
                    }
                    if let Some(parent) = scope.parent {
                        work.push(Edge::Scope(parent));
                    }
                }
            }
        }
    }
}

fn push_value(value: &Value, work: &mut Vec<Edge>) {
    if let Value::Object(id) = value {
        work.push(Edge::Object(*id));
    }
}

fn trace_object(obj: &JsObject, work: &mut Vec<Edge>) {
    if let Some(proto) = obj.prototype {
        work.push(Edge::Object(proto));
    }
    for prop in obj.properties() {
        push_value(&prop.value, work);
    }
    for value in obj.elements().iter().flatten() {
        push_value(value, work);
    }
    if let Some(finalizer) = &obj.finalizer {
        push_value(finalizer, work);
    }
    if let ObjectKind::Enumerator(state) = &obj.kind {
        push_value(&state.target, work);
    }
    match &obj.callable {
        Some(Callable::Script(f)) => work.push(Edge::Scope(f.scope)),
        Some(Callable::Bound(b)) => {
            work.push(Edge::Object(b.target));
            push_value(&b.this, work);
            for arg in &b.args {
                push_value(arg, work);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PropertyKey;

    #[test]
    fn test_arena_generations() {
        let mut arena: Arena<u32> = Arena::new();
        let a = arena.alloc(1);
        arena.free_index(a.index() as usize);
        let b = arena.alloc(2);
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn test_collect_unreachable() {
        let mut heap = Heap::new();
        let root = heap.alloc(JsObject::ordinary(None));
        let child = heap.alloc(JsObject::ordinary(None));
        let garbage = heap.alloc(JsObject::ordinary(None));
        if let Some(obj) = heap.get_mut(root) {
            obj.put(PropertyKey::from("child"), Value::Object(child));
        }
        let roots = Roots {
            objects: alloc::vec![root],
            ..Roots::default()
        };
        let result = heap.collect(&roots);
        assert_eq!(result.freed, 1);
        assert!(heap.get(child).is_some());
        assert!(heap.get(garbage).is_none());
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = Heap::new();
        let a = heap.alloc(JsObject::ordinary(None));
        let b = heap.alloc(JsObject::ordinary(Some(a)));
        if let Some(obj) = heap.get_mut(a) {
            obj.put(PropertyKey::from("b"), Value::Object(b));
        }
        let result = heap.collect(&Roots::default());
        assert_eq!(result.freed, 2);
        assert_eq!(heap.object_count(), 0);
    }

    #[test]
    fn test_finalizable_survives_one_cycle() {
        let mut heap = Heap::new();
        let func = heap.alloc(JsObject::ordinary(None));
        let target = heap.alloc(JsObject::ordinary(None));
        if let Some(obj) = heap.get_mut(target) {
            obj.finalizer = Some(Value::Object(func));
        }
        let first = heap.collect(&Roots::default());
        assert_eq!(first.finalize, alloc::vec![target]);
        assert!(heap.get(target).is_some());
        assert!(heap.get(func).is_some());

        let second = heap.collect(&Roots::default());
        assert!(second.finalize.is_empty());
        assert_eq!(second.freed, 2);
    }
}
