//! Live references to host objects wrapped for the engine.
//!
//! Records live in a generational arena and are threaded onto a doubly
//! linked live list. The engine only ever sees the two halves of a
//! [`RefId`] as pointer values, so a finalizer that fires late, or twice,
//! resolves to nothing instead of touching a freed record.

use std::rc::Rc;

use crate::value::HostObject;

/// Stable identity of a reference record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId {
    index: u32,
    generation: u32,
}

impl RefId {
    /// `(index, generation)`, each small enough for a pointer of any width
    /// the engine targets.
    pub fn to_parts(self) -> (usize, usize) {
        (self.index as usize, self.generation as usize)
    }

    /// Inverse of [`to_parts`](Self::to_parts); `None` when either half is
    /// out of range.
    pub fn from_parts(index: usize, generation: usize) -> Option<Self> {
        Some(RefId {
            index: u32::try_from(index).ok()?,
            generation: u32::try_from(generation).ok()?,
        })
    }
}

struct Record {
    object: Rc<dyn HostObject>,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u32,
    record: Option<Record>,
}

/// Arena of foreign reference records with an intrusive live list.
#[derive(Default)]
pub struct ForeignReferenceTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    len: usize,
}

impl ForeignReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record `object` and link it at the head of the live list.
    pub fn insert(&mut self, object: Rc<dyn HostObject>) -> RefId {
        let record = Record {
            object,
            prev: None,
            next: self.head,
        };
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(record);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                (self.slots.len() - 1) as u32
            }
        };
        if let Some(old_head) = self.head {
            if let Some(record) = self.slots[old_head as usize].record.as_mut() {
                record.prev = Some(index);
            }
        }
        self.head = Some(index);
        self.len += 1;
        RefId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn record(&self, id: RefId) -> Option<&Record> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    /// The host object behind `id`, if the reference is still live.
    pub fn get(&self, id: RefId) -> Option<Rc<dyn HostObject>> {
        self.record(id).map(|record| record.object.clone())
    }

    pub fn contains(&self, id: RefId) -> bool {
        self.record(id).is_some()
    }

    /// Remove `id` from the live list. Stale or already removed ids are
    /// ignored; returns whether a record was removed.
    pub fn unlink(&mut self, id: RefId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation {
            return false;
        }
        let Some(record) = slot.record.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;

        match record.prev {
            Some(prev) => {
                if let Some(prev) = self.slots[prev as usize].record.as_mut() {
                    prev.next = record.next;
                }
            }
            None => self.head = record.next,
        }
        if let Some(next) = record.next {
            if let Some(next) = self.slots[next as usize].record.as_mut() {
                next.prev = record.prev;
            }
        }
        log::trace!("[KPIO EMBED] unlinked foreign reference {:?}", id);
        true
    }

    /// Visit every live host object, head first.
    pub fn mark<F: FnMut(&Rc<dyn HostObject>)>(&self, mut visit: F) {
        let mut current = self.head;
        while let Some(index) = current {
            let Some(record) = self.slots[index as usize].record.as_ref() else {
                break;
            };
            visit(&record.object);
            current = record.next;
        }
    }

    /// Release every record without notifying anyone.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.record.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.head = None;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Tag(&'static str);

    impl HostObject for Tag {
        fn type_name(&self) -> &str {
            self.0
        }
    }

    fn tag(name: &'static str) -> Rc<dyn HostObject> {
        Rc::new(Tag(name))
    }

    fn live(table: &ForeignReferenceTable) -> Vec<String> {
        let mut names = Vec::new();
        table.mark(|object| names.push(object.type_name().to_string()));
        names
    }

    #[test]
    fn test_insert_links_at_head() {
        let mut table = ForeignReferenceTable::new();
        table.insert(tag("a"));
        table.insert(tag("b"));
        table.insert(tag("c"));
        assert_eq!(live(&table), ["c", "b", "a"]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_unlink_middle_head_and_last() {
        let mut table = ForeignReferenceTable::new();
        let a = table.insert(tag("a"));
        let b = table.insert(tag("b"));
        let c = table.insert(tag("c"));

        assert!(table.unlink(b));
        assert_eq!(live(&table), ["c", "a"]);
        assert!(table.unlink(c));
        assert_eq!(live(&table), ["a"]);
        assert!(table.unlink(a));
        assert!(live(&table).is_empty());
        assert!(table.is_empty());
        assert_eq!(table.head, None);
    }

    #[test]
    fn test_unlink_is_idempotent() {
        let mut table = ForeignReferenceTable::new();
        let a = table.insert(tag("a"));
        let b = table.insert(tag("b"));
        assert!(table.unlink(a));
        assert!(!table.unlink(a));
        assert_eq!(live(&table), ["b"]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reused_slot_rejects_stale_id() {
        let mut table = ForeignReferenceTable::new();
        let old = table.insert(tag("old"));
        table.unlink(old);
        let new = table.insert(tag("new"));
        assert_ne!(old, new);
        assert!(table.get(old).is_none());
        assert!(!table.unlink(old));
        assert_eq!(table.get(new).map(|o| o.type_name().to_string()).as_deref(), Some("new"));
    }

    #[test]
    fn test_parts_keep_generation() {
        let mut table = ForeignReferenceTable::new();
        let first = table.insert(tag("a"));
        table.unlink(first);
        let second = table.insert(tag("b"));
        assert_eq!(first.to_parts().0, second.to_parts().0);
        assert_ne!(first.to_parts().1, second.to_parts().1);

        let (index, generation) = second.to_parts();
        assert_eq!(RefId::from_parts(index, generation), Some(second));
        let (index, generation) = first.to_parts();
        assert_eq!(RefId::from_parts(index, generation), Some(first));
        assert!(table.get(first).is_none());
    }

    #[test]
    fn test_mark_keeps_objects_alive() {
        let object = tag("kept");
        let mut table = ForeignReferenceTable::new();
        let id = table.insert(object.clone());
        assert_eq!(Rc::strong_count(&object), 2);
        table.unlink(id);
        assert_eq!(Rc::strong_count(&object), 1);
    }
}
