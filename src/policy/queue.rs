//! Arena-backed eviction order with a key index.
//!
//! Entries live in a slot arena and are linked into a doubly-linked list by
//! slot id, most recent at the head. The index maps a key to the slot holding
//! its entry, so lookup, unlink and eviction are all O(1) without the index
//! and the order ever aliasing each other.

use std::collections::HashMap;

use crate::error::PolicyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct Entry<M> {
    pub key: u64,
    pub size: u64,
    pub meta: M,
}

impl Entry<()> {
    pub fn new(key: u64, size: u64) -> Self {
        Entry { key, size, meta: () }
    }
}

#[derive(Debug)]
struct Node<M> {
    entry: Entry<M>,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

#[derive(Debug)]
pub struct EvictionQueue<M> {
    slots: Vec<Option<Node<M>>>,
    free: Vec<usize>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    index: HashMap<u64, SlotId>,
}

impl<M> EvictionQueue<M> {
    pub fn new() -> Self {
        EvictionQueue {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn slot(&self, key: u64) -> Option<SlotId> {
        self.index.get(&key).copied()
    }

    pub fn get(&self, key: u64) -> Result<Option<&Entry<M>>, PolicyError> {
        match self.slot(key) {
            Some(id) => self.node(id, key).map(|node| Some(&node.entry)),
            None => Ok(None),
        }
    }

    pub fn entry(&self, id: SlotId) -> Option<&Entry<M>> {
        self.slots
            .get(id.0)
            .and_then(|slot| slot.as_ref())
            .map(|node| &node.entry)
    }

    pub fn entry_mut(&mut self, id: SlotId) -> Option<&mut Entry<M>> {
        self.slots
            .get_mut(id.0)
            .and_then(|slot| slot.as_mut())
            .map(|node| &mut node.entry)
    }

    #[cfg(test)]
    pub fn back(&self) -> Option<&Entry<M>> {
        self.tail.and_then(|id| self.entry(id))
    }

    /// Inserts `entry` as the most recent one. Any entry already indexed
    /// under the same key must have been removed first.
    pub fn push_front(&mut self, entry: Entry<M>) -> SlotId {
        debug_assert!(!self.index.contains_key(&entry.key));

        let key = entry.key;
        let node = Node {
            entry,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                SlotId(idx)
            }
            None => {
                self.slots.push(Some(node));
                SlotId(self.slots.len() - 1)
            }
        };

        self.attach_front(id);
        self.index.insert(key, id);
        id
    }

    pub fn remove(&mut self, key: u64) -> Result<Option<Entry<M>>, PolicyError> {
        match self.index.get(&key).copied() {
            Some(id) => self.release(id, key).map(Some),
            None => Ok(None),
        }
    }

    /// Removes the least recent entry.
    pub fn pop_back(&mut self) -> Result<Option<Entry<M>>, PolicyError> {
        let Some(id) = self.tail else {
            return Ok(None);
        };
        let key = self.node(id, u64::MAX)?.entry.key;
        self.release(id, key).map(Some)
    }

    pub fn move_to_front(&mut self, id: SlotId) -> Result<(), PolicyError> {
        if self.head == Some(id) {
            return Ok(());
        }
        self.detach(id)?;
        self.attach_front(id);
        Ok(())
    }

    /// Entries from most to least recent.
    pub fn iter(&self) -> Iter<'_, M> {
        Iter {
            queue: self,
            current: self.head,
        }
    }

    /// Verifies that the index and the order agree on membership and that
    /// the entries add up to `accounted` bytes.
    pub fn validate(&self, accounted: u64) -> Result<(), PolicyError> {
        let mut ordered = 0;
        let mut actual = 0;
        for entry in self.iter() {
            ordered += 1;
            actual += entry.size;
            if ordered > self.slots.len() {
                break;
            }
        }
        if ordered != self.index.len() {
            return Err(PolicyError::Membership {
                indexed: self.index.len(),
                ordered,
            });
        }

        for (&key, &id) in &self.index {
            if self.node(id, key)?.entry.key != key {
                return Err(PolicyError::DanglingIndex { key });
            }
        }

        if actual != accounted {
            return Err(PolicyError::SizeMismatch { accounted, actual });
        }
        Ok(())
    }

    fn node(&self, id: SlotId, key: u64) -> Result<&Node<M>, PolicyError> {
        self.slots
            .get(id.0)
            .and_then(|slot| slot.as_ref())
            .ok_or(PolicyError::DanglingIndex { key })
    }

    fn node_mut(&mut self, id: SlotId) -> Result<&mut Node<M>, PolicyError> {
        self.slots
            .get_mut(id.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(PolicyError::DanglingIndex { key: u64::MAX })
    }

    fn release(&mut self, id: SlotId, key: u64) -> Result<Entry<M>, PolicyError> {
        self.detach(id)?;
        let node = self.slots[id.0]
            .take()
            .ok_or(PolicyError::DanglingIndex { key })?;
        self.free.push(id.0);
        self.index.remove(&node.entry.key);
        Ok(node.entry)
    }

    fn detach(&mut self, id: SlotId) -> Result<(), PolicyError> {
        let (prev, next) = {
            let node = self.node_mut(id)?;
            let links = (node.prev, node.next);
            node.prev = None;
            node.next = None;
            links
        };

        match prev {
            Some(prev) => self.node_mut(prev)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next)?.prev = prev,
            None => self.tail = prev,
        }
        Ok(())
    }

    fn attach_front(&mut self, id: SlotId) {
        let old_head = self.head;
        if let Some(node) = self.slots[id.0].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        match old_head.and_then(|head| self.slots[head.0].as_mut()) {
            Some(head) => head.prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }
}

impl<M> Default for EvictionQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, M> {
    queue: &'a EvictionQueue<M>,
    current: Option<SlotId>,
}

impl<'a, M> Iterator for Iter<'a, M> {
    type Item = &'a Entry<M>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current.and_then(|id| self.queue.slots[id.0].as_ref())?;
        self.current = node.next;
        Some(&node.entry)
    }
}
