//! Bounded, concurrency-safe, content-addressed response cache.
//!
//! The recency order is a doubly linked list over an arena of stable slot
//! indices (`Vec<Slot>` plus a free list) rather than raw pointers, so the
//! whole structure stays safe-Rust and `Send`. All mutation goes through a
//! single `std::sync::Mutex`; no `.await` ever happens while it is held,
//! since lookups hand back an owned copy of the body and inserts take an
//! already-built body — callers do their network I/O outside the lock.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;

const NIL: usize = usize::MAX;

struct Slot {
    fingerprint: String,
    body: Bytes,
    prev: usize,
    next: usize,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().expect("detach of freed slot");
            (slot.prev, slot.next)
        };
        if prev != NIL {
            self.slots[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slots[idx].as_mut().unwrap();
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            self.slots[old_head].as_mut().unwrap().prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn alloc(&mut self, slot: Slot) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn evict_tail(&mut self) {
        let idx = self.tail;
        if idx == NIL {
            return;
        }
        self.detach(idx);
        let slot = self.slots[idx].take().expect("evict of freed slot");
        self.index.remove(&slot.fingerprint);
        self.free.push(idx);
    }

    fn lookup(&mut self, fingerprint: &str) -> Option<Bytes> {
        let idx = *self.index.get(fingerprint)?;
        self.promote(idx);
        Some(self.slots[idx].as_ref().unwrap().body.clone())
    }

    fn insert(&mut self, fingerprint: String, body: Bytes) {
        if fingerprint.is_empty() || body.is_empty() {
            return;
        }
        if let Some(&idx) = self.index.get(&fingerprint) {
            self.slots[idx].as_mut().unwrap().body = body;
            self.promote(idx);
            return;
        }
        if self.len() >= self.capacity {
            self.evict_tail();
        }
        let idx = self.alloc(Slot {
            fingerprint: fingerprint.clone(),
            body,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(fingerprint, idx);
        self.push_front(idx);
    }
}

/// Process-wide LRU cache, keyed by the opaque fingerprint string from
/// [`crate::fingerprint`].
pub struct Cache {
    inner: Mutex<Inner>,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::new(capacity)),
        }
    }

    /// Returns a cheap refcounted clone of the cached body, promoting it
    /// to most-recently-used. `None` if the fingerprint is absent.
    pub fn lookup(&self, fingerprint: &str) -> Option<Bytes> {
        self.inner.lock().unwrap().lookup(fingerprint)
    }

    /// Inserts or updates an entry, evicting the least-recently-used entry
    /// if this is a new key at capacity. No-ops on an empty fingerprint or
    /// an empty body.
    pub fn insert(&self, fingerprint: String, body: impl Into<Bytes>) {
        self.inner.lock().unwrap().insert(fingerprint, body.into());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
