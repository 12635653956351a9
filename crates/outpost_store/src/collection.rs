//! Reactive in-memory collection of entity slots.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// A handle on one entity of a store.
///
/// Subscribers are only woken by changes to this entity. The value turns
/// to `None` when the entity is deleted (locally or by the server) or the
/// store is closed. A create of the same key queued before the deletion
/// ran brings the slot back.
#[derive(Debug)]
pub struct Slot<T> {
    value: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: Clone> Slot<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value: Arc::new(watch::Sender::new(Some(value))),
        }
    }

    /// Current value, `None` once deleted.
    pub fn get(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    /// Whether the entity was deleted.
    pub fn is_deleted(&self) -> bool {
        self.value.borrow().is_none()
    }

    /// Follows the value of this slot.
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.value.subscribe()
    }

    /// Whether both handles designate the same slot.
    pub fn same_slot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    pub(crate) fn set(&self, value: T) {
        self.value.send_replace(Some(value));
    }

    pub(crate) fn clear(&self) {
        self.value.send_if_modified(|current| current.take().is_some());
    }
}

#[derive(Debug)]
struct Entries<T> {
    order: Vec<String>,
    slots: HashMap<String, Slot<T>>,
}

/// Registry of slots keyed by entity key, with an ordered index.
///
/// The ordered list of slots is published on a second channel, so a list
/// view is woken when entities appear or disappear but not when one of them
/// changes.
#[derive(Debug)]
pub struct Collection<T> {
    entries: RwLock<Entries<T>>,
    all: watch::Sender<Vec<Slot<T>>>,
}

impl<T: Clone> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Collection<T> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries {
                order: Vec::new(),
                slots: HashMap::new(),
            }),
            all: watch::Sender::new(Vec::new()),
        }
    }

    /// Follows the ordered list of slots.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Slot<T>>> {
        self.all.subscribe()
    }

    /// The slot registered under `key`.
    pub fn get(&self, key: &str) -> Option<Slot<T>> {
        self.entries.read().slots.get(key).cloned()
    }

    /// Current value of the entity under `key`.
    pub fn value(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|slot| slot.get())
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().slots.contains_key(key)
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    /// Whether no slot is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered keys, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().order.clone()
    }

    /// Current values, in insertion order.
    pub fn values(&self) -> Vec<T> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|key| entries.slots.get(key).and_then(Slot::get))
            .collect()
    }

    /// `(key, value)` pairs, in insertion order.
    pub fn entries(&self) -> Vec<(String, T)> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|key| {
                entries
                    .slots
                    .get(key)
                    .and_then(Slot::get)
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }

    /// Registers slots, skipping keys already present, and publishes the
    /// list once.
    pub(crate) fn insert_many(&self, slots: Vec<(String, Slot<T>)>) {
        if slots.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        let mut changed = false;
        for (key, slot) in slots {
            if entries.slots.contains_key(&key) {
                continue;
            }
            entries.order.push(key.clone());
            entries.slots.insert(key, slot);
            changed = true;
        }
        if changed {
            self.publish(&entries);
        }
    }

    /// Registers one slot.
    pub(crate) fn insert(&self, key: String, slot: Slot<T>) {
        self.insert_many(vec![(key, slot)]);
    }

    /// Unregisters slots and publishes the list once.
    ///
    /// Removed slots are returned untouched; callers clear them after the
    /// list no longer contains them.
    pub(crate) fn remove_many(&self, keys: &[String]) -> Vec<Slot<T>> {
        let mut entries = self.entries.write();
        let removed: Vec<Slot<T>> = keys
            .iter()
            .filter_map(|key| entries.slots.remove(key))
            .collect();
        if !removed.is_empty() {
            let slots = &entries.slots;
            let order = entries
                .order
                .iter()
                .filter(|key| slots.contains_key(*key))
                .cloned()
                .collect();
            entries.order = order;
            self.publish(&entries);
        }
        removed
    }

    /// Moves the slot of `old` to `new`, keeping its position.
    ///
    /// Used when the server assigns a different identity to an entity
    /// created on the device.
    pub(crate) fn rekey(&self, old: &str, new: &str) -> Option<Slot<T>> {
        let mut entries = self.entries.write();
        if entries.slots.contains_key(new) {
            return None;
        }
        let slot = entries.slots.remove(old)?;
        if let Some(position) = entries.order.iter().position(|k| k == old) {
            entries.order[position] = new.to_string();
        }
        entries.slots.insert(new.to_string(), slot.clone());
        Some(slot)
    }

    /// Unregisters every slot, publishes the empty list, then clears the
    /// removed slots.
    pub(crate) fn clear(&self) {
        let removed: Vec<Slot<T>> = {
            let mut entries = self.entries.write();
            entries.order.clear();
            let removed = entries.slots.drain().map(|(_, slot)| slot).collect();
            self.publish(&entries);
            removed
        };
        for slot in removed {
            slot.clear();
        }
    }

    fn publish(&self, entries: &Entries<T>) {
        let list = entries
            .order
            .iter()
            .filter_map(|key| entries.slots.get(key).cloned())
            .collect();
        self.all.send_replace(list);
    }
}
