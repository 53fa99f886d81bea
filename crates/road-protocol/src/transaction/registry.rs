use std::collections::HashMap;

use super::{Transaction, TxKey};
use crate::types::Uid;

/// Active transactions, at most one per (remote, kind, role).
///
/// Slots are reused through a free list so a busy stack does not keep
/// allocating; the index maps each key to its slot.
#[derive(Default)]
pub(crate) struct Registry {
    slots: Vec<Option<Transaction>>,
    free: Vec<usize>,
    index: HashMap<TxKey, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, key: &TxKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &TxKey) -> Option<&Transaction> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, key: &TxKey) -> Option<&mut Transaction> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_mut()
    }

    /// Register `tx`, replacing and returning any transaction under the same key.
    pub fn insert(&mut self, tx: Transaction) -> Option<Transaction> {
        let key = tx.key();
        if let Some(&slot) = self.index.get(&key) {
            return self.slots[slot].replace(tx);
        }
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(tx);
                slot
            }
            None => {
                self.slots.push(Some(tx));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        None
    }

    pub fn remove(&mut self, key: &TxKey) -> Option<Transaction> {
        let slot = self.index.remove(key)?;
        self.free.push(slot);
        self.slots[slot].take()
    }

    /// Drop every transaction of one remote. Returns how many went.
    pub fn remove_remote(&mut self, uid: Uid) -> usize {
        let keys: Vec<TxKey> = self.index.keys().filter(|k| k.0 == uid).copied().collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
    }

    /// Snapshot of the active keys in a stable order.
    pub fn keys(&self) -> Vec<TxKey> {
        let mut keys: Vec<TxKey> = self.index.keys().copied().collect();
        keys.sort();
        keys
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
