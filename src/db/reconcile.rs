//! Three-way reconciliation between a stored collection and a working set.
//!
//! Used wherever a persisted table mirrors an in-memory collection: public
//! chat channels, guild membership, inventory slots and the character list
//! of an account. Only the differences are written, so rows that did not
//! change are never touched.

use std::collections::BTreeMap;

/// Writes needed to make the stored collection equal the working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation<K, V> {
    /// Present in memory, missing from the store.
    pub insert: Vec<(K, V)>,
    /// Present in both with different values.
    pub update: Vec<(K, V)>,
    /// Present in the store, missing from memory.
    pub delete: Vec<K>,
}

impl<K, V> Reconciliation<K, V> {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn report(&self) -> SyncReport {
        SyncReport {
            inserted: self.insert.len(),
            updated: self.update.len(),
            deleted: self.delete.len(),
        }
    }
}

/// Row counts written by a reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Diff `stored` against `current`.
///
/// Output order follows key order, so the resulting statements are
/// deterministic.
pub fn reconcile<K, V>(stored: &BTreeMap<K, V>, current: &BTreeMap<K, V>) -> Reconciliation<K, V>
where
    K: Ord + Clone,
    V: PartialEq + Clone,
{
    let mut insert = Vec::new();
    let mut update = Vec::new();

    for (key, value) in current {
        match stored.get(key) {
            None => insert.push((key.clone(), value.clone())),
            Some(old) if old != value => update.push((key.clone(), value.clone())),
            Some(_) => {}
        }
    }

    let delete = stored
        .keys()
        .filter(|key| !current.contains_key(*key))
        .cloned()
        .collect();

    Reconciliation {
        insert,
        update,
        delete,
    }
}
