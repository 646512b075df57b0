use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// Guard-free reads for the identity caches.
///
/// `DashMap::get()` and `DashMap::iter()` hold a shard lock for as long as
/// the returned guard lives. Storage code awaits the query executor between
/// cache accesses, so every read goes through these helpers, which copy the
/// value (an `Arc` handle or an ID) out and drop the guard immediately.
pub trait DashMapExt<K, V> {
    /// Clone the value for `key`.
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone;

    /// Snapshot the current key set.
    fn keys_cloned(&self) -> Vec<K>
    where
        K: Clone;

    /// Snapshot every value.
    fn values_cloned(&self) -> Vec<V>
    where
        V: Clone;
}

impl<K, V> DashMapExt<K, V> for DashMap<K, V>
where
    K: Eq + Hash,
{
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get(key).map(|r| r.value().clone())
    }

    fn keys_cloned(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.iter().map(|e| e.key().clone()).collect()
    }

    fn values_cloned(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.iter().map(|e| e.value().clone()).collect()
    }
}
