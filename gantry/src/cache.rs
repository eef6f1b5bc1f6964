//! In memory LRU storage shared by the request caches.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

pub(crate) trait KeyType: Clone + fmt::Debug + Hash + Eq + Send + Sync {}
pub(crate) trait ValueType: Clone + Send + Sync {}

impl<K> KeyType for K where K: Clone + fmt::Debug + Hash + Eq + Send + Sync {}

impl<V> ValueType for V where V: Clone + Send + Sync {}

/// Entries are written once per key: a key always maps to the same value, so concurrent
/// writers racing on a key store identical values.
#[derive(Clone)]
pub(crate) struct InMemoryStorage<K: KeyType, V: ValueType> {
    inner: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> InMemoryStorage<K, V>
where
    K: KeyType,
    V: ValueType,
{
    pub(crate) fn new(max_capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(max_capacity))),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl<K: KeyType, V: ValueType> fmt::Debug for InMemoryStorage<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_recently_used_entries_are_evicted() {
        let storage = InMemoryStorage::new(NonZeroUsize::new(2).unwrap());
        storage.insert("a", 1);
        storage.insert("b", 2);
        assert_eq!(storage.get(&"a"), Some(1));
        storage.insert("c", 3);
        assert_eq!(storage.get(&"b"), None);
        assert_eq!(storage.get(&"a"), Some(1));
        assert_eq!(storage.len(), 2);
    }
}
