//! Provide a [`Context`] for the pipeline.
//!
//! A context is created for every GraphQL request (every element of a batch) and handed to
//! plugins, the context factory and resolvers. It is dropped once the response has been
//! sent, or the stream of responses released.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::BoxError;

use crate::json_ext::Value;

/// Holds [`Context`] entries.
pub(crate) type Entries = Arc<DashMap<String, Value>>;

/// A map of arbitrary JSON values shared by the stages of a request, plus typed extensions
/// that are not serializable.
#[derive(Clone, Debug)]
pub struct Context {
    id: String,
    entries: Entries,
    extensions: ExtensionsMutex,
    created_at: Instant,
}

impl Context {
    pub fn new() -> Self {
        Context {
            id: uuid::Uuid::new_v4().to_string(),
            entries: Default::default(),
            extensions: ExtensionsMutex::default(),
            created_at: Instant::now(),
        }
    }

    /// The unique identifier of the request this context belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns extensions of the context.
    ///
    /// You can use `Extensions` to pass data between stages that is not serializable.
    pub fn extensions(&self) -> &ExtensionsMutex {
        &self.extensions
    }

    /// Returns true if the context contains a value for the specified key.
    pub fn contains_key<K>(&self, key: K) -> bool
    where
        K: Into<String>,
    {
        self.entries.contains_key(&key.into())
    }

    /// Get a value from the context using the provided key.
    ///
    /// Semantics:
    ///  - If the operation fails, then the key is not present.
    ///  - If the operation succeeds, the value is an [`Option`].
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: DeserializeOwned,
    {
        self.entries
            .get(&key.into())
            .map(|v| serde_json::from_value(v.value().clone()))
            .transpose()
            .map_err(|e| e.into())
    }

    /// Insert a value into the context using the provided key and value.
    ///
    /// Semantics:
    ///  - If the operation fails, then the pair has not been inserted.
    ///  - If the operation succeeds, the result is the old value as an [`Option`].
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: Serialize + DeserializeOwned,
    {
        match serde_json::to_value(value) {
            Ok(value) => self
                .entries
                .insert(key.into(), value)
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| e.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert a value into the context using the provided key and resolver function.
    ///
    /// The resolver is called with the current value, or the default of `V` if there is none.
    pub fn upsert<K, V>(&self, key: K, upsert: impl FnOnce(V) -> V) -> Result<(), BoxError>
    where
        K: Into<String>,
        V: Serialize + DeserializeOwned + Default,
    {
        match self.entries.entry(key.into()) {
            Entry::Occupied(mut entry) => {
                let current: V = serde_json::from_value(entry.get().clone())?;
                entry.insert(serde_json::to_value(upsert(current))?);
            }
            Entry::Vacant(entry) => {
                entry.insert(serde_json::to_value(upsert(V::default()))?);
            }
        }
        Ok(())
    }

    /// Time elapsed since the request started.
    pub fn elapsed(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread safe typed extensions of a [`Context`].
///
/// Extensions must be locked for mutation:
/// `context.extensions().with_lock(|mut lock| lock.insert::<MyData>(data));`
#[derive(Default, Clone, Debug)]
pub struct ExtensionsMutex {
    extensions: Arc<parking_lot::Mutex<http::Extensions>>,
}

impl ExtensionsMutex {
    /// Locks the extensions for interaction.
    ///
    /// The lock will be dropped once the closure completes.
    pub fn with_lock<T, F: FnOnce(&mut http::Extensions) -> T>(&self, func: F) -> T {
        let mut locked = self.extensions.lock();
        func(&mut locked)
    }
}

/// Builds the user context of a request from its HTTP parts.
///
/// Values are stored in the [`Context`] handed to the factory. An error aborts the request
/// before execution.
#[async_trait::async_trait]
pub trait ContextFactory: Send + Sync + 'static {
    async fn build(&self, request: &http::request::Parts, context: &Context)
        -> Result<(), BoxError>;
}

/// State associated with in-flight requests, keyed by [`Context::id`].
///
/// An entry lives as long as the [`SideTableGuard`] returned on insertion. Inserting twice
/// under the same id keeps both entries, each removed by its own guard.
pub struct SideTable<T> {
    entries: Arc<DashMap<String, Vec<(u64, T)>>>,
    next_slot: Arc<AtomicU64>,
}

impl<T> SideTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Default::default(),
            next_slot: Default::default(),
        }
    }

    /// Associate `value` with the request `id` until the returned guard is dropped.
    #[must_use]
    pub fn insert(&self, id: impl Into<String>, value: T) -> SideTableGuard<T> {
        let id = id.into();
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.entries
            .entry(id.clone())
            .or_default()
            .push((slot, value));
        SideTableGuard {
            entries: self.entries.clone(),
            id,
            slot,
        }
    }

    /// Look at the most recent entry of `id`.
    pub fn get<R>(&self, id: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries
            .get(id)
            .and_then(|slots| slots.last().map(|(_, value)| f(value)))
    }

    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for slots in self.entries.iter() {
            slots.iter().for_each(|(_, value)| f(value));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|slots| slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Clone for SideTable<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            next_slot: self.next_slot.clone(),
        }
    }
}

impl<T> Default for SideTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SideTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideTable")
            .field("len", &self.len())
            .finish()
    }
}

/// Removes its entry from the [`SideTable`] when dropped.
pub struct SideTableGuard<T> {
    entries: Arc<DashMap<String, Vec<(u64, T)>>>,
    id: String,
    slot: u64,
}

impl<T> Drop for SideTableGuard<T> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut slots) = self.entries.entry(self.id.clone()) {
            slots.get_mut().retain(|(slot, _)| *slot != self.slot);
            if slots.get().is_empty() {
                slots.remove();
            }
        }
    }
}
