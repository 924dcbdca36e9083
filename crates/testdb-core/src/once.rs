//! Concurrency-safe values that are initialized at most once, caching both
//! successful and failed results.
//!
//! The point of caching failures is deliberate: a broken producer should
//! report its error once, not be retried by a thousand parallel callers.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

/// The cached outcome of a producer: shared value or shared error.
pub type OnceResult<V, E> = Result<Arc<V>, Arc<E>>;

/// A keyed map where each entry is initialized a single time.
///
/// [`set`] runs its producer at most once per key across concurrent callers;
/// every caller, including ones racing with the producer, receives the same
/// cached result. Producers for different keys run concurrently. Entries are
/// never evicted; this is intended for program-lifetime memoization.
///
/// [`set`]: OnceMap::set
pub struct OnceMap<K, V, E> {
    cells: Mutex<HashMap<K, Arc<OnceCell<OnceResult<V, E>>>>>,
}

impl<K, V, E> OnceMap<K, V, E>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Initializes the entry for `key` at most one time and returns the
    /// cached result. Callers that race the producer wait for it to finish.
    pub async fn set<F, Fut>(&self, key: K, producer: F) -> OnceResult<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(key).or_default())
        };
        cell.get_or_init(|| async move { producer().await.map(Arc::new).map_err(Arc::new) })
            .await
            .clone()
    }

    /// Returns the cached result for `key`, or `None` if no producer has
    /// completed for it yet.
    pub fn get(&self, key: &K) -> Option<OnceResult<V, E>> {
        let cell = {
            let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            cells.get(key).cloned()
        }?;
        cell.get().cloned()
    }
}

impl<K, V, E> Default for OnceMap<K, V, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A single value that is initialized at most once.
pub struct OnceVar<T, E> {
    cell: OnceCell<OnceResult<T, E>>,
}

impl<T, E> OnceVar<T, E> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Initializes the value at most one time and returns the cached result.
    pub async fn set<F, Fut>(&self, producer: F) -> OnceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cell
            .get_or_init(|| async move { producer().await.map(Arc::new).map_err(Arc::new) })
            .await
            .clone()
    }

    /// Returns the cached result, or `None` if no producer has completed.
    pub fn get(&self) -> Option<OnceResult<T, E>> {
        self.cell.get().cloned()
    }
}

impl<T, E> Default for OnceVar<T, E> {
    fn default() -> Self {
        Self::new()
    }
}
