//! Memoization of handles, one registry per resource kind.
//!
//! Registries live in a [`HandleArena`] owned by the work unit context, so
//! every handle is reclaimed when the unit is dropped. There is no manual
//! invalidation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cookies::CookiesHandle;
use crate::draft_mode::DraftModeHandle;
use crate::headers::HeadersHandle;

/// What a memoized handle is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoKey {
    /// The work unit itself (phase-bound handles, e.g. deferred handles).
    Unit,
    /// A raw underlying resource, by identity.
    Source(usize),
    /// No underlying resource (e.g. the empty draft mode).
    Absent,
}

impl MemoKey {
    /// Key on the identity of a shared resource.
    pub fn source<T: ?Sized>(resource: &Arc<T>) -> Self {
        Self::Source(Arc::as_ptr(resource).cast::<()>() as usize)
    }

    /// Key on an optional resource, falling back to [`MemoKey::Absent`].
    pub fn optional<T: ?Sized>(resource: Option<&Arc<T>>) -> Self {
        resource.map_or(Self::Absent, Self::source)
    }
}

/// Get-or-create map from key to handle.
///
/// Creation runs under the registry lock, so concurrent callers racing on
/// the same key observe a single installed handle.
#[derive(Debug)]
pub struct MemoRegistry<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> MemoRegistry<K, V> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the handle for `key`, creating it on first use.
    pub fn get_or_create(&self, key: K, create: impl FnOnce() -> V) -> V {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(create)
            .clone()
    }

    /// Look up an existing handle.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of memoized handles.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V: Clone> Default for MemoRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-unit arena with an isolated registry for each resource kind.
#[derive(Default)]
pub struct HandleArena {
    pub(crate) cookies: MemoRegistry<MemoKey, CookiesHandle>,
    pub(crate) headers: MemoRegistry<MemoKey, HeadersHandle>,
    pub(crate) draft_mode: MemoRegistry<MemoKey, DraftModeHandle>,
}

impl HandleArena {
    /// Total number of handles held by the arena.
    pub fn len(&self) -> usize {
        self.cookies.len() + self.headers.len() + self.draft_mode.len()
    }

    /// Whether the arena holds no handles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_same_value() {
        let registry: MemoRegistry<MemoKey, Arc<String>> = MemoRegistry::new();
        let first = registry.get_or_create(MemoKey::Unit, || Arc::new("a".to_string()));
        let second = registry.get_or_create(MemoKey::Unit, || Arc::new("b".to_string()));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, "a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_source_keys_by_identity() {
        let a = Arc::new(1u8);
        let b = Arc::new(1u8);
        assert_eq!(MemoKey::source(&a), MemoKey::source(&a.clone()));
        assert_ne!(MemoKey::source(&a), MemoKey::source(&b));
        assert_eq!(MemoKey::optional::<u8>(None), MemoKey::Absent);
    }

    #[test]
    fn test_source_keys_for_trait_objects() {
        let a: Arc<dyn Send + Sync> = Arc::new(5u32);
        let b = a.clone();
        assert_eq!(MemoKey::source(&a), MemoKey::source(&b));
    }

    #[test]
    fn test_concurrent_single_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry: Arc<MemoRegistry<MemoKey, Arc<usize>>> = Arc::new(MemoRegistry::new());
        let created = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let created = created.clone();
                std::thread::spawn(move || {
                    registry.get_or_create(MemoKey::Unit, || {
                        created.fetch_add(1, Ordering::SeqCst);
                        Arc::new(i)
                    })
                })
            })
            .collect();

        let values: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
