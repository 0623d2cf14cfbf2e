//! Per-document ownership registry.
//!
//! Every document owns exactly one `RegistryEntry`. The entry holds the
//! native tree, the identity map of outstanding node proxies, and the
//! counters that make the document's lifetime observable. The entry is
//! shared through `Arc`: document handles and node proxies each hold a
//! strong reference, so the tree is destroyed exactly when the last
//! handle of either kind goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::engine::{NodeId, Tree};
use crate::node::ProxyInner;

pub(crate) struct RegistryEntry {
    tree: RwLock<Tree>,
    /// Count of live handles (document handles plus node proxies).
    live: AtomicUsize,
    /// Identity map: at most one proxy per node. Guarded separately from
    /// the tree so proxy creation does not contend with readers.
    proxies: Mutex<HashMap<NodeId, Weak<ProxyInner>>>,
    /// Serializes whole-document passes such as XInclude processing.
    mutation: Mutex<()>,
}

impl RegistryEntry {
    pub(crate) fn new(tree: Tree) -> Arc<RegistryEntry> {
        let entry = Arc::new(RegistryEntry {
            tree: RwLock::new(tree),
            live: AtomicUsize::new(0),
            proxies: Mutex::new(HashMap::new()),
            mutation: Mutex::new(()),
        });
        entry.acquire();
        entry
    }

    /// Lock ordering: the tree lock is always taken before the proxies
    /// mutex, never the other way around.
    pub(crate) fn tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn tree_mut(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn proxies(&self) -> MutexGuard<'_, HashMap<NodeId, Weak<ProxyInner>>> {
        self.proxies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mutation_lock(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers one more live handle.
    pub(crate) fn acquire(&self) {
        self.live.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one live handle.
    pub(crate) fn release(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("live", &self.live_handles())
            .finish_non_exhaustive()
    }
}
