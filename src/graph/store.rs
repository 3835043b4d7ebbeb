//! Concurrent node index for the evaluation graph.

use std::ops::{Deref, DerefMut};

use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;

use super::entry::NodeEntry;
use super::key::FocusKey;
use crate::error::FocusError;
use crate::pool::VisitorPool;

/// Shared read guard over a node entry.
pub struct NodeRef<'a, K: FocusKey> {
    inner: Ref<'a, K, NodeEntry<K>>,
}

impl<'a, K: FocusKey> Deref for NodeRef<'a, K> {
    type Target = NodeEntry<K>;

    fn deref(&self) -> &NodeEntry<K> {
        self.inner.value()
    }
}

/// Exclusive guard over a node entry, for scoped mutation.
pub struct NodeRefMut<'a, K: FocusKey> {
    inner: RefMut<'a, K, NodeEntry<K>>,
}

impl<'a, K: FocusKey> Deref for NodeRefMut<'a, K> {
    type Target = NodeEntry<K>;

    fn deref(&self) -> &NodeEntry<K> {
        self.inner.value()
    }
}

impl<'a, K: FocusKey> DerefMut for NodeRefMut<'a, K> {
    fn deref_mut(&mut self) -> &mut NodeEntry<K> {
        self.inner.value_mut()
    }
}

/// Thread-safe index of node entries by key.
///
/// The graph exclusively owns its entries; callers borrow them through
/// short-lived guards. Guards hold a shard lock, so do not call back into
/// the graph for the same key while one is live.
pub struct InMemoryGraph<K: FocusKey> {
    nodes: DashMap<K, NodeEntry<K>>,
}

impl<K: FocusKey> Default for InMemoryGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FocusKey> InMemoryGraph<K> {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
        }
    }

    /// Insert or replace a node entry. Population seam for the evaluation
    /// engine; the focuser never inserts.
    pub fn insert(&self, key: K, entry: NodeEntry<K>) -> Option<NodeEntry<K>> {
        self.nodes.insert(key, entry)
    }

    pub fn get(&self, key: &K) -> Option<NodeRef<'_, K>> {
        self.nodes.get(key).map(|inner| NodeRef { inner })
    }

    pub fn get_mut(&self, key: &K) -> Option<NodeRefMut<'_, K>> {
        self.nodes.get_mut(key).map(|inner| NodeRefMut { inner })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Remove a node from the index. Idempotent. Under parallel iteration
    /// this is only safe for the node the visitor is currently visiting.
    pub fn remove(&self, key: &K) -> Option<NodeEntry<K>> {
        self.nodes.remove(key).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Snapshot of all keys currently in the index.
    pub fn keys(&self) -> Vec<K> {
        self.nodes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Compact the index after bulk deletions. Callers must be at
    /// quiescence; this must not race other index operations.
    pub fn shrink(&self) {
        self.nodes.shrink_to_fit();
    }

    /// Visit every node exactly once, in unspecified order, with the pool's
    /// parallelism. The visitor may mutate the visited node through
    /// [`get_mut`](InMemoryGraph::get_mut) and may
    /// [`remove`](InMemoryGraph::remove) it. Blocks until every visit has
    /// completed, surfacing the first visitor error.
    pub(crate) fn parallel_for_each<'s, F>(
        &self,
        pool: &VisitorPool<'s>,
        visitor: &'s F,
    ) -> Result<(), FocusError>
    where
        F: Fn(&K) -> Result<(), FocusError> + Send + Sync,
    {
        let keys = self.keys();
        if !keys.is_empty() {
            let chunk_len = keys
                .len()
                .div_ceil(pool.parallelism() * 4)
                .clamp(1, 512);
            for chunk in keys.chunks(chunk_len) {
                let chunk = chunk.to_vec();
                pool.submit(move |_| {
                    for key in &chunk {
                        visitor(key)?;
                    }
                    Ok(())
                });
            }
        }
        pool.await_quiescence()
    }
}
