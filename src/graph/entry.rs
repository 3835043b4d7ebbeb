//! Per-node state: lifecycle, value, and edge sets.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::key::FocusKey;

/// Where a node is in its evaluation lifecycle.
///
/// Entries pre-exist the focuser; it only ever reads this state, it never
/// advances it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Value and finalized edge sets are available.
    Done,
    /// Invalidated by a build-id bump this build; may legitimately remain
    /// unevaluated.
    CheckDependencies,
    /// Any other not-done state.
    NotDone,
}

/// One action recorded on an analysis value, identified by its output
/// exec paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    outputs: Vec<String>,
}

impl ActionRecord {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    /// Output exec paths, addressing entries in the action cache.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}

/// Evaluated value stored on a done node.
///
/// The focuser treats values as opaque except for one distinction: analysis
/// values carrying actions, whose cached outputs must be evicted when the
/// node is deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeValue {
    /// Value with no focus-relevant structure.
    Opaque,
    /// Analysis value carrying actions with cached outputs.
    ActionLookup(Vec<ActionRecord>),
}

/// A node entry in the evaluation graph.
///
/// Direct deps are the keys this node consumed during evaluation; reverse
/// deps are the keys that consumed it. For done nodes the two edge sets are
/// symmetric across the graph. Reverse-dep removal is batched: callers mark
/// edges with [`remove_reverse_dep`](NodeEntry::remove_reverse_dep) and
/// publish the batch with
/// [`consolidate_reverse_deps`](NodeEntry::consolidate_reverse_deps); reads
/// in between see the stale edges.
#[derive(Clone, Debug)]
pub struct NodeEntry<K> {
    lifecycle: LifecycleState,
    value: Option<NodeValue>,
    direct_deps: Vec<K>,
    reverse_deps: Vec<K>,
    pending_rdep_removals: Vec<K>,
}

impl<K: FocusKey> NodeEntry<K> {
    /// A done entry holding an evaluated value.
    pub fn done(value: NodeValue) -> Self {
        Self {
            lifecycle: LifecycleState::Done,
            value: Some(value),
            direct_deps: Vec::new(),
            reverse_deps: Vec::new(),
            pending_rdep_removals: Vec::new(),
        }
    }

    /// An entry invalidated by a build-id bump, waiting on a dependency
    /// check.
    pub fn check_dependencies() -> Self {
        Self::undone(LifecycleState::CheckDependencies)
    }

    /// An entry in any other not-done state.
    pub fn not_done() -> Self {
        Self::undone(LifecycleState::NotDone)
    }

    fn undone(lifecycle: LifecycleState) -> Self {
        Self {
            lifecycle,
            value: None,
            direct_deps: Vec::new(),
            reverse_deps: Vec::new(),
            pending_rdep_removals: Vec::new(),
        }
    }

    /// Record a direct dependency. Population seam for the evaluation
    /// engine; the focuser never adds edges.
    pub fn add_direct_dep(&mut self, dep: K) {
        self.direct_deps.push(dep);
    }

    /// Record a reverse dependency. Population seam for the evaluation
    /// engine; the focuser never adds edges.
    pub fn add_reverse_dep(&mut self, rdep: K) {
        self.reverse_deps.push(rdep);
    }

    pub fn is_done(&self) -> bool {
        self.lifecycle == LifecycleState::Done
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    /// The evaluated value; `None` for not-done entries.
    pub fn value(&self) -> Option<&NodeValue> {
        self.value.as_ref()
    }

    pub fn direct_deps(&self) -> &[K] {
        &self.direct_deps
    }

    /// Consolidated reverse deps. Only meaningful on done entries.
    pub fn reverse_deps_done(&self) -> &[K] {
        debug_assert!(self.is_done(), "reverse deps read on a not-done entry");
        &self.reverse_deps
    }

    /// Drop every outgoing dep edge. Used when the node becomes a frontier:
    /// it will not be dirtied again, so the edges carry no information.
    pub fn clear_direct_deps_for_focus(&mut self) {
        self.direct_deps = Vec::new();
    }

    /// Mark one reverse-dep edge for removal. The edge stays visible until
    /// the batch is published with
    /// [`consolidate_reverse_deps`](NodeEntry::consolidate_reverse_deps).
    pub fn remove_reverse_dep(&mut self, rdep: K) {
        self.pending_rdep_removals.push(rdep);
    }

    /// Apply batched reverse-dep removals and normalize storage.
    pub fn consolidate_reverse_deps(&mut self) {
        if !self.pending_rdep_removals.is_empty() {
            let removals: HashSet<K> = self.pending_rdep_removals.drain(..).collect();
            self.reverse_deps.retain(|rdep| !removals.contains(rdep));
        }
        self.reverse_deps.shrink_to_fit();
        self.pending_rdep_removals = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn done_entry_exposes_value_and_edges() {
        let mut entry: NodeEntry<String> = NodeEntry::done(NodeValue::Opaque);
        entry.add_direct_dep(key("a"));
        entry.add_reverse_dep(key("b"));

        assert!(entry.is_done());
        assert_eq!(entry.lifecycle(), LifecycleState::Done);
        assert_eq!(entry.value(), Some(&NodeValue::Opaque));
        assert_eq!(entry.direct_deps(), [key("a")]);
        assert_eq!(entry.reverse_deps_done(), [key("b")]);
    }

    #[test]
    fn undone_entries_have_no_value() {
        let entry: NodeEntry<String> = NodeEntry::check_dependencies();
        assert!(!entry.is_done());
        assert_eq!(entry.lifecycle(), LifecycleState::CheckDependencies);
        assert!(entry.value().is_none());

        let entry: NodeEntry<String> = NodeEntry::not_done();
        assert_eq!(entry.lifecycle(), LifecycleState::NotDone);
    }

    #[test]
    fn rdep_removal_is_batched_until_consolidation() {
        let mut entry: NodeEntry<String> = NodeEntry::done(NodeValue::Opaque);
        entry.add_reverse_dep(key("a"));
        entry.add_reverse_dep(key("b"));
        entry.add_reverse_dep(key("c"));

        entry.remove_reverse_dep(key("b"));
        // Stale read: the batch is not published yet.
        assert_eq!(entry.reverse_deps_done().len(), 3);

        entry.consolidate_reverse_deps();
        assert_eq!(entry.reverse_deps_done(), [key("a"), key("c")]);
    }

    #[test]
    fn consolidate_with_empty_batch_is_a_no_op() {
        let mut entry: NodeEntry<String> = NodeEntry::done(NodeValue::Opaque);
        entry.add_reverse_dep(key("a"));
        entry.consolidate_reverse_deps();
        assert_eq!(entry.reverse_deps_done(), [key("a")]);
    }

    #[test]
    fn clear_direct_deps_drops_all_outgoing_edges() {
        let mut entry: NodeEntry<String> = NodeEntry::done(NodeValue::Opaque);
        entry.add_direct_dep(key("a"));
        entry.add_direct_dep(key("b"));
        entry.clear_direct_deps_for_focus();
        assert!(entry.direct_deps().is_empty());
    }

    #[test]
    fn action_record_round_trips_outputs() {
        let record = ActionRecord::new(["bin/out", "bin/out.map"]);
        assert_eq!(record.outputs(), ["bin/out", "bin/out.map"]);
    }
}
