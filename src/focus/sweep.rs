//! Sweep phase: rewrite every surviving node, delete the rest.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;

use crate::cache::ActionCache;
use crate::config::CancelFlag;
use crate::error::FocusError;
use crate::graph::{FocusKey, InMemoryGraph, NodeValue};

/// Reverse-edge totals across the nodes the sweep rewrites.
#[derive(Default)]
pub(crate) struct SweepStats {
    pub(crate) rdep_edges_before: AtomicU64,
    pub(crate) rdep_edges_after: AtomicU64,
}

pub(crate) struct SweepCtx<'a, K: FocusKey> {
    pub(crate) graph: &'a InMemoryGraph<K>,
    pub(crate) action_cache: Option<&'a dyn ActionCache>,
    pub(crate) kept_rdeps: &'a DashSet<K>,
    pub(crate) kept_deps: &'a DashSet<K>,
    pub(crate) verification_set: &'a DashSet<K>,
    pub(crate) stats: &'a SweepStats,
    pub(crate) cancel: CancelFlag,
}

/// Rewrite or delete one node. Runs under `parallel_for_each`, so each node
/// is touched by exactly one worker and the visited key is the only one this
/// function may remove.
pub(crate) fn sweep_node<K: FocusKey>(
    ctx: &SweepCtx<'_, K>,
    key: &K,
) -> Result<(), FocusError> {
    if ctx.cancel.is_cancelled() {
        return Err(FocusError::Interrupted);
    }

    if ctx.kept_rdeps.contains(key) {
        // Reverse closure of the leaves: every rdep of this node is itself
        // a kept rdep, so its edges stay valid untouched.
        return Ok(());
    }

    if ctx.kept_deps.contains(key) {
        let Some(mut node) = ctx.graph.get_mut(key) else {
            return Err(FocusError::internal(format!(
                "kept dep `{key}` vanished from the graph during sweep"
            )));
        };

        if !node.is_done() {
            // Roots are seeded without validation, so an invalidated and
            // unevaluated root lands here. Its edges are stale; leave it
            // untouched like any other not-done entry.
            return Ok(());
        }

        // This node is a frontier: it will not be dirtied again, so its
        // outgoing edges carry no information.
        node.clear_direct_deps_for_focus();

        // Drop rdep edges that do not point back into the dirty-able
        // reverse closure.
        let rdeps = node.reverse_deps_done().to_vec();
        ctx.stats
            .rdep_edges_before
            .fetch_add(rdeps.len() as u64, Ordering::Relaxed);
        let mut kept = 0u64;
        for rdep in rdeps {
            if ctx.kept_rdeps.contains(&rdep) {
                kept += 1;
            } else {
                node.remove_reverse_dep(rdep);
            }
        }
        node.consolidate_reverse_deps();
        ctx.stats
            .rdep_edges_after
            .fetch_add(kept, Ordering::Relaxed);
        return Ok(());
    }

    if ctx.verification_set.contains(key) {
        let Some(mut node) = ctx.graph.get_mut(key) else {
            return Err(FocusError::internal(format!(
                "verification witness `{key}` vanished from the graph during sweep"
            )));
        };

        if !node.is_done() {
            // Witness classification is a pure key predicate, so a
            // not-done node can be collected. Retain it untouched; its
            // reverse deps are not readable until it is done.
            return Ok(());
        }

        // Retained for the filesystem checker, but flattened into a leaf:
        // nothing that depends on it survives outside the kept sets.
        let rdeps = node.reverse_deps_done().to_vec();
        ctx.stats
            .rdep_edges_before
            .fetch_add(rdeps.len() as u64, Ordering::Relaxed);
        for rdep in rdeps {
            node.remove_reverse_dep(rdep);
        }
        node.consolidate_reverse_deps();
        return Ok(());
    }

    let evictions = {
        let Some(node) = ctx.graph.get(key) else {
            return Err(FocusError::internal(format!(
                "`{key}` vanished from the graph during sweep"
            )));
        };

        if !node.is_done() {
            // Invalidated but not reevaluated this build; may be needed by
            // a later one.
            return Ok(());
        }

        match (ctx.action_cache, node.value()) {
            (Some(_), Some(NodeValue::ActionLookup(actions))) => Some(actions.clone()),
            _ => None,
        }
    };

    if let (Some(cache), Some(actions)) = (ctx.action_cache, evictions) {
        for action in &actions {
            for output in action.outputs() {
                cache.remove(output);
            }
        }
    }

    ctx.graph.remove(key);
    Ok(())
}
