//! The focus operation: prune the evaluation graph down to the minimum
//! subgraph that keeps incremental builds correct for a set of active
//! directories.

mod mark;
mod sweep;

use std::collections::BTreeSet;
use std::time::Instant;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use crate::cache::ActionCache;
use crate::config::FocusOptions;
use crate::error::FocusError;
use crate::graph::{FocusKey, InMemoryGraph};
use crate::pool::VisitorPool;

use mark::MarkCtx;
use sweep::{SweepCtx, SweepStats};

/// Reverse-edge totals across the nodes the sweep rewrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStats {
    /// Reverse edges observed on rewritten nodes before removal.
    pub rdep_edges_before: u64,
    /// Reverse edges still present on rewritten nodes after removal.
    pub rdep_edges_after: u64,
}

/// Immutable snapshot of a completed focus run.
///
/// The graph itself is modified in place; this records which keys survived
/// and in which role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FocusResult<K: FocusKey> {
    roots: BTreeSet<K>,
    leaves: BTreeSet<K>,
    rdeps: BTreeSet<K>,
    deps: BTreeSet<K>,
    verification_set: BTreeSet<K>,
    edge_stats: EdgeStats,
}

impl<K: FocusKey> FocusResult<K> {
    /// The top-level keys the caller asked to protect, as given.
    pub fn roots(&self) -> &BTreeSet<K> {
        &self.roots
    }

    /// The active-directory keys, as given.
    pub fn leaves(&self) -> &BTreeSet<K> {
        &self.leaves
    }

    /// Keys in the reverse transitive closure of the leaves.
    pub fn rdeps(&self) -> &BTreeSet<K> {
        &self.rdeps
    }

    /// Frontier keys: deps of the reverse closure (and seeded roots),
    /// retained with their outgoing edges cleared.
    pub fn deps(&self) -> &BTreeSet<K> {
        &self.deps
    }

    /// Filesystem witnesses retained for the external checker.
    pub fn verification_set(&self) -> &BTreeSet<K> {
        &self.verification_set
    }

    pub fn edge_stats(&self) -> EdgeStats {
        self.edge_stats
    }
}

/// Prune `graph` to the minimum subgraph preserving incremental-build
/// correctness for the `leaves` (active directories), keeping `roots`
/// anchored and leaving behind a verification set of filesystem witnesses.
///
/// Roots are seeded as kept even when they are outside the leaves' reverse
/// closure: some top-level keys are re-evaluated on every build, and
/// pruning them would only force a wasteful recomputation of their whole
/// closure on the next invocation.
///
/// Every leaf must have a node entry in the graph. When `action_cache` is
/// given, deleting a node whose value carries actions also evicts each
/// action's output paths from the cache.
pub fn focus<K: FocusKey>(
    graph: &InMemoryGraph<K>,
    action_cache: Option<&dyn ActionCache>,
    roots: &BTreeSet<K>,
    leaves: &BTreeSet<K>,
    options: &FocusOptions,
) -> Result<FocusResult<K>, FocusError> {
    let kept_rdeps: DashSet<K> = DashSet::new();
    let kept_deps: DashSet<K> = DashSet::new();
    let verification_set: DashSet<K> = DashSet::new();
    let verification_set_seen: DashSet<K> = DashSet::new();

    // All leaves are rdeps, all roots are deps, by definition.
    for leaf in leaves {
        kept_rdeps.insert(leaf.clone());
    }
    for root in roots {
        kept_deps.insert(root.clone());
    }

    let mark_ctx = MarkCtx {
        graph,
        kept_rdeps: &kept_rdeps,
        kept_deps: &kept_deps,
        verification_set: &verification_set,
        verification_set_seen: &verification_set_seen,
        rdep_warning_threshold: options.rdep_warning_threshold(),
        dep_warning_threshold: options.dep_warning_threshold(),
        cancel: options.cancel().clone(),
    };

    let stats = SweepStats::default();
    let sweep_ctx = SweepCtx {
        graph,
        action_cache,
        kept_rdeps: &kept_rdeps,
        kept_deps: &kept_deps,
        verification_set: &verification_set,
        stats: &stats,
        cancel: options.cancel().clone(),
    };
    let sweep_visitor = |key: &K| sweep::sweep_node(&sweep_ctx, key);

    std::thread::scope(|scope| {
        let pool = VisitorPool::start(scope, options.parallelism());

        let outcome = (|| {
            {
                let span = info_span!("focus.mark");
                let _enter = span.enter();
                let started = Instant::now();

                let mark_ctx = &mark_ctx;
                for leaf in leaves {
                    let leaf = leaf.clone();
                    pool.submit(move |pool| mark::visit_node(mark_ctx, pool, leaf));
                }
                pool.await_quiescence()?;

                debug!(
                    elapsed = ?started.elapsed(),
                    rdeps = kept_rdeps.len(),
                    deps = kept_deps.len(),
                    verification = verification_set.len(),
                    "mark phase complete"
                );
            }

            // The reverse closure dominates the partition.
            kept_deps.retain(|key| !kept_rdeps.contains(key));
            // The verification set must not shadow anything the frontier
            // already protects.
            verification_set.retain(|key| !kept_deps.contains(key));

            {
                let span = info_span!("focus.sweep");
                let _enter = span.enter();
                let started = Instant::now();
                let nodes_before = graph.len();

                graph.parallel_for_each(&pool, &sweep_visitor)?;
                graph.shrink();

                debug!(
                    elapsed = ?started.elapsed(),
                    nodes_before,
                    nodes_after = graph.len(),
                    "sweep phase complete"
                );
            }

            Ok(())
        })();

        pool.shutdown();
        outcome
    })?;

    let rdeps: BTreeSet<K> = kept_rdeps.iter().map(|key| key.key().clone()).collect();
    let deps: BTreeSet<K> = kept_deps.iter().map(|key| key.key().clone()).collect();
    // A witness can be promoted into the reverse closure after collection;
    // the closure wins.
    let verification_set: BTreeSet<K> = verification_set
        .iter()
        .map(|key| key.key().clone())
        .filter(|key| !rdeps.contains(key))
        .collect();

    Ok(FocusResult {
        roots: roots.clone(),
        leaves: leaves.clone(),
        rdeps,
        deps,
        verification_set,
        edge_stats: EdgeStats {
            rdep_edges_before: stats
                .rdep_edges_before
                .load(std::sync::atomic::Ordering::Relaxed),
            rdep_edges_after: stats
                .rdep_edges_after
                .load(std::sync::atomic::Ordering::Relaxed),
        },
    })
}
