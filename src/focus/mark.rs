//! Upward mark phase and downward verification collection.
//!
//! Marking walks reverse-dep edges from the leaves toward the roots. Every
//! newly marked node gets a visitor task of its own, so the walk fans out
//! across the pool instead of recursing; the atomic insert on the kept sets
//! guarantees each key is visited at most once. Each marked node also
//! contributes its direct deps to the kept frontier, and every new frontier
//! key seeds a downward walk that collects filesystem witnesses for the
//! verification set.

use dashmap::DashSet;
use tracing::warn;

use crate::config::CancelFlag;
use crate::error::FocusError;
use crate::graph::{FocusKey, InMemoryGraph, LifecycleState};
use crate::pool::PoolHandle;

/// Shared state of the mark phase. All sets support atomic
/// insert-returning-novelty; "contains then insert" is never correct here.
pub(crate) struct MarkCtx<'a, K: FocusKey> {
    pub(crate) graph: &'a InMemoryGraph<K>,
    /// Keys in the reverse transitive closure of the leaves.
    pub(crate) kept_rdeps: &'a DashSet<K>,
    /// Direct deps of marked nodes (the frontier), plus the seeded roots.
    pub(crate) kept_deps: &'a DashSet<K>,
    /// Filesystem witnesses found by the downward walk.
    pub(crate) verification_set: &'a DashSet<K>,
    /// Keys already expanded by the downward walk.
    pub(crate) verification_set_seen: &'a DashSet<K>,
    pub(crate) rdep_warning_threshold: usize,
    pub(crate) dep_warning_threshold: usize,
    pub(crate) cancel: CancelFlag,
}

/// Visit one marked node: fan out to its rdeps, mark its deps, and seed
/// verification collection for every new frontier key.
pub(crate) fn visit_node<'s, K: FocusKey>(
    ctx: &'s MarkCtx<'s, K>,
    pool: &PoolHandle<'s>,
    key: K,
) -> Result<(), FocusError> {
    if ctx.cancel.is_cancelled() {
        return Err(FocusError::Interrupted);
    }

    let Some(node) = ctx.graph.get(&key) else {
        return Err(FocusError::missing_node(&key));
    };

    if !node.is_done() {
        if node.lifecycle() == LifecycleState::CheckDependencies {
            // Invalidated by the build-id bump this build and legitimately
            // unevaluated. Demote it: drop the speculative mark placed by
            // the parent visitor and stop the walk here. The entry itself
            // stays in the graph for a later build.
            ctx.kept_rdeps.remove(&key);
            return Ok(());
        }
        return Err(FocusError::not_done(&key));
    }

    let mut rdep_count = 0usize;
    for rdep in node.reverse_deps_done() {
        rdep_count += 1;
        if !ctx.kept_rdeps.insert(rdep.clone()) {
            // Already marked by another visitor.
            continue;
        }
        let rdep = rdep.clone();
        pool.submit(move |pool| visit_node(ctx, pool, rdep));
    }
    if rdep_count > ctx.rdep_warning_threshold {
        warn!(
            key = %key,
            rdeps = rdep_count,
            threshold = ctx.rdep_warning_threshold,
            "reverse-dep fan-out exceeds warning threshold"
        );
    }

    let mut dep_count = 0usize;
    for dep in node.direct_deps() {
        dep_count += 1;
        if !ctx.kept_deps.insert(dep.clone()) {
            continue;
        }
        maybe_collect_verification(ctx, pool, dep);

        // Nested sets encapsulate action inputs consumed without
        // per-artifact edges; keep the members reachable or they go
        // missing on the next build.
        if let Some(artifacts) = dep.expand_nested_artifacts() {
            for artifact in artifacts {
                if ctx.kept_deps.insert(artifact.clone()) {
                    maybe_collect_verification(ctx, pool, &artifact);
                }
            }
        }
    }
    if dep_count > ctx.dep_warning_threshold {
        warn!(
            key = %key,
            deps = dep_count,
            threshold = ctx.dep_warning_threshold,
            "direct-dep fan-out exceeds warning threshold"
        );
    }

    Ok(())
}

/// Cheap pre-checks before enqueueing a downward collection task.
///
/// Witnesses terminate the walk and move out of the frontier: they belong
/// to the verification set, where the sweep flattens them into leaves the
/// filesystem checker can observe.
pub(crate) fn maybe_collect_verification<'s, K: FocusKey>(
    ctx: &'s MarkCtx<'s, K>,
    pool: &PoolHandle<'s>,
    key: &K,
) {
    if ctx.kept_rdeps.contains(key) {
        // Already protected by the active reverse closure.
        return;
    }

    if key.is_filesystem_witness() {
        ctx.verification_set.insert(key.clone());
        ctx.kept_deps.remove(key);
        return;
    }

    if !ctx.verification_set_seen.insert(key.clone()) {
        // Another walk already expanded this subgraph.
        return;
    }

    let key = key.clone();
    pool.submit(move |pool| collect_verification(ctx, pool, key));
}

/// Continue the downward walk through one node's direct deps.
fn collect_verification<'s, K: FocusKey>(
    ctx: &'s MarkCtx<'s, K>,
    pool: &PoolHandle<'s>,
    key: K,
) -> Result<(), FocusError> {
    if ctx.cancel.is_cancelled() {
        return Err(FocusError::Interrupted);
    }

    let Some(node) = ctx.graph.get(&key) else {
        return Err(FocusError::internal(format!(
            "verification walk reached `{key}` but the graph has no entry for it"
        )));
    };
    for dep in node.direct_deps() {
        maybe_collect_verification(ctx, pool, dep);
    }
    Ok(())
}
