//! End-to-end focus scenarios over small hand-built graphs.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

use focusgc::test_harness::{file, nested, node, GraphBuilder, RecordingActionCache, TestKey};
use focusgc::{
    focus, ActionRecord, CancelFlag, FocusError, FocusOptions, LifecycleState, NodeValue,
};

fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn keys(items: &[TestKey]) -> BTreeSet<TestKey> {
    items.iter().cloned().collect()
}

/// `R -> M -> L`, all done.
fn linear_chain() -> focusgc::InMemoryGraph<TestKey> {
    GraphBuilder::new()
        .add(node("R"))
        .add(node("M"))
        .add(file("L"))
        .edge(node("R"), node("M"))
        .edge(node("M"), file("L"))
        .build()
}

/// `R -> {A, B}`, both `-> L` and `-> W`; `W` is a witness outside the
/// leaves.
fn diamond() -> focusgc::InMemoryGraph<TestKey> {
    GraphBuilder::new()
        .add(node("R"))
        .add(node("A"))
        .add(node("B"))
        .add(file("L"))
        .add(file("W"))
        .edge(node("R"), node("A"))
        .edge(node("R"), node("B"))
        .edge(node("A"), file("L"))
        .edge(node("A"), file("W"))
        .edge(node("B"), file("L"))
        .edge(node("B"), file("W"))
        .build()
}

#[test]
fn linear_chain_keeps_the_whole_reverse_closure() {
    init_tracing();
    let graph = linear_chain();
    let result = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &keys(&[file("L")]),
        &FocusOptions::new(),
    )
    .unwrap();

    assert_eq!(result.rdeps(), &keys(&[file("L"), node("M"), node("R")]));
    assert!(result.deps().is_empty());
    assert!(result.verification_set().is_empty());

    // The reverse closure keeps its edges untouched.
    assert_eq!(graph.len(), 3);
    assert_eq!(
        graph.get(&node("M")).unwrap().reverse_deps_done(),
        [node("R")]
    );
    assert_eq!(graph.get(&node("R")).unwrap().direct_deps(), [node("M")]);
    assert_eq!(result.edge_stats().rdep_edges_before, 0);
    assert_eq!(result.edge_stats().rdep_edges_after, 0);
}

#[test]
fn diamond_collects_the_external_witness() {
    init_tracing();
    let graph = diamond();
    let result = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &keys(&[file("L")]),
        &FocusOptions::new(),
    )
    .unwrap();

    assert_eq!(
        result.rdeps(),
        &keys(&[file("L"), node("A"), node("B"), node("R")])
    );
    assert!(result.deps().is_empty());
    assert_eq!(result.verification_set(), &keys(&[file("W")]));

    // The witness is flattened into a leaf.
    assert!(graph
        .get(&file("W"))
        .unwrap()
        .reverse_deps_done()
        .is_empty());
    assert_eq!(result.edge_stats().rdep_edges_before, 2);
    assert_eq!(result.edge_stats().rdep_edges_after, 0);
}

#[test]
fn unrelated_subgraph_is_pruned_and_its_actions_evicted() {
    init_tracing();
    let graph = GraphBuilder::new()
        .add(node("R"))
        .add(node("M"))
        .add(file("L"))
        .add_with_value(
            node("U"),
            NodeValue::ActionLookup(vec![
                ActionRecord::new(["out/u.bin"]),
                ActionRecord::new(["out/u.map", "out/u.d"]),
            ]),
        )
        .edge(node("R"), node("M"))
        .edge(node("M"), file("L"))
        .build();

    let cache = RecordingActionCache::new();
    let result = focus(
        &graph,
        Some(&cache),
        &keys(&[node("R")]),
        &keys(&[file("L")]),
        &FocusOptions::new(),
    )
    .unwrap();

    assert!(!graph.contains(&node("U")));
    assert!(!result.rdeps().contains(&node("U")));
    assert!(!result.deps().contains(&node("U")));
    assert!(!result.verification_set().contains(&node("U")));

    for output in ["out/u.bin", "out/u.map", "out/u.d"] {
        assert_eq!(cache.removal_count(output), 1, "{output}");
    }
}

#[test]
fn check_dependencies_nodes_are_demoted_and_retained() {
    init_tracing();
    let graph = GraphBuilder::new()
        .add(node("R"))
        .add_check_dependencies(node("M"))
        .add(file("L"))
        .edge(node("R"), node("M"))
        .edge(node("M"), file("L"))
        .build();

    let result = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &keys(&[file("L")]),
        &FocusOptions::new(),
    )
    .unwrap();

    // The walk stopped at M: it never propagated to R.
    assert_eq!(result.rdeps(), &keys(&[file("L")]));
    assert_eq!(result.deps(), &keys(&[node("R")]));

    // M is retained untouched for a later build; R became a frontier.
    let m = graph.get(&node("M")).unwrap();
    assert_eq!(m.lifecycle(), LifecycleState::CheckDependencies);
    let r = graph.get(&node("R")).unwrap();
    assert!(r.direct_deps().is_empty());

    // The demotion leaves a dangling back-edge: L still records M as an
    // rdep even though M is no longer in the kept reverse closure. Edge
    // retention holds among done nodes only.
    assert_eq!(
        graph.get(&file("L")).unwrap().reverse_deps_done(),
        [node("M")]
    );
    assert!(!result.rdeps().contains(&node("M")));
}

#[test]
fn not_done_root_is_retained_untouched() {
    init_tracing();
    let graph = GraphBuilder::new()
        .add_check_dependencies(node("R"))
        .add(node("M"))
        .add(file("L"))
        .edge(node("R"), node("M"))
        .edge(node("M"), file("L"))
        .build();

    let result = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &keys(&[file("L")]),
        &FocusOptions::new(),
    )
    .unwrap();

    // R was speculatively marked through M's rdeps and demoted again, so
    // only its root seeding keeps it.
    assert_eq!(result.rdeps(), &keys(&[file("L"), node("M")]));
    assert_eq!(result.deps(), &keys(&[node("R")]));

    // A not-done root is not rewritten into a frontier: its stale edges
    // survive untouched.
    let r = graph.get(&node("R")).unwrap();
    assert_eq!(r.lifecycle(), LifecycleState::CheckDependencies);
    assert_eq!(r.direct_deps(), [node("M")]);
}

#[test]
fn not_done_witness_is_retained_untouched() {
    init_tracing();
    let graph = GraphBuilder::new()
        .add(node("R"))
        .add_not_done(file("W"))
        .edge(node("R"), file("W"))
        .build();

    let result = focus(
        &graph,
        None,
        &BTreeSet::new(),
        &keys(&[node("R")]),
        &FocusOptions::new(),
    )
    .unwrap();

    // The witness predicate is key-only, so the unevaluated file is still
    // collected; the sweep retains it without flattening.
    assert_eq!(result.verification_set(), &keys(&[file("W")]));
    let w = graph.get(&file("W")).unwrap();
    assert_eq!(w.lifecycle(), LifecycleState::NotDone);
}

#[test]
fn nested_artifact_sets_expand_into_the_frontier() {
    init_tracing();
    let inputs = nested("inputs", &[node("a1"), node("a2")]);
    let graph = GraphBuilder::new()
        .add(node("R"))
        .add(inputs.clone())
        .add(node("a1"))
        .add(node("a2"))
        .add(file("W1"))
        .edge(node("R"), inputs.clone())
        .edge(inputs.clone(), node("a1"))
        .edge(inputs.clone(), node("a2"))
        .edge(node("a1"), file("W1"))
        .build();

    let result = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &keys(&[node("R")]),
        &FocusOptions::new(),
    )
    .unwrap();

    // The degenerate leaf-root lands in the reverse closure; the nested set
    // and its members are all kept as frontier deps.
    assert_eq!(result.rdeps(), &keys(&[node("R")]));
    assert_eq!(
        result.deps(),
        &keys(&[inputs.clone(), node("a1"), node("a2")])
    );
    assert_eq!(result.verification_set(), &keys(&[file("W1")]));

    // Frontier nodes lost their outgoing edges; only edges back into the
    // reverse closure survive.
    assert!(graph.get(&node("a1")).unwrap().direct_deps().is_empty());
    assert!(graph
        .get(&node("a1"))
        .unwrap()
        .reverse_deps_done()
        .is_empty());
    assert_eq!(
        graph.get(&inputs).unwrap().reverse_deps_done(),
        [node("R")]
    );
    assert!(graph
        .get(&file("W1"))
        .unwrap()
        .reverse_deps_done()
        .is_empty());
}

#[test]
fn focus_is_idempotent() {
    init_tracing();
    let graph = diamond();
    let roots = keys(&[node("R")]);
    let leaves = keys(&[file("L")]);

    let first = focus(&graph, None, &roots, &leaves, &FocusOptions::new()).unwrap();
    let second = focus(&graph, None, &roots, &leaves, &FocusOptions::new()).unwrap();

    assert_eq!(first.rdeps(), second.rdeps());
    assert_eq!(first.deps(), second.deps());
    assert_eq!(first.verification_set(), second.verification_set());

    // The second sweep finds nothing left to remove.
    assert_eq!(
        second.edge_stats().rdep_edges_after,
        second.edge_stats().rdep_edges_before
    );
    assert!(second.edge_stats().rdep_edges_before <= first.edge_stats().rdep_edges_before);
}

#[test]
fn missing_leaf_is_fatal() {
    init_tracing();
    let graph = linear_chain();
    let error = focus(
        &graph,
        None,
        &BTreeSet::new(),
        &keys(&[file("ghost")]),
        &FocusOptions::new(),
    )
    .unwrap_err();

    match error {
        FocusError::MissingNode { key } => assert_eq!(key, "file:ghost"),
        other => panic!("expected MissingNode, got {other:?}"),
    }
}

#[test]
fn not_done_rdep_is_fatal() {
    init_tracing();
    let graph = GraphBuilder::new()
        .add(file("L"))
        .add_not_done(node("X"))
        .edge(node("X"), file("L"))
        .build();

    let error = focus(
        &graph,
        None,
        &BTreeSet::new(),
        &keys(&[file("L")]),
        &FocusOptions::new(),
    )
    .unwrap_err();

    match error {
        FocusError::NotDone { key } => assert_eq!(key, "node:X"),
        other => panic!("expected NotDone, got {other:?}"),
    }
}

#[test]
fn cancelled_run_surfaces_interrupted() {
    init_tracing();
    let graph = linear_chain();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let error = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &keys(&[file("L")]),
        &FocusOptions::new().with_cancel(cancel),
    )
    .unwrap_err();

    assert!(matches!(error, FocusError::Interrupted));
}

#[test]
fn overlapping_roots_and_leaves_resolve_to_rdeps() {
    init_tracing();
    let graph = GraphBuilder::new().add(node("R")).build();
    let result = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &keys(&[node("R")]),
        &FocusOptions::new(),
    )
    .unwrap();

    assert_eq!(result.rdeps(), &keys(&[node("R")]));
    assert!(result.deps().is_empty());
}

#[test]
fn empty_leaves_keep_only_the_roots() {
    init_tracing();
    let graph = linear_chain();
    let result = focus(
        &graph,
        None,
        &keys(&[node("R")]),
        &BTreeSet::new(),
        &FocusOptions::new(),
    )
    .unwrap();

    assert!(result.rdeps().is_empty());
    assert_eq!(result.deps(), &keys(&[node("R")]));
    assert_eq!(graph.len(), 1);
    assert!(graph.contains(&node("R")));
}

#[test]
fn fanout_warnings_do_not_change_results() {
    init_tracing();
    let mut builder = GraphBuilder::new().add(file("C"));
    for n in 0..5 {
        let parent = node(&format!("P{n}"));
        builder = builder.add(parent.clone()).edge(parent, file("C"));
    }
    let graph = builder.build();

    let result = focus(
        &graph,
        None,
        &BTreeSet::new(),
        &keys(&[file("C")]),
        &FocusOptions::new().with_fanout_warning_threshold(2),
    )
    .unwrap();

    assert_eq!(result.rdeps().len(), 6);
    assert_eq!(graph.len(), 6);
}

#[test]
fn layered_graph_under_high_parallelism() {
    init_tracing();
    // files f0..f39, mids m0..m39 (mi -> fi, f(i+1)%40), tops t0..t9
    // (ti -> m{4i..4i+4}).
    let mut builder = GraphBuilder::new();
    for i in 0..40 {
        builder = builder
            .add(file(&format!("f{i}")))
            .add(node(&format!("m{i}")));
    }
    for i in 0..10 {
        builder = builder.add(node(&format!("t{i}")));
    }
    for i in 0..40 {
        builder = builder
            .edge(node(&format!("m{i}")), file(&format!("f{i}")))
            .edge(node(&format!("m{i}")), file(&format!("f{}", (i + 1) % 40)));
    }
    for i in 0..10 {
        for j in 0..4 {
            builder = builder.edge(node(&format!("t{i}")), node(&format!("m{}", 4 * i + j)));
        }
    }
    let graph = builder.build();

    let leaves = keys(&[file("f0"), file("f17")]);
    let roots = keys(&[node("t9")]);
    let result = focus(
        &graph,
        None,
        &roots,
        &leaves,
        &FocusOptions::new().with_parallelism(NonZeroUsize::new(8).unwrap()),
    )
    .unwrap();

    // Leaves and their dependers survive in the reverse closure.
    for leaf in &leaves {
        assert!(result.rdeps().contains(leaf));
    }
    // f0's dependers are m0 and m39, and their tops t0 and t9.
    for key in [node("m0"), node("m39"), node("t0"), node("t9")] {
        assert!(result.rdeps().contains(&key), "{key}");
    }

    // Partition holds.
    assert!(result.rdeps().is_disjoint(result.deps()));
    assert!(result.rdeps().is_disjoint(result.verification_set()));
    assert!(result.deps().is_disjoint(result.verification_set()));

    // Every surviving done node only points back into the closure.
    for key in graph.keys() {
        let entry = graph.get(&key).unwrap();
        if entry.is_done() {
            for rdep in entry.reverse_deps_done() {
                assert!(result.rdeps().contains(rdep), "{key} -> {rdep}");
            }
        }
    }
}
