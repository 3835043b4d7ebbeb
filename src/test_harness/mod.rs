//! Shared test support: a key type with witness and nested-set structure,
//! a graph builder that wires symmetric edges, and a recording action
//! cache. Compiled into the crate so integration tests and embedders can
//! reuse it.

use std::fmt;
use std::sync::Mutex;

use crate::cache::ActionCache;
use crate::graph::{FocusKey, InMemoryGraph, LifecycleState, NodeEntry, NodeValue};

/// Evaluation-graph key for tests.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum TestKey {
    /// Ordinary computation key.
    Node(String),
    /// Rooted filesystem path; witness-eligible.
    File(String),
    /// Nested-set-of-artifacts key expanding to its members.
    NestedArtifacts(String, Vec<TestKey>),
}

/// `Node` key.
pub fn node(name: &str) -> TestKey {
    TestKey::Node(name.to_string())
}

/// Witness-eligible `File` key.
pub fn file(name: &str) -> TestKey {
    TestKey::File(name.to_string())
}

/// Nested-set key expanding to `members`.
pub fn nested(name: &str, members: &[TestKey]) -> TestKey {
    TestKey::NestedArtifacts(name.to_string(), members.to_vec())
}

impl fmt::Display for TestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestKey::Node(name) => write!(f, "node:{name}"),
            TestKey::File(name) => write!(f, "file:{name}"),
            TestKey::NestedArtifacts(name, _) => write!(f, "nested:{name}"),
        }
    }
}

impl FocusKey for TestKey {
    fn is_filesystem_witness(&self) -> bool {
        matches!(self, TestKey::File(_))
    }

    fn expand_nested_artifacts(&self) -> Option<Vec<Self>> {
        match self {
            TestKey::NestedArtifacts(_, members) => Some(members.clone()),
            _ => None,
        }
    }
}

/// Builds graphs with symmetric dep/rdep edges.
///
/// `edge(u, v)` records "u depends on v"; `build` materializes both the
/// direct-dep edge on `u` and the reverse-dep edge on `v`, matching what
/// the evaluation engine leaves behind after a finished build.
pub struct GraphBuilder {
    nodes: Vec<(TestKey, LifecycleState, NodeValue)>,
    edges: Vec<(TestKey, TestKey)>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a done node with an opaque value.
    pub fn add(mut self, key: TestKey) -> Self {
        self.nodes.push((key, LifecycleState::Done, NodeValue::Opaque));
        self
    }

    /// Add a done node with an explicit value.
    pub fn add_with_value(mut self, key: TestKey, value: NodeValue) -> Self {
        self.nodes.push((key, LifecycleState::Done, value));
        self
    }

    /// Add a node waiting on a dependency check.
    pub fn add_check_dependencies(mut self, key: TestKey) -> Self {
        self.nodes
            .push((key, LifecycleState::CheckDependencies, NodeValue::Opaque));
        self
    }

    /// Add a node in some other not-done state.
    pub fn add_not_done(mut self, key: TestKey) -> Self {
        self.nodes
            .push((key, LifecycleState::NotDone, NodeValue::Opaque));
        self
    }

    /// Record that `from` depends on `to`. Both endpoints must be added
    /// before `build`.
    pub fn edge(mut self, from: TestKey, to: TestKey) -> Self {
        self.edges.push((from, to));
        self
    }

    pub fn build(self) -> InMemoryGraph<TestKey> {
        let graph = InMemoryGraph::new();
        for (key, lifecycle, value) in self.nodes {
            let entry = match lifecycle {
                LifecycleState::Done => NodeEntry::done(value),
                LifecycleState::CheckDependencies => NodeEntry::check_dependencies(),
                LifecycleState::NotDone => NodeEntry::not_done(),
            };
            graph.insert(key, entry);
        }
        for (from, to) in self.edges {
            {
                let mut node = graph
                    .get_mut(&from)
                    .unwrap_or_else(|| panic!("edge source not added: {from}"));
                node.add_direct_dep(to.clone());
            }
            let mut node = graph
                .get_mut(&to)
                .unwrap_or_else(|| panic!("edge target not added: {to}"));
            node.add_reverse_dep(from);
        }
        graph
    }
}

/// Action cache that records every eviction.
#[derive(Default)]
pub struct RecordingActionCache {
    removed: Mutex<Vec<String>>,
}

impl RecordingActionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every exec path removed so far, in call order.
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().expect("cache poisoned").clone()
    }

    /// How many times `exec_path` was removed.
    pub fn removal_count(&self, exec_path: &str) -> usize {
        self.removed
            .lock()
            .expect("cache poisoned")
            .iter()
            .filter(|path| path.as_str() == exec_path)
            .count()
    }
}

impl ActionCache for RecordingActionCache {
    fn remove(&self, exec_path: &str) {
        self.removed
            .lock()
            .expect("cache poisoned")
            .push(exec_path.to_string());
    }
}
