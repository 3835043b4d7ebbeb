//! Key abstraction for evaluation-graph nodes.

use std::fmt;
use std::hash::Hash;

/// An opaque, hashable, totally-ordered node key.
///
/// The evaluation engine owns the concrete key type; the focuser only needs
/// identity, a canonical name (`Display`), and two structural hooks:
///
/// - [`is_filesystem_witness`](FocusKey::is_filesystem_witness) marks keys
///   that stand for rooted filesystem paths or directory-listing states.
///   Such keys terminate the downward verification walk and are retained so
///   an external filesystem checker can still observe changes outside the
///   active directories.
/// - [`expand_nested_artifacts`](FocusKey::expand_nested_artifacts) exposes
///   the members of a nested-set-of-artifacts key. Evaluations consume those
///   transitive inputs without registering per-artifact edges, so the
///   focuser has to keep the members reachable itself. Failing to expand
///   here surfaces later as missing-input build errors.
///
/// Both hooks must be pure functions of the key.
pub trait FocusKey:
    Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// True when the key names a rooted filesystem path or a
    /// directory-listing state.
    fn is_filesystem_witness(&self) -> bool {
        false
    }

    /// Member artifact keys of a nested-set-of-artifacts key, or `None` for
    /// ordinary keys.
    fn expand_nested_artifacts(&self) -> Option<Vec<Self>> {
        None
    }
}

/// Plain string keys: no witnesses, no nested sets. Suitable for embedders
/// whose keys are flat canonical names.
impl FocusKey for String {}
