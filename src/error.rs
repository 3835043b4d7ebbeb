//! Focus run errors.
//!
//! These are bounded and stable: a focus run either completes, is
//! interrupted, or fails on a malformed graph input. There are no
//! retryable conditions.

use thiserror::Error;

/// Canonical error for a focus run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FocusError {
    /// A marked key has no node entry in the graph.
    ///
    /// Indicates a misconfigured active-directory input: every leaf (and
    /// everything reachable from one) must exist in the graph.
    #[error("node entry not found for `{key}`")]
    MissingNode { key: String },

    /// A marked node is neither done nor waiting on a dependency check.
    #[error("node entry not done: `{key}`")]
    NotDone { key: String },

    /// The caller cancelled the run. The graph is left in an intermediate
    /// state and should be discarded.
    #[error("focus run interrupted")]
    Interrupted,

    /// A graph invariant did not hold mid-run.
    #[error("graph invariant violated: {0}")]
    Internal(String),
}

impl FocusError {
    pub(crate) fn missing_node(key: &impl std::fmt::Display) -> Self {
        FocusError::MissingNode {
            key: key.to_string(),
        }
    }

    pub(crate) fn not_done(key: &impl std::fmt::Display) -> Self {
        FocusError::NotDone {
            key: key.to_string(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        FocusError::Internal(message.into())
    }
}
