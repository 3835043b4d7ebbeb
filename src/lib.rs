#![forbid(unsafe_code)]

//! Graph-focusing garbage collector for an incremental build system's
//! in-memory evaluation graph.
//!
//! The build system evaluates a directed graph of keyed computation nodes;
//! over time the graph accumulates state irrelevant to the files the user
//! actually iterates on. [`focus`] prunes the graph to the minimum subgraph
//! that keeps incremental builds correct for those files, while retaining a
//! verification set of filesystem witnesses so an external checker can
//! still detect changes outside them.

pub mod cache;
pub mod config;
pub mod error;
pub mod focus;
pub mod graph;
mod pool;
pub mod test_harness;

pub use cache::ActionCache;
pub use config::{CancelFlag, FocusOptions};
pub use error::FocusError;
pub use focus::{focus, EdgeStats, FocusResult};
pub use graph::{
    ActionRecord, FocusKey, InMemoryGraph, LifecycleState, NodeEntry, NodeValue,
};

pub type Result<T> = std::result::Result<T, FocusError>;
