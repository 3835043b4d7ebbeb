//! The in-memory evaluation graph: keys, node entries, and the
//! concurrent node index.

mod entry;
mod key;
mod store;

pub use entry::{ActionRecord, LifecycleState, NodeEntry, NodeValue};
pub use key::FocusKey;
pub use store::{InMemoryGraph, NodeRef, NodeRefMut};
