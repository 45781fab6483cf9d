//! Property tree and remote property protocol for Stepwise.
//!
//! [`PropertyTree`] is a participant's local hierarchical configuration
//! and state store with bubbling change listeners. [`RemoteProperties`]
//! exposes it to other participants over a
//! [`Transport`](stepwise_core::Transport) and gives blocking access to
//! theirs, including mirrored subtrees kept in sync by change
//! notifications.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

mod mirror;
pub mod remote;
pub mod tree;

pub use remote::{RemoteProperties, ELEMENT_NAME_PATH};
pub use tree::PropertyTree;
