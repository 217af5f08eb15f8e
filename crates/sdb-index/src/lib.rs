//! Ordered index for the sdb save-file store.
//!
//! A copy-on-write B+tree mapping byte keys to byte values. Small values are
//! stored inside leaves; larger ones live in blob chains of the page store.
//!
//! # Key Types
//!
//! - [`BTree`] -- The tree, owning the [`sdb_pager::Pager`] of one store
//! - [`TreeOptions`] -- Geometry for new trees, sync mode, and cache size
//! - [`Node`] / [`ValueRef`] -- On-page node layout

pub mod error;
pub mod node;
pub mod tree;

pub use error::{IndexError, IndexResult};
pub use node::{Node, ValueRef};
pub use tree::{BTree, TreeOptions, MIN_ORDER};
