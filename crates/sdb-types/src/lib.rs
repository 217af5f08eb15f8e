//! Foundation types for the sdb save-file store.
//!
//! Every other sdb crate depends on `sdb-types`.
//!
//! # Key Types
//!
//! - [`PageId`] -- Index of a fixed-size page inside a backing file
//! - [`StoreFiles`] -- The pair of backing paths (`<name>.save`, `<name>.block`) of a store
//! - [`validate_store_name`] / [`validate_key`] -- Naming rules shared by all layers

pub mod error;
pub mod names;
pub mod page;

pub use error::{TypeError, TypeResult};
pub use names::{
    validate_key, validate_store_name, StoreFiles, BLOB_EXTENSION, INDEX_EXTENSION, MAX_KEY_LEN,
};
pub use page::PageId;
