//! Named, file-backed save files.
//!
//! A [`SaveFile`] maps string keys to values of any `serde` type. Each store
//! lives in a directory as two files, `<name>.save` for the header and index
//! tree and `<name>.block` for large value bodies. Every mutation is durable
//! when it returns, and a crash at any point leaves the store as of the last
//! completed mutation.
//!
//! Values keep reference identity through [`Shared`]: an instance stored
//! twice inside one value (or reachable through a cycle) comes back as one
//! instance.
//!
//! # Key Types
//!
//! - [`SaveFile`] -- Open handle on one store
//! - [`StoreConfig`] -- Page geometry, tree order and sync policy
//! - [`StoreError`] -- Everything a store operation can fail with
//!
//! # Example
//!
//! ```
//! use sdb_store::{SaveFile, Shared};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut save = SaveFile::open("profile", dir.path()).unwrap();
//!
//! let sword = Shared::new(String::from("sword"));
//! save.set("hands", &vec![sword.clone(), sword]).unwrap();
//!
//! let hands: Vec<Shared<String>> = save.get("hands", Vec::new()).unwrap();
//! assert!(Shared::ptr_eq(&hands[0], &hands[1]));
//! ```

pub mod config;
pub mod error;
pub mod save_file;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use save_file::SaveFile;

pub use sdb_codec::{decode, encode, geometry, Shared};
pub use sdb_pager::SyncMode;
