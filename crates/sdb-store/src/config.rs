use std::path::Path;

use sdb_index::TreeOptions;
use sdb_pager::SyncMode;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Settings for opening a save file.
///
/// Page sizes, `order` and `inline_value_limit` only take effect when a store
/// is created; an existing store keeps the values recorded in its header.
///
/// ```toml
/// page_size = 8192
/// blob_page_size = 4096
/// order = 16
/// inline_value_limit = 128
/// sync_mode = "every_commit"
/// node_cache_capacity = 1024
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Index page size in bytes (power of two, 1 KiB to 64 KiB).
    pub page_size: u32,
    /// Blob page size in bytes (power of two, 512 B to 64 KiB).
    pub blob_page_size: u32,
    /// Maximum keys per tree node (at least 4).
    pub order: u32,
    /// Encoded values up to this many bytes are stored inside the tree.
    pub inline_value_limit: u32,
    pub sync_mode: SyncMode,
    /// Clean tree nodes kept in memory between commits.
    pub node_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let tree = TreeOptions::default();
        Self {
            page_size: tree.page_size,
            blob_page_size: tree.blob_page_size,
            order: tree.order,
            inline_value_limit: tree.inline_limit,
            sync_mode: tree.sync_mode,
            node_cache_capacity: tree.node_cache_capacity,
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: StoreConfig =
            toml::from_str(s).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string(self).map_err(|e| StoreError::InvalidConfig(e.to_string()))
    }

    /// Check that the settings produce a usable store.
    pub fn validate(&self) -> StoreResult<()> {
        Ok(self.tree_options().validate()?)
    }

    pub(crate) fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            page_size: self.page_size,
            blob_page_size: self.blob_page_size,
            order: self.order,
            inline_limit: self.inline_value_limit,
            sync_mode: self.sync_mode,
            node_cache_capacity: self.node_cache_capacity,
        }
    }
}
