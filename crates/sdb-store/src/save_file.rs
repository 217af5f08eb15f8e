//! The save file handle.

use std::io;
use std::path::{Path, PathBuf};

use sdb_index::{BTree, IndexError};
use sdb_pager::{lock, Pager, PagerError};
use sdb_types::{validate_store_name, StoreFiles};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// A named, persistent key-value store backed by two files in a directory.
///
/// Every [`set`](Self::set) and [`delete`](Self::delete) is committed
/// durably before it returns. While open, the handle holds exclusive locks on
/// both backing files; a second handle on the same store fails with
/// [`StoreError::AlreadyOpenElsewhere`].
///
/// A handle that hits a storage or corruption error is closed and must be
/// [`reopen`](Self::reopen)ed. Dropping an open handle releases its locks.
///
/// # Examples
///
/// ```
/// use sdb_store::SaveFile;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut save = SaveFile::open("slot1", dir.path()).unwrap();
/// save.set("score", &42).unwrap();
/// assert_eq!(save.get("score", -1).unwrap(), 42);
/// save.close().unwrap();
///
/// assert_eq!(SaveFile::list_stores(dir.path()).unwrap(), vec!["slot1"]);
/// ```
#[derive(Debug)]
pub struct SaveFile {
    name: String,
    dir: PathBuf,
    config: StoreConfig,
    tree: Option<BTree>,
}

impl SaveFile {
    /// Open store `name` in `dir` with the default configuration, creating it
    /// if its index file does not exist.
    pub fn open(name: &str, dir: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_config(name, dir, StoreConfig::default())
    }

    /// Open store `name` in `dir`, using `config` if the store is created.
    pub fn open_with_config(
        name: &str,
        dir: impl AsRef<Path>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        validate_store_name(name)?;
        config.validate()?;
        let mut save = Self {
            name: name.to_string(),
            dir: dir.as_ref().to_path_buf(),
            config,
            tree: None,
        };
        save.open_tree()?;
        Ok(save)
    }

    /// Open a closed handle again.
    pub fn reopen(&mut self) -> StoreResult<()> {
        self.open_tree()
    }

    #[instrument(skip(self), fields(name = %self.name, dir = %self.dir.display()))]
    fn open_tree(&mut self) -> StoreResult<()> {
        if self.tree.is_some() {
            return Err(StoreError::AlreadyOpen(self.name.clone()));
        }
        if !self.dir.is_dir() {
            return Err(StoreError::DirectoryMissing(self.dir.clone()));
        }

        let files = StoreFiles::new(&self.dir, &self.name);
        let options = self.config.tree_options();
        let tree = match (files.index.exists(), files.blob.exists()) {
            (false, false) => {
                let tree = BTree::create(&files, &options)?;
                info!("created save file");
                tree
            }
            (true, true) => {
                let tree = BTree::open(&files, &options)?;
                info!(keys = tree.len(), "opened save file");
                tree
            }
            (false, true) => {
                // Only an interrupted create leaves the blob file alone.
                Pager::remove_orphan_blob(&files)?;
                let tree = BTree::create(&files, &options)?;
                info!("created save file over an orphaned blob file");
                tree
            }
            (true, false) => {
                return Err(StoreError::Corrupt(format!(
                    "backing file {} is missing",
                    files.blob.display()
                )));
            }
        };

        self.tree = Some(tree);
        Ok(())
    }

    /// Returns `true` while the handle is open.
    pub fn is_open(&self) -> bool {
        self.tree.is_some()
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the backing files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration the handle was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Encode `value` and store it under `key`, replacing any previous value.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> StoreResult<()> {
        self.with_tree(|tree| {
            let bytes = sdb_codec::encode(value)?;
            tree.insert_or_replace(key.as_bytes(), &bytes)?;
            tree.commit()?;
            debug!(key, len = bytes.len(), "set");
            Ok(())
        })
    }

    /// Decode the value under `key` as `T`, or return `default` if absent.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str, default: T) -> StoreResult<T> {
        Ok(self.try_get(key)?.unwrap_or(default))
    }

    /// Decode the value under `key` as `T`, or `None` if absent.
    pub fn try_get<T: DeserializeOwned>(&mut self, key: &str) -> StoreResult<Option<T>> {
        self.with_tree(|tree| match tree.lookup(key.as_bytes())? {
            Some(bytes) => Ok(Some(sdb_codec::decode(&bytes)?)),
            None => Ok(None),
        })
    }

    /// Decode the value under `key` as `T`, or `T::default()` if absent.
    pub fn get_or_default<T: DeserializeOwned + Default>(&mut self, key: &str) -> StoreResult<T> {
        Ok(self.try_get(key)?.unwrap_or_default())
    }

    /// Remove `key`. Removing a missing key succeeds without changes.
    pub fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.with_tree(|tree| match tree.remove(key.as_bytes()) {
            Ok(()) => {
                tree.commit()?;
                debug!(key, "deleted");
                Ok(())
            }
            Err(IndexError::KeyNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        })
    }

    /// Returns `true` if `key` is present. The value is not decoded.
    pub fn has_key(&mut self, key: &str) -> StoreResult<bool> {
        self.with_tree(|tree| Ok(tree.contains_key(key.as_bytes())?))
    }

    /// All keys in ascending byte order.
    ///
    /// Walks the tree once per key, so this is slow for large stores.
    pub fn list_keys(&mut self) -> StoreResult<Vec<String>> {
        self.with_tree(|tree| {
            let mut keys = Vec::with_capacity(tree.len() as usize);
            let mut next = tree.first_key()?;
            while let Some(key) = next {
                next = tree.next_key(&key)?;
                let key = String::from_utf8(key)
                    .map_err(|_| StoreError::Corrupt("stored key is not UTF-8".into()))?;
                keys.push(key);
            }
            Ok(keys)
        })
    }

    /// Number of keys in the store.
    pub fn key_count(&mut self) -> StoreResult<u64> {
        self.with_tree(|tree| Ok(tree.len()))
    }

    /// Close the handle and release its locks.
    ///
    /// Fails with [`StoreError::NotOpen`] if the handle is already closed.
    pub fn close(&mut self) -> StoreResult<()> {
        let tree = self.tree.take().ok_or(StoreError::NotOpen)?;
        tree.close()?;
        info!(name = %self.name, "closed save file");
        Ok(())
    }

    fn with_tree<R>(&mut self, op: impl FnOnce(&mut BTree) -> StoreResult<R>) -> StoreResult<R> {
        let tree = self.tree.as_mut().ok_or(StoreError::NotOpen)?;
        match op(tree) {
            Ok(value) => Ok(value),
            Err(e) if e.is_fatal() => {
                error!(name = %self.name, error = %e, "closing save file after fatal error");
                if let Some(mut tree) = self.tree.take() {
                    tree.abort();
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Store management
    // ------------------------------------------------------------------

    /// Delete both backing files of store `name` in `dir`.
    ///
    /// Nothing is removed if either file is locked by an open handle. If a
    /// file is missing, the other one is still removed and the call fails
    /// with a `NotFound` I/O error.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn delete_store(name: &str, dir: impl AsRef<Path>) -> StoreResult<()> {
        validate_store_name(name)?;
        let files = StoreFiles::new(dir.as_ref(), name);
        let paths = [&files.index, &files.blob];

        for path in paths {
            if !path.exists() {
                continue;
            }
            match lock::ensure_unlocked(path) {
                Ok(()) => {}
                Err(PagerError::Locked(path)) => {
                    return Err(StoreError::StorageIo(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        format!("{} is locked by an open handle", path.display()),
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut missing = Vec::new();
        for path in paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    missing.push(path.display().to_string())
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !missing.is_empty() {
            return Err(StoreError::StorageIo(io::Error::new(
                io::ErrorKind::NotFound,
                format!("missing backing file(s): {}", missing.join(", ")),
            )));
        }
        info!("deleted save file");
        Ok(())
    }

    /// Names of the stores in `dir`, sorted.
    ///
    /// A store is listed if its index file exists, whether or not it is open.
    pub fn list_stores(dir: impl AsRef<Path>) -> StoreResult<Vec<String>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(StoreError::DirectoryMissing(dir.to_path_buf()));
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = StoreFiles::store_name_of(&entry.path()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["", "a/b", "..", "x.save"] {
            assert!(matches!(
                SaveFile::open(name, dir.path()),
                Err(StoreError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            order: 1,
            ..StoreConfig::default()
        };
        assert!(matches!(
            SaveFile::open_with_config("s", dir.path(), config),
            Err(StoreError::InvalidConfig(_))
        ));
        assert!(SaveFile::list_stores(dir.path()).unwrap().is_empty());
    }

    fn assert_send<T: Send>() {}

    #[test]
    fn handle_is_send() {
        assert_send::<SaveFile>();
        assert_send::<StoreError>();
    }

    #[test]
    fn accessors() {
        let dir = tempfile::tempdir().unwrap();
        let save = SaveFile::open("slot", dir.path()).unwrap();
        assert_eq!(save.name(), "slot");
        assert_eq!(save.dir(), dir.path());
        assert!(save.is_open());
        assert_eq!(save.config(), &StoreConfig::default());
    }

    #[test]
    fn fatal_error_closes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut save = SaveFile::open("s", dir.path()).unwrap();
        save.set("k", &1).unwrap();

        let err = save
            .with_tree(|_| -> StoreResult<()> { Err(StoreError::Corrupt("injected".into())) })
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!save.is_open());
        assert!(matches!(save.set("k", &2), Err(StoreError::NotOpen)));

        // Locks were released with the handle.
        save.reopen().unwrap();
        assert_eq!(save.get("k", 0).unwrap(), 1);
    }

    #[test]
    fn non_fatal_error_keeps_handle_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut save = SaveFile::open("s", dir.path()).unwrap();
        save.set("k", "text").unwrap();
        assert!(matches!(
            save.get::<u32>("k", 0),
            Err(StoreError::DecodeTypeMismatch(_))
        ));
        assert!(save.is_open());
    }
}
