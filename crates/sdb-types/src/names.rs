//! Store-name and key rules, and the naming of a store's backing files.
//!
//! A store named `inventory` in directory `D` is backed by exactly two files:
//! `D/inventory.save` (header + tree) and `D/inventory.block` (blob pages).
//!
//! Valid store names:
//! - Must be non-empty
//! - Must not contain `/`, `\` or NUL
//! - Must not be `.` or `..`
//! - Must not end with a backing-file extension
//!
//! Valid keys are non-empty and at most [`MAX_KEY_LEN`] bytes.

use std::path::{Path, PathBuf};

use crate::error::{TypeError, TypeResult};

/// Extension of the index artifact (header + tree pages).
pub const INDEX_EXTENSION: &str = "save";

/// Extension of the blob artifact (large value bodies).
pub const BLOB_EXTENSION: &str = "block";

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Characters that are forbidden anywhere in a store name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '\0'];

/// Validate a store name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use sdb_types::validate_store_name;
///
/// assert!(validate_store_name("slot-1").is_ok());
/// assert!(validate_store_name("").is_err());
/// assert!(validate_store_name("../escape").is_err());
/// ```
pub fn validate_store_name(name: &str) -> TypeResult<()> {
    let invalid = |reason: &str| TypeError::InvalidStoreName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("store name must not be empty"));
    }

    for ch in FORBIDDEN_CHARS {
        if name.contains(*ch) {
            return Err(TypeError::InvalidStoreName {
                name: name.to_string(),
                reason: format!("contains forbidden character: {ch:?}"),
            });
        }
    }

    if name == "." || name == ".." {
        return Err(invalid("must not be '.' or '..'"));
    }

    for ext in [INDEX_EXTENSION, BLOB_EXTENSION] {
        if name.ends_with(&format!(".{ext}")) {
            return Err(TypeError::InvalidStoreName {
                name: name.to_string(),
                reason: format!("must not end with '.{ext}'"),
            });
        }
    }

    Ok(())
}

/// Validate a key: non-empty, at most [`MAX_KEY_LEN`] bytes.
pub fn validate_key(key: &[u8]) -> TypeResult<()> {
    if key.is_empty() {
        return Err(TypeError::InvalidKey("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(TypeError::InvalidKey(format!(
            "key is {} bytes, maximum is {MAX_KEY_LEN}",
            key.len()
        )));
    }
    Ok(())
}

/// The two backing files of a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreFiles {
    /// Index artifact: header slots and B-tree node pages.
    pub index: PathBuf,
    /// Blob artifact: chained pages holding large values.
    pub blob: PathBuf,
}

impl StoreFiles {
    /// Backing paths for store `name` inside `dir`.
    ///
    /// The name is not validated here; see [`validate_store_name`].
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            index: dir.join(format!("{name}.{INDEX_EXTENSION}")),
            blob: dir.join(format!("{name}.{BLOB_EXTENSION}")),
        }
    }

    /// If `path` names an index artifact, return the store name it belongs to.
    pub fn store_name_of(path: &Path) -> Option<String> {
        if path.extension()? != INDEX_EXTENSION {
            return None;
        }
        path.file_stem()?.to_str().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_store_names() {
        assert!(validate_store_name("s").is_ok());
        assert!(validate_store_name("slot 1").is_ok());
        assert!(validate_store_name("player.profile").is_ok());
        assert!(validate_store_name(".hidden").is_ok());
    }

    #[test]
    fn empty_store_name_rejected() {
        let err = validate_store_name("").unwrap_err();
        assert!(matches!(err, TypeError::InvalidStoreName { .. }));
    }

    #[test]
    fn separators_rejected() {
        assert!(validate_store_name("a/b").is_err());
        assert!(validate_store_name("a\\b").is_err());
        assert!(validate_store_name("a\0b").is_err());
    }

    #[test]
    fn dot_names_rejected() {
        assert!(validate_store_name(".").is_err());
        assert!(validate_store_name("..").is_err());
    }

    #[test]
    fn backing_extension_suffix_rejected() {
        assert!(validate_store_name("x.save").is_err());
        assert!(validate_store_name("x.block").is_err());
    }

    #[test]
    fn key_rules() {
        assert!(validate_key(b"a").is_ok());
        assert!(validate_key(&[b'k'; MAX_KEY_LEN]).is_ok());
        assert!(matches!(validate_key(b""), Err(TypeError::InvalidKey(_))));
        assert!(matches!(
            validate_key(&[b'k'; MAX_KEY_LEN + 1]),
            Err(TypeError::InvalidKey(_))
        ));
    }

    #[test]
    fn store_files_use_fixed_extensions() {
        let files = StoreFiles::new(Path::new("/data"), "slot");
        assert_eq!(files.index, PathBuf::from("/data/slot.save"));
        assert_eq!(files.blob, PathBuf::from("/data/slot.block"));
        assert_ne!(files.index, files.blob);
    }

    #[test]
    fn store_name_of_index_artifact() {
        assert_eq!(
            StoreFiles::store_name_of(Path::new("/data/slot.save")),
            Some("slot".to_string())
        );
        assert_eq!(StoreFiles::store_name_of(Path::new("/data/slot.block")), None);
        assert_eq!(StoreFiles::store_name_of(Path::new("/data/notes.txt")), None);
        assert_eq!(StoreFiles::store_name_of(Path::new("/data/save")), None);
    }
}
