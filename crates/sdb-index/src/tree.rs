//! Copy-on-write B+tree over a [`Pager`].
//!
//! Nodes reachable from the committed header are never modified in place.
//! The first change to such a node in a transaction copies it to a fresh page
//! and releases the old one, so every mutation rewrites the path from the
//! root down to the affected leaf. Dirty nodes are kept decoded in memory and
//! encoded into their pages only at [`BTree::commit`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sdb_pager::{Pager, StoreLayout, SyncMode};
use sdb_types::{validate_key, PageId, StoreFiles};
use tracing::{debug, instrument};

use crate::error::{IndexError, IndexResult};
use crate::node::{child_index, max_node_size, Node, ValueRef};

/// Smallest supported node order.
pub const MIN_ORDER: usize = 4;

/// Options for creating or opening a tree.
///
/// Page sizes, order and inline limit only apply when a store is created;
/// an existing store keeps the values recorded in its header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeOptions {
    pub page_size: u32,
    pub blob_page_size: u32,
    /// Maximum keys per node.
    pub order: u32,
    /// Values up to this many bytes are stored inside the leaf.
    pub inline_limit: u32,
    pub sync_mode: SyncMode,
    /// Clean nodes kept decoded between commits.
    pub node_cache_capacity: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            page_size: 8192,
            blob_page_size: 4096,
            order: 16,
            inline_limit: 128,
            sync_mode: SyncMode::EveryCommit,
            node_cache_capacity: 1024,
        }
    }
}

impl TreeOptions {
    fn layout(&self) -> StoreLayout {
        StoreLayout {
            page_size: self.page_size,
            blob_page_size: self.blob_page_size,
            order: self.order,
            inline_limit: self.inline_limit,
        }
    }

    /// Check that the options produce a usable tree.
    pub fn validate(&self) -> IndexResult<()> {
        self.layout()
            .validate()
            .map_err(|e| IndexError::InvalidOptions(e.to_string()))?;
        check_geometry(&self.layout()).map_err(IndexError::InvalidOptions)
    }
}

fn check_geometry(layout: &StoreLayout) -> Result<(), String> {
    let order = layout.order as usize;
    if order < MIN_ORDER {
        return Err(format!("order must be at least {MIN_ORDER}, got {order}"));
    }
    let needed = max_node_size(order, layout.inline_limit as usize);
    if needed > layout.page_size as usize {
        return Err(format!(
            "a node of order {order} with inline limit {} needs {needed} bytes, page size is {}",
            layout.inline_limit, layout.page_size
        ));
    }
    Ok(())
}

/// Result of inserting into a subtree.
struct Inserted {
    /// Page of the (possibly shadowed) subtree root.
    page: PageId,
    /// Value replaced by the insert, if the key existed.
    old: Option<ValueRef>,
    /// Separator and right sibling produced by a split.
    split: Option<(Vec<u8>, PageId)>,
}

/// Result of removing from a subtree.
struct Removed {
    page: PageId,
    /// Key count of the subtree root after the removal.
    len: usize,
    value: ValueRef,
}

/// An ordered map from byte keys to byte values, persisted in a [`Pager`].
#[derive(Debug)]
pub struct BTree {
    pager: Pager,
    root: PageId,
    len: u64,
    order: usize,
    min_keys: usize,
    inline_limit: usize,
    page_size: usize,
    cache: RefCell<HashMap<PageId, Arc<Node>>>,
    dirty: HashSet<PageId>,
    cache_capacity: usize,
}

impl BTree {
    /// Create the backing files of a new, empty tree.
    pub fn create(files: &StoreFiles, options: &TreeOptions) -> IndexResult<Self> {
        options.validate()?;
        let pager = Pager::create(files, options.layout(), options.sync_mode)?;
        Ok(Self::with_pager(pager, options.node_cache_capacity))
    }

    /// Open the backing files of an existing tree.
    pub fn open(files: &StoreFiles, options: &TreeOptions) -> IndexResult<Self> {
        let pager = Pager::open(files, options.sync_mode)?;
        check_geometry(&pager.layout()).map_err(IndexError::Corrupt)?;
        Ok(Self::with_pager(pager, options.node_cache_capacity))
    }

    fn with_pager(pager: Pager, cache_capacity: usize) -> Self {
        let header = *pager.header();
        let order = header.layout.order as usize;
        Self {
            root: header.root,
            len: header.entry_count,
            order,
            min_keys: order / 2,
            inline_limit: header.layout.inline_limit as usize,
            page_size: header.layout.page_size as usize,
            pager,
            cache: RefCell::new(HashMap::new()),
            dirty: HashSet::new(),
            cache_capacity,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of entries, including uncommitted changes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current root page; null for an empty tree.
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Maximum keys per node.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Generation of the last committed header.
    pub fn generation(&self) -> u64 {
        self.pager.header().generation
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Look up the value stored under `key`.
    pub fn lookup(&self, key: &[u8]) -> IndexResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match self.find(key)? {
            Some(ValueRef::Inline(bytes)) => Ok(Some(bytes)),
            Some(ValueRef::Blob(blob)) => Ok(Some(self.pager.read_blob(blob)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if `key` is present, without reading its value.
    pub fn contains_key(&self, key: &[u8]) -> IndexResult<bool> {
        validate_key(key)?;
        Ok(self.find(key)?.is_some())
    }

    /// Smallest key in the tree.
    pub fn first_key(&self) -> IndexResult<Option<Vec<u8>>> {
        if self.root.is_null() {
            return Ok(None);
        }
        self.leftmost_key(self.root)
    }

    /// Smallest key strictly greater than `key`.
    ///
    /// Each call is an independent descent from the root.
    pub fn next_key(&self, key: &[u8]) -> IndexResult<Option<Vec<u8>>> {
        if self.root.is_null() {
            return Ok(None);
        }

        // Nearest subtree to the right of the descent path.
        let mut candidate = None;
        let mut page = self.root;
        loop {
            let node = self.node(page)?;
            match node.as_ref() {
                Node::Interior { keys, children } => {
                    let idx = child_index(keys, key);
                    if idx + 1 < children.len() {
                        candidate = Some(children[idx + 1]);
                    }
                    page = children[idx];
                }
                Node::Leaf { keys, .. } => {
                    let idx = child_index(keys, key);
                    if let Some(next) = keys.get(idx) {
                        return Ok(Some(next.clone()));
                    }
                    return match candidate {
                        Some(subtree) => self.leftmost_key(subtree),
                        None => Ok(None),
                    };
                }
            }
        }
    }

    fn find(&self, key: &[u8]) -> IndexResult<Option<ValueRef>> {
        if self.root.is_null() {
            return Ok(None);
        }
        let mut page = self.root;
        loop {
            let node = self.node(page)?;
            match node.as_ref() {
                Node::Interior { keys, children } => page = children[child_index(keys, key)],
                Node::Leaf { keys, values } => {
                    return Ok(keys
                        .binary_search_by(|k| k.as_slice().cmp(key))
                        .ok()
                        .map(|i| values[i].clone()));
                }
            }
        }
    }

    fn leftmost_key(&self, mut page: PageId) -> IndexResult<Option<Vec<u8>>> {
        loop {
            let node = self.node(page)?;
            match node.as_ref() {
                Node::Interior { children, .. } => {
                    page = *children
                        .first()
                        .ok_or_else(|| IndexError::Corrupt(format!("interior node {page} has no children")))?;
                }
                Node::Leaf { keys, .. } => return Ok(keys.first().cloned()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Node cache
    // ------------------------------------------------------------------

    fn node(&self, page: PageId) -> IndexResult<Arc<Node>> {
        if let Some(node) = self.cache.borrow().get(&page) {
            return Ok(Arc::clone(node));
        }

        let node = Arc::new(Node::decode(&self.pager.read_node(page)?)?);
        let mut cache = self.cache.borrow_mut();
        if cache.len() >= self.cache_capacity {
            cache.retain(|id, _| self.dirty.contains(id));
        }
        cache.insert(page, Arc::clone(&node));
        Ok(node)
    }

    /// Take a node out of the cache for modification.
    fn take_node(&mut self, page: PageId) -> IndexResult<Node> {
        let node = self.node(page)?;
        self.cache.get_mut().remove(&page);
        Ok(Arc::unwrap_or_clone(node))
    }

    fn put_node(&mut self, page: PageId, node: Node) {
        self.cache.get_mut().insert(page, Arc::new(node));
        self.dirty.insert(page);
    }

    /// Take a node for modification, shadowing it if it is committed.
    fn writable(&mut self, page: PageId) -> IndexResult<(PageId, Node)> {
        let node = self.take_node(page)?;
        if self.pager.is_fresh_node(page) {
            return Ok((page, node));
        }
        let shadow = self.pager.allocate_node();
        self.pager.free_node(page)?;
        Ok((shadow, node))
    }

    /// Drop a node whose page is no longer referenced.
    fn discard(&mut self, page: PageId) -> IndexResult<()> {
        self.cache.get_mut().remove(&page);
        self.dirty.remove(&page);
        Ok(self.pager.free_node(page)?)
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Insert `value` under `key`, replacing any previous value.
    ///
    /// The new value is written before the old blob chain, if any, is freed.
    /// Changes become durable at the next [`commit`](Self::commit).
    #[instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    pub fn insert_or_replace(&mut self, key: &[u8], value: &[u8]) -> IndexResult<()> {
        validate_key(key)?;
        let result = self.insert_entry(key, value);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn insert_entry(&mut self, key: &[u8], value: &[u8]) -> IndexResult<()> {
        let value = if value.len() <= self.inline_limit {
            ValueRef::Inline(value.to_vec())
        } else {
            ValueRef::Blob(self.pager.write_blob(value)?)
        };

        if self.root.is_null() {
            let page = self.pager.allocate_node();
            self.put_node(page, Node::singleton(key.to_vec(), value));
            self.root = page;
            self.len += 1;
            return Ok(());
        }

        let inserted = self.insert_into(self.root, key, value)?;
        self.root = match inserted.split {
            Some((separator, right)) => {
                let page = self.pager.allocate_node();
                self.put_node(
                    page,
                    Node::Interior {
                        keys: vec![separator],
                        children: vec![inserted.page, right],
                    },
                );
                debug!(root = %page, "tree grew a level");
                page
            }
            None => inserted.page,
        };

        match inserted.old {
            Some(ValueRef::Blob(old)) => self.pager.free_blob(old)?,
            Some(ValueRef::Inline(_)) => {}
            None => self.len += 1,
        }
        Ok(())
    }

    fn insert_into(&mut self, page: PageId, key: &[u8], value: ValueRef) -> IndexResult<Inserted> {
        let (page, mut node) = self.writable(page)?;

        let old = match &mut node {
            Node::Leaf { keys, values } => match keys.binary_search_by(|k| k.as_slice().cmp(key)) {
                Ok(i) => Some(std::mem::replace(&mut values[i], value)),
                Err(i) => {
                    keys.insert(i, key.to_vec());
                    values.insert(i, value);
                    None
                }
            },
            Node::Interior { keys, children } => {
                let idx = child_index(keys, key);
                let child = self.insert_into(children[idx], key, value)?;
                children[idx] = child.page;
                if let Some((separator, right)) = child.split {
                    keys.insert(idx, separator);
                    children.insert(idx + 1, right);
                }
                child.old
            }
        };

        let split = if node.len() > self.order {
            Some(self.split(&mut node))
        } else {
            None
        };
        self.put_node(page, node);
        Ok(Inserted { page, old, split })
    }

    /// Move the upper half of an overfull node into a new right sibling.
    ///
    /// Leaves copy the first right key up; interior nodes move the median up.
    fn split(&mut self, node: &mut Node) -> (Vec<u8>, PageId) {
        let (separator, right) = match node {
            Node::Leaf { keys, values } => {
                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid);
                let right_values = values.split_off(mid);
                let separator = right_keys[0].clone();
                (
                    separator,
                    Node::Leaf {
                        keys: right_keys,
                        values: right_values,
                    },
                )
            }
            Node::Interior { keys, children } => {
                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid + 1);
                let separator = keys.remove(mid);
                let right_children = children.split_off(mid + 1);
                (
                    separator,
                    Node::Interior {
                        keys: right_keys,
                        children: right_children,
                    },
                )
            }
        };
        let page = self.pager.allocate_node();
        self.put_node(page, right);
        (separator, page)
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    /// Remove `key` and free its value pages.
    ///
    /// Returns [`IndexError::KeyNotFound`] without changing anything if the
    /// key is absent.
    #[instrument(skip_all, fields(key_len = key.len()))]
    pub fn remove(&mut self, key: &[u8]) -> IndexResult<()> {
        validate_key(key)?;
        if self.find(key)?.is_none() {
            return Err(IndexError::KeyNotFound);
        }
        let result = self.remove_entry(key);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn remove_entry(&mut self, key: &[u8]) -> IndexResult<()> {
        let removed = self.remove_from(self.root, key)?;
        self.root = removed.page;
        self.len -= 1;

        if removed.len == 0 {
            let root = self.take_node(self.root)?;
            let replacement = match &root {
                Node::Interior { children, .. } => children[0],
                Node::Leaf { .. } => PageId::NULL,
            };
            self.discard(self.root)?;
            if !replacement.is_null() {
                debug!(root = %replacement, "tree lost a level");
            }
            self.root = replacement;
        }

        if let ValueRef::Blob(blob) = removed.value {
            self.pager.free_blob(blob)?;
        }
        Ok(())
    }

    fn remove_from(&mut self, page: PageId, key: &[u8]) -> IndexResult<Removed> {
        let (page, mut node) = self.writable(page)?;

        let value = match &mut node {
            Node::Leaf { keys, values } => {
                let i = keys
                    .binary_search_by(|k| k.as_slice().cmp(key))
                    .map_err(|_| IndexError::Corrupt("key vanished during removal".into()))?;
                keys.remove(i);
                values.remove(i)
            }
            Node::Interior { keys, children } => {
                let idx = child_index(keys, key);
                let child = self.remove_from(children[idx], key)?;
                children[idx] = child.page;
                if child.len < self.min_keys {
                    self.rebalance(keys, children, idx)?;
                }
                child.value
            }
        };

        let len = node.len();
        self.put_node(page, node);
        Ok(Removed { page, len, value })
    }

    /// Restore minimum occupancy of `children[idx]` by borrowing from a
    /// sibling, or merging with one.
    fn rebalance(
        &mut self,
        keys: &mut Vec<Vec<u8>>,
        children: &mut Vec<PageId>,
        idx: usize,
    ) -> IndexResult<()> {
        if idx > 0 && self.node(children[idx - 1])?.len() > self.min_keys {
            return self.borrow_from_left(keys, children, idx);
        }
        if idx + 1 < children.len() && self.node(children[idx + 1])?.len() > self.min_keys {
            return self.borrow_from_right(keys, children, idx);
        }
        if idx > 0 {
            self.merge(keys, children, idx - 1)
        } else {
            self.merge(keys, children, idx)
        }
    }

    fn borrow_from_left(
        &mut self,
        keys: &mut [Vec<u8>],
        children: &mut [PageId],
        idx: usize,
    ) -> IndexResult<()> {
        let (left_page, mut left) = self.writable(children[idx - 1])?;
        let (child_page, mut child) = self.writable(children[idx])?;

        match (&mut left, &mut child) {
            (
                Node::Leaf { keys: lk, values: lv },
                Node::Leaf { keys: ck, values: cv },
            ) => {
                let (k, v) = lk.pop().zip(lv.pop()).ok_or_else(empty_sibling)?;
                ck.insert(0, k);
                cv.insert(0, v);
                keys[idx - 1] = ck[0].clone();
            }
            (
                Node::Interior { keys: lk, children: lc },
                Node::Interior { keys: ck, children: cc },
            ) => {
                let (k, c) = lk.pop().zip(lc.pop()).ok_or_else(empty_sibling)?;
                ck.insert(0, std::mem::replace(&mut keys[idx - 1], k));
                cc.insert(0, c);
            }
            _ => return Err(mixed_siblings()),
        }

        children[idx - 1] = left_page;
        children[idx] = child_page;
        self.put_node(left_page, left);
        self.put_node(child_page, child);
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        keys: &mut [Vec<u8>],
        children: &mut [PageId],
        idx: usize,
    ) -> IndexResult<()> {
        let (child_page, mut child) = self.writable(children[idx])?;
        let (right_page, mut right) = self.writable(children[idx + 1])?;

        match (&mut child, &mut right) {
            (
                Node::Leaf { keys: ck, values: cv },
                Node::Leaf { keys: rk, values: rv },
            ) => {
                if rk.len() < 2 {
                    return Err(empty_sibling());
                }
                ck.push(rk.remove(0));
                cv.push(rv.remove(0));
                keys[idx] = rk[0].clone();
            }
            (
                Node::Interior { keys: ck, children: cc },
                Node::Interior { keys: rk, children: rc },
            ) => {
                if rk.is_empty() || rc.len() < 2 {
                    return Err(empty_sibling());
                }
                ck.push(std::mem::replace(&mut keys[idx], rk.remove(0)));
                cc.push(rc.remove(0));
            }
            _ => return Err(mixed_siblings()),
        }

        children[idx] = child_page;
        children[idx + 1] = right_page;
        self.put_node(child_page, child);
        self.put_node(right_page, right);
        Ok(())
    }

    /// Merge `children[at + 1]` into `children[at]`.
    fn merge(
        &mut self,
        keys: &mut Vec<Vec<u8>>,
        children: &mut Vec<PageId>,
        at: usize,
    ) -> IndexResult<()> {
        let (left_page, mut left) = self.writable(children[at])?;
        let right_page = children[at + 1];
        let right = self.take_node(right_page)?;
        let separator = keys.remove(at);

        match (&mut left, right) {
            (Node::Leaf { keys: lk, values: lv }, Node::Leaf { keys: rk, values: rv }) => {
                lk.extend(rk);
                lv.extend(rv);
            }
            (
                Node::Interior { keys: lk, children: lc },
                Node::Interior { keys: rk, children: rc },
            ) => {
                lk.push(separator);
                lk.extend(rk);
                lc.extend(rc);
            }
            _ => return Err(mixed_siblings()),
        }

        self.discard(right_page)?;
        children.remove(at + 1);
        children[at] = left_page;
        self.put_node(left_page, left);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Encode dirty nodes and commit them under a new header.
    ///
    /// On failure the tree reverts to the last committed state.
    pub fn commit(&mut self) -> IndexResult<()> {
        let result = self.write_dirty().and_then(|()| {
            self.pager
                .commit(self.root, self.len)
                .map_err(IndexError::from)
        });

        match result {
            Ok(()) => {
                self.dirty.clear();
                if self.cache.get_mut().len() > self.cache_capacity {
                    self.cache.get_mut().clear();
                }
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn write_dirty(&mut self) -> IndexResult<()> {
        let cache = self.cache.get_mut();
        for page in &self.dirty {
            let node = cache
                .get(page)
                .ok_or_else(|| IndexError::Corrupt(format!("dirty node {page} missing from cache")))?;
            self.pager.write_node(*page, node.encode(self.page_size)?)?;
        }
        Ok(())
    }

    /// Discard every change since the last commit.
    pub fn abort(&mut self) {
        self.pager.abort();
        self.cache.get_mut().clear();
        self.dirty.clear();
        let header = self.pager.header();
        self.root = header.root;
        self.len = header.entry_count;
    }

    /// Discard uncommitted changes and release the backing files.
    pub fn close(mut self) -> IndexResult<()> {
        self.abort();
        Ok(self.pager.close()?)
    }
}

fn empty_sibling() -> IndexError {
    IndexError::Corrupt("sibling has no entry to lend".into())
}

fn mixed_siblings() -> IndexError {
    IndexError::Corrupt("siblings at different depths".into())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    fn small_options() -> TreeOptions {
        TreeOptions {
            page_size: 2048,
            blob_page_size: 512,
            order: 4,
            inline_limit: 16,
            sync_mode: SyncMode::OsDefault,
            node_cache_capacity: 8,
        }
    }

    fn make_tree(dir: &std::path::Path) -> BTree {
        BTree::create(&StoreFiles::new(dir, "tree"), &small_options()).unwrap()
    }

    fn reopen(tree: BTree, dir: &std::path::Path) -> BTree {
        tree.close().unwrap();
        BTree::open(&StoreFiles::new(dir, "tree"), &small_options()).unwrap()
    }

    fn key(i: usize) -> Vec<u8> {
        format!("key-{i:04}").into_bytes()
    }

    fn all_keys(tree: &BTree) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut next = tree.first_key().unwrap();
        while let Some(k) = next {
            next = tree.next_key(&k).unwrap();
            out.push(k);
        }
        out
    }

    /// Checks ordering, separator bounds, occupancy, and uniform leaf depth.
    fn check_invariants(tree: &BTree) {
        fn walk(
            tree: &BTree,
            page: PageId,
            lo: Option<&[u8]>,
            hi: Option<&[u8]>,
            is_root: bool,
            depth: usize,
            leaf_depth: &mut Option<usize>,
        ) -> u64 {
            let node = tree.node(page).unwrap();
            let keys = node.keys();
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys out of order");
            assert!(keys.len() <= tree.order);
            if !is_root {
                assert!(keys.len() >= tree.min_keys, "node {page} underfull");
            }
            for k in keys {
                if let Some(lo) = lo {
                    assert!(k.as_slice() >= lo);
                }
                if let Some(hi) = hi {
                    assert!(k.as_slice() < hi);
                }
            }
            match node.as_ref() {
                Node::Leaf { values, .. } => {
                    assert_eq!(values.len(), keys.len());
                    match leaf_depth {
                        Some(d) => assert_eq!(*d, depth, "leaves at different depths"),
                        None => *leaf_depth = Some(depth),
                    }
                    keys.len() as u64
                }
                Node::Interior { children, .. } => {
                    assert_eq!(children.len(), keys.len() + 1);
                    let mut total = 0;
                    for (i, child) in children.iter().enumerate() {
                        let lo = if i == 0 { lo } else { Some(keys[i - 1].as_slice()) };
                        let hi = keys.get(i).map(|k| k.as_slice()).or(hi);
                        total += walk(tree, *child, lo, hi, false, depth + 1, leaf_depth);
                    }
                    total
                }
            }
        }

        if tree.root().is_null() {
            assert_eq!(tree.len(), 0);
            return;
        }
        let mut leaf_depth = None;
        let total = walk(tree, tree.root(), None, None, true, 0, &mut leaf_depth);
        assert_eq!(total, tree.len());
    }

    #[test]
    fn empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let tree = make_tree(dir.path());
        assert!(tree.is_empty());
        assert!(tree.root().is_null());
        assert_eq!(tree.lookup(b"a").unwrap(), None);
        assert_eq!(tree.first_key().unwrap(), None);
        assert_eq!(tree.next_key(b"a").unwrap(), None);
    }

    #[test]
    fn insert_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        tree.insert_or_replace(b"alpha", b"1").unwrap();
        tree.insert_or_replace(b"beta", b"2").unwrap();
        tree.commit().unwrap();

        assert_eq!(tree.lookup(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.lookup(b"beta").unwrap(), Some(b"2".to_vec()));
        assert_eq!(tree.lookup(b"gamma").unwrap(), None);
        assert!(tree.contains_key(b"beta").unwrap());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn replace_keeps_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        tree.insert_or_replace(b"k", b"old").unwrap();
        tree.insert_or_replace(b"k", b"new").unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.lookup(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn invalid_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        assert!(matches!(
            tree.insert_or_replace(b"", b"v"),
            Err(IndexError::InvalidKey(_))
        ));
        assert!(matches!(
            tree.insert_or_replace(&[b'x'; 256], b"v"),
            Err(IndexError::InvalidKey(_))
        ));
        tree.insert_or_replace(&[b'x'; 255], b"v").unwrap();
        assert!(tree.contains_key(&[b'x'; 255]).unwrap());
    }

    #[test]
    fn large_values_round_trip_through_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        let big: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        tree.insert_or_replace(b"big", &big).unwrap();
        tree.commit().unwrap();

        let bigger = vec![0x5A; 5000];
        tree.insert_or_replace(b"big", &bigger).unwrap();
        tree.commit().unwrap();
        assert_eq!(tree.lookup(b"big").unwrap(), Some(bigger.clone()));

        let tree = reopen(tree, dir.path());
        assert_eq!(tree.lookup(b"big").unwrap(), Some(bigger));
    }

    #[test]
    fn splits_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        for i in (0..200).rev() {
            tree.insert_or_replace(&key(i), &i.to_le_bytes()).unwrap();
        }
        tree.commit().unwrap();
        check_invariants(&tree);

        let keys = all_keys(&tree);
        assert_eq!(keys, (0..200).map(key).collect::<Vec<_>>());
        for i in 0..200 {
            assert_eq!(tree.lookup(&key(i)).unwrap(), Some(i.to_le_bytes().to_vec()));
        }
    }

    #[test]
    fn remove_rebalances_down_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        for i in 0..150 {
            tree.insert_or_replace(&key(i), b"v").unwrap();
        }
        tree.commit().unwrap();

        // Interleave from both ends to exercise borrow and merge paths.
        let order: Vec<usize> = (0..75).flat_map(|i| [i, 149 - i]).collect();
        for (n, i) in order.iter().enumerate() {
            tree.remove(&key(*i)).unwrap();
            if n % 10 == 0 {
                tree.commit().unwrap();
                check_invariants(&tree);
            }
        }
        tree.commit().unwrap();
        assert!(tree.is_empty());
        assert!(tree.root().is_null());
        assert_eq!(tree.first_key().unwrap(), None);
    }

    #[test]
    fn remove_missing_key_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        tree.insert_or_replace(b"present", b"v").unwrap();
        tree.commit().unwrap();
        let generation = tree.generation();
        let root = tree.root();

        assert!(matches!(tree.remove(b"absent"), Err(IndexError::KeyNotFound)));
        tree.commit().unwrap();
        assert_eq!(tree.generation(), generation);
        assert_eq!(tree.root(), root);
    }

    #[test]
    fn every_commit_moves_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        tree.insert_or_replace(b"k", b"1").unwrap();
        tree.commit().unwrap();
        let first = tree.root();

        tree.insert_or_replace(b"k", b"2").unwrap();
        tree.commit().unwrap();
        assert_ne!(tree.root(), first);
    }

    #[test]
    fn abort_restores_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        for i in 0..20 {
            tree.insert_or_replace(&key(i), b"committed").unwrap();
        }
        tree.commit().unwrap();
        let root = tree.root();

        for i in 0..20 {
            tree.insert_or_replace(&key(i), b"pending").unwrap();
        }
        tree.remove(&key(3)).unwrap();
        tree.abort();

        assert_eq!(tree.root(), root);
        assert_eq!(tree.len(), 20);
        assert_eq!(tree.lookup(&key(3)).unwrap(), Some(b"committed".to_vec()));
    }

    #[test]
    fn uncommitted_changes_lost_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = make_tree(dir.path());
        tree.insert_or_replace(b"durable", b"1").unwrap();
        tree.commit().unwrap();
        tree.insert_or_replace(b"volatile", b"2").unwrap();

        let tree = reopen(tree, dir.path());
        assert!(tree.contains_key(b"durable").unwrap());
        assert!(!tree.contains_key(b"volatile").unwrap());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn repeated_overwrites_reuse_pages() {
        let dir = tempfile::tempdir().unwrap();
        let files = StoreFiles::new(dir.path(), "tree");
        let mut tree = make_tree(dir.path());
        for i in 0..300u32 {
            tree.insert_or_replace(b"counter", &i.to_le_bytes()).unwrap();
            tree.insert_or_replace(b"blob", &vec![i as u8; 1200]).unwrap();
            tree.commit().unwrap();
        }
        tree.close().unwrap();

        let index_len = std::fs::metadata(&files.index).unwrap().len();
        let blob_len = std::fs::metadata(&files.blob).unwrap().len();
        assert!(index_len <= 16 * 2048, "index file grew to {index_len}");
        assert!(blob_len <= 32 * 512, "blob file grew to {blob_len}");
    }

    #[test]
    fn options_validation() {
        assert!(TreeOptions::default().validate().is_ok());

        let low_order = TreeOptions {
            order: 3,
            ..small_options()
        };
        assert!(matches!(low_order.validate(), Err(IndexError::InvalidOptions(_))));

        let cramped = TreeOptions {
            page_size: 1024,
            order: 16,
            ..small_options()
        };
        assert!(matches!(cramped.validate(), Err(IndexError::InvalidOptions(_))));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Put(u8, usize),
        Remove(u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (any::<u8>(), 0..600usize).prop_map(|(k, len)| Op::Put(k, len)),
            2 => any::<u8>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// The tree behaves like a `BTreeMap` across commits and reopen.
        #[test]
        fn prop_matches_model(ops in proptest::collection::vec(arb_op(), 1..250)) {
            let dir = tempfile::tempdir().unwrap();
            let mut tree = make_tree(dir.path());
            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

            for (n, op) in ops.iter().enumerate() {
                match op {
                    Op::Put(k, len) => {
                        let k = key(*k as usize);
                        let v = vec![n as u8; *len];
                        tree.insert_or_replace(&k, &v).unwrap();
                        model.insert(k, v);
                    }
                    Op::Remove(k) => {
                        let k = key(*k as usize);
                        match tree.remove(&k) {
                            Ok(()) => prop_assert!(model.remove(&k).is_some()),
                            Err(IndexError::KeyNotFound) => prop_assert!(!model.contains_key(&k)),
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                }
                tree.commit().unwrap();
            }

            check_invariants(&tree);
            prop_assert_eq!(tree.len(), model.len() as u64);
            prop_assert_eq!(all_keys(&tree), model.keys().cloned().collect::<Vec<_>>());

            let tree = reopen(tree, dir.path());
            for (k, v) in &model {
                let stored = tree.lookup(k).unwrap();
                prop_assert_eq!(stored.as_ref(), Some(v));
            }
            prop_assert_eq!(all_keys(&tree).len(), model.len());
        }
    }
}
