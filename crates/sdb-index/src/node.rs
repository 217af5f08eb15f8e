//! B+tree node layout and page encoding.

use serde::{Deserialize, Serialize};

use sdb_pager::frame::{decode_framed, encode_framed, FRAME_HEADER_SIZE};
use sdb_pager::BlobRef;
use sdb_types::{PageId, MAX_KEY_LEN};

use crate::error::{IndexError, IndexResult};

/// Where a leaf entry keeps its value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueRef {
    /// Small value stored inside the leaf.
    Inline(Vec<u8>),
    /// Large value stored as a blob chain.
    Blob(BlobRef),
}

/// One tree node, stored in exactly one index page.
///
/// Values live only in leaves. An interior node with `n` keys has `n + 1`
/// children; every key in `children[i]` is `< keys[i]` and every key in
/// `children[i + 1]` is `>= keys[i]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        keys: Vec<Vec<u8>>,
        values: Vec<ValueRef>,
    },
    Interior {
        keys: Vec<Vec<u8>>,
        children: Vec<PageId>,
    },
}

impl Node {
    /// A leaf holding a single entry.
    pub fn singleton(key: Vec<u8>, value: ValueRef) -> Self {
        Node::Leaf {
            keys: vec![key],
            values: vec![value],
        }
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        match self {
            Node::Leaf { keys, .. } | Node::Interior { keys, .. } => keys,
        }
    }

    /// Number of keys in the node.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Encode into a framed page image of at most `page_size` bytes.
    pub fn encode(&self, page_size: usize) -> IndexResult<Vec<u8>> {
        Ok(encode_framed(self, page_size)?)
    }

    /// Decode a page image, checking the node's shape.
    pub fn decode(page: &[u8]) -> IndexResult<Self> {
        let node: Node = decode_framed(page)?;
        let consistent = match &node {
            Node::Leaf { keys, values } => keys.len() == values.len(),
            Node::Interior { keys, children } => children.len() == keys.len() + 1,
        };
        if !consistent {
            return Err(IndexError::Corrupt("node arity does not match its keys".into()));
        }
        Ok(node)
    }
}

/// Index of the child subtree that may contain `key`.
pub fn child_index(keys: &[Vec<u8>], key: &[u8]) -> usize {
    keys.partition_point(|k| k.as_slice() <= key)
}

// bincode sizes: enum tag 4, vec length 8, page id 8, blob ref 16.
const TAG: usize = 4;
const LEN: usize = 8;

/// Largest encoded page image a node of `order` keys can produce.
pub fn max_node_size(order: usize, inline_limit: usize) -> usize {
    let keys = LEN + order * (LEN + MAX_KEY_LEN);
    let value = (TAG + LEN + inline_limit).max(TAG + 16);
    let leaf = TAG + keys + LEN + order * value;
    let interior = TAG + keys + LEN + (order + 1) * 8;
    FRAME_HEADER_SIZE + leaf.max(interior)
}
