//! Binary record format for persisted nodes.
//!
//! Layout (format 1):
//!
//! ```text
//! u8       format
//! varint   height
//! uvarint  size
//! uvarint  version
//! bytes    key
//! leaf:    bytes value
//! branch:  uvarint left.version, uvarint left.sequence,
//!          uvarint right.version, uvarint right.sequence
//! [u8;32]  hash
//! ```

use super::{Node, NodeRef};
use crate::error::{IavlError, Result};
use crate::primitives::bytes::{buf::Cursor, var};
use crate::types::{Hash, NodeKey, Version, HASH_LEN};

/// Current record format byte.
pub const NODE_FORMAT: u8 = 1;

/// Encodes a hashed node whose children already have node keys.
pub fn encode(node: &Node, left: Option<NodeKey>, right: Option<NodeKey>) -> Result<Vec<u8>> {
    let hash = node
        .hash()
        .ok_or(IavlError::Invalid("node must be hashed before encoding"))?;
    let mut out = Vec::with_capacity(node.key.len() + HASH_LEN + 24);
    out.push(NODE_FORMAT);
    var::encode_i64(node.height as i64, &mut out);
    var::encode_u64(node.size, &mut out);
    var::encode_u64(node.version.0, &mut out);
    var::encode_bytes(&node.key, &mut out);
    if node.is_leaf() {
        let value = node
            .value
            .as_deref()
            .ok_or(IavlError::Invalid("leaf without value"))?;
        var::encode_bytes(value, &mut out);
    } else {
        let (Some(left), Some(right)) = (left, right) else {
            return Err(IavlError::Invalid("branch children must be persisted first"));
        };
        for child in [left, right] {
            var::encode_u64(child.version.0, &mut out);
            var::encode_u64(child.sequence as u64, &mut out);
        }
    }
    out.extend_from_slice(hash.as_bytes());
    Ok(out)
}

/// Decodes a record stored under `key`.
pub fn decode(key: NodeKey, bytes: &[u8]) -> Result<Node> {
    let mut cur = Cursor::new(bytes);
    let format = cur.read_u8()?;
    if format != NODE_FORMAT {
        return Err(IavlError::Corruption(format!(
            "node {key}: unknown record format {format}"
        )));
    }
    let height = u8::try_from(cur.read_varint()?)
        .map_err(|_| IavlError::Corruption(format!("node {key}: height out of range")))?;
    let size = cur.read_uvarint()?;
    let version = Version(cur.read_uvarint()?);
    if version != key.version {
        return Err(IavlError::Corruption(format!(
            "node {key}: record claims version {version}"
        )));
    }
    let node_key_bytes = cur.read_bytes()?.to_vec();
    let mut node = if height == 0 {
        if size != 1 {
            return Err(IavlError::Corruption(format!("node {key}: leaf size {size}")));
        }
        let value = cur.read_bytes()?.to_vec();
        Node::leaf(node_key_bytes, value, version)
    } else {
        let left = read_child(&mut cur)?;
        let right = read_child(&mut cur)?;
        let mut branch = Node::branch(
            node_key_bytes,
            NodeRef::Stored(left),
            NodeRef::Stored(right),
            version,
        );
        branch.height = height;
        branch.size = size;
        branch
    };
    let hash = Hash::from_slice(cur.take(HASH_LEN)?)
        .ok_or_else(|| IavlError::Corruption(format!("node {key}: bad hash")))?;
    if cur.remaining() != 0 {
        return Err(IavlError::Corruption(format!(
            "node {key}: {} trailing bytes",
            cur.remaining()
        )));
    }
    node.set_hash(hash);
    node.node_key = Some(key);
    Ok(node)
}

fn read_child(cur: &mut Cursor<'_>) -> Result<NodeKey> {
    let version = Version(cur.read_uvarint()?);
    let sequence = u32::try_from(cur.read_uvarint()?)
        .map_err(|_| IavlError::Corruption("child sequence out of range".into()))?;
    Ok(NodeKey::new(version, sequence))
}

/// Recomputes the hash of a decoded leaf and compares it with the stored one.
pub fn check_leaf_hash(node: &Node) -> Result<()> {
    let (Some(value), Some(stored)) = (node.value.as_deref(), node.hash()) else {
        return Ok(());
    };
    let computed = Node::leaf_hash(&node.key, value);
    if computed != stored {
        let at = node
            .node_key
            .map(|k| k.to_string())
            .unwrap_or_else(|| "working".into());
        return Err(IavlError::consistency(format!(
            "leaf {at}: stored hash {stored} != computed {computed}"
        )));
    }
    Ok(())
}
