//! Trie node types and their record encoding
//!
//! A stored record is one tag byte followed by the bincode encoding of the
//! variant's fields. The record's key in the bucket is the node hash:
//!
//! ```text
//! Interior: SHA-256(left || right)
//! Empty:    SHA-256(0x02 || nonce || pack(prefix) || u32le(len(prefix)))
//! Leaf:     SHA-256(0x03 || nonce || pack(prefix) || u32le(len(prefix)) || key || value)
//! ```
//!
//! Interior hashes carry neither tag nor nonce.

use crate::model::{pack_bits, Hash};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Type tag written as the first byte of every node record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Interior,
    Empty,
    Leaf,
}

impl NodeType {
    pub fn as_byte(&self) -> u8 {
        match self {
            NodeType::Interior => 1,
            NodeType::Empty => 2,
            NodeType::Leaf => 3,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(NodeType::Interior),
            2 => Some(NodeType::Empty),
            3 => Some(NodeType::Leaf),
            _ => None,
        }
    }
}

/// A branch with exactly two children, referenced by hash
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteriorNode {
    pub left: Hash,
    pub right: Hash,
}

/// Placeholder for a subtree that holds no key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyNode {
    /// Bits taken from the root to reach this node
    pub prefix: Vec<bool>,
}

/// A single key/value pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNode {
    /// Bits taken from the root to reach this node
    pub prefix: Vec<bool>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Any node of the trie
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Interior(InteriorNode),
    Empty(EmptyNode),
    Leaf(LeafNode),
}

impl InteriorNode {
    pub fn new(left: Hash, right: Hash) -> Self {
        InteriorNode { left, right }
    }

    pub fn hash(&self) -> Hash {
        Hash::digest_many(&[self.left.as_bytes(), self.right.as_bytes()])
    }

    /// Child hash selected by `bit` (left on `true`)
    pub fn child(&self, bit: bool) -> &Hash {
        if bit {
            &self.left
        } else {
            &self.right
        }
    }

    pub fn set_child(&mut self, bit: bool, hash: Hash) {
        if bit {
            self.left = hash;
        } else {
            self.right = hash;
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_tagged(NodeType::Interior, self)
    }
}

impl EmptyNode {
    pub fn new(prefix: Vec<bool>) -> Self {
        EmptyNode { prefix }
    }

    pub fn hash(&self, nonce: &[u8]) -> Hash {
        let packed = pack_bits(&self.prefix);
        let len = prefix_len_bytes(&self.prefix);
        Hash::digest_many(&[&[NodeType::Empty.as_byte()], nonce, &packed, &len])
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_tagged(NodeType::Empty, self)
    }
}

impl LeafNode {
    pub fn new(prefix: Vec<bool>, key: Vec<u8>, value: Vec<u8>) -> Self {
        LeafNode { prefix, key, value }
    }

    pub fn hash(&self, nonce: &[u8]) -> Hash {
        let packed = pack_bits(&self.prefix);
        let len = prefix_len_bytes(&self.prefix);
        Hash::digest_many(&[
            &[NodeType::Leaf.as_byte()],
            nonce,
            &packed,
            &len,
            &self.key,
            &self.value,
        ])
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_tagged(NodeType::Leaf, self)
    }
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Interior(_) => NodeType::Interior,
            Node::Empty(_) => NodeType::Empty,
            Node::Leaf(_) => NodeType::Leaf,
        }
    }

    /// Compute the hash of this node; `nonce` is ignored for interiors
    pub fn hash(&self, nonce: &[u8]) -> Hash {
        match self {
            Node::Interior(n) => n.hash(),
            Node::Empty(n) => n.hash(nonce),
            Node::Leaf(n) => n.hash(nonce),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Node::Interior(n) => n.encode(),
            Node::Empty(n) => n.encode(),
            Node::Leaf(n) => n.encode(),
        }
    }

    /// Decode a record of any node type
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (tag, body) = split_tag(buf)?;
        match tag {
            NodeType::Interior => Ok(Node::Interior(decode_body(tag, body)?)),
            NodeType::Empty => Ok(Node::Empty(decode_body(tag, body)?)),
            NodeType::Leaf => Ok(Node::Leaf(decode_body(tag, body)?)),
        }
    }
}

pub fn decode_interior(buf: &[u8]) -> Result<InteriorNode> {
    decode_expected(NodeType::Interior, buf)
}

pub fn decode_empty(buf: &[u8]) -> Result<EmptyNode> {
    decode_expected(NodeType::Empty, buf)
}

pub fn decode_leaf(buf: &[u8]) -> Result<LeafNode> {
    decode_expected(NodeType::Leaf, buf)
}

fn prefix_len_bytes(prefix: &[bool]) -> [u8; 4] {
    (prefix.len() as u32).to_le_bytes()
}

fn encode_tagged<T: Serialize>(tag: NodeType, fields: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(fields)?;
    let mut buf = Vec::with_capacity(body.len() + 1);
    buf.push(tag.as_byte());
    buf.extend(body);
    Ok(buf)
}

fn split_tag(buf: &[u8]) -> Result<(NodeType, &[u8])> {
    let (&first, body) = buf
        .split_first()
        .ok_or_else(|| Error::StorageCorruption("empty node record".into()))?;
    let tag = NodeType::from_byte(first)
        .ok_or_else(|| Error::StorageCorruption(format!("invalid node type: {}", first)))?;
    Ok((tag, body))
}

fn decode_expected<T: for<'de> Deserialize<'de>>(expected: NodeType, buf: &[u8]) -> Result<T> {
    let (tag, body) = split_tag(buf)?;
    if tag != expected {
        return Err(Error::StorageCorruption(format!(
            "expected {:?} node, got {:?}",
            expected, tag
        )));
    }
    decode_body(tag, body)
}

fn decode_body<T: for<'de> Deserialize<'de>>(tag: NodeType, body: &[u8]) -> Result<T> {
    bincode::deserialize(body)
        .map_err(|e| Error::StorageCorruption(format!("undecodable {:?} node: {}", tag, e)))
}
