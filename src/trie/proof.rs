//! Inclusion and absence proofs
//!
//! A proof is the list of interior nodes on the path of a key (root first),
//! the Leaf or Empty node that ends the path, and the trie nonce. Anyone
//! holding a trusted root hash can check it with [`Proof::verify`].

use super::node::{EmptyNode, InteriorNode, LeafNode};
use crate::model::{Hash, KeyEncoding};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// The node a path walk ends at
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    Leaf(LeafNode),
    Empty(EmptyNode),
}

impl Terminal {
    pub fn prefix(&self) -> &[bool] {
        match self {
            Terminal::Leaf(leaf) => &leaf.prefix,
            Terminal::Empty(empty) => &empty.prefix,
        }
    }

    pub fn hash(&self, nonce: &[u8]) -> Hash {
        match self {
            Terminal::Leaf(leaf) => leaf.hash(nonce),
            Terminal::Empty(empty) => empty.hash(nonce),
        }
    }
}

/// Evidence that a key is, or is not, in the trie with a given root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Interior nodes from the root down to the parent of `terminal`
    pub interiors: Vec<InteriorNode>,
    pub terminal: Terminal,
    pub nonce: Vec<u8>,
    /// Key encoding of the trie that produced the proof
    pub key_encoding: KeyEncoding,
}

impl Proof {
    /// Root hash this proof commits to, `None` for a proof without interiors
    pub fn get_root(&self) -> Option<Hash> {
        self.interiors.first().map(InteriorNode::hash)
    }

    pub fn leaf(&self) -> Option<&LeafNode> {
        match &self.terminal {
            Terminal::Leaf(leaf) => Some(leaf),
            Terminal::Empty(_) => None,
        }
    }

    pub fn empty(&self) -> Option<&EmptyNode> {
        match &self.terminal {
            Terminal::Empty(empty) => Some(empty),
            Terminal::Leaf(_) => None,
        }
    }

    /// Key and value of the terminal leaf, if the path ends at one. The leaf
    /// may hold a different key than the one the proof was requested for.
    pub fn key_value(&self) -> Option<(&[u8], &[u8])> {
        self.leaf()
            .map(|leaf| (leaf.key.as_slice(), leaf.value.as_slice()))
    }

    /// Check that `root` is the trusted root and report whether `key` is
    /// present. This is the entry point to use for proofs received from an
    /// untrusted party; keys are always hashed with SHA-256.
    pub fn verify(&self, root: &Hash, key: &[u8]) -> Result<bool> {
        self.verify_with(root, key, KeyEncoding::Sha256)
    }

    /// [`Proof::verify`] for tries using a non-default key encoding
    pub fn verify_with(&self, root: &Hash, key: &[u8], encoding: KeyEncoding) -> Result<bool> {
        match self.get_root() {
            Some(got) if got == *root => self.check_chain(key, encoding),
            Some(got) => Err(Error::ProofVerification(format!(
                "root mismatch: expected {}, proof has {}",
                root, got
            ))),
            None => Err(Error::ProofVerification(
                "proof has no interior nodes".into(),
            )),
        }
    }

    /// Report whether `key` is present, checking only that the proof is
    /// internally consistent. The root is not compared against anything, so
    /// callers must check [`Proof::get_root`] themselves; prefer
    /// [`Proof::verify`].
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.check_chain(key, self.key_encoding)
    }

    /// True if the proof is consistent and shows `key` present
    pub fn matches(&self, key: &[u8]) -> bool {
        matches!(self.exists(key), Ok(true))
    }

    fn check_chain(&self, key: &[u8], encoding: KeyEncoding) -> Result<bool> {
        let bits = encoding.bit_path(key);
        let first = self
            .interiors
            .first()
            .ok_or_else(|| Error::ProofVerification("proof has no interior nodes".into()))?;

        let mut expected = first.hash();
        for (depth, interior) in self.interiors.iter().enumerate() {
            if interior.hash() != expected {
                return Err(Error::ProofVerification(format!(
                    "interior hash mismatch at depth {}",
                    depth
                )));
            }
            let bit = bits.get(depth).ok_or_else(|| {
                Error::ProofVerification(format!("key bit-path ends at depth {}", depth))
            })?;
            expected = *interior.child(*bit);
        }

        let consumed = &bits[..self.interiors.len()];
        if self.terminal.prefix() != consumed {
            return Err(Error::ProofVerification(
                "terminal prefix does not match key path".into(),
            ));
        }
        if self.terminal.hash(&self.nonce) != expected {
            return Err(Error::ProofVerification(
                "terminal hash does not match parent".into(),
            ));
        }

        match &self.terminal {
            Terminal::Leaf(leaf) => Ok(leaf.key == key),
            Terminal::Empty(_) => Ok(false),
        }
    }
}
