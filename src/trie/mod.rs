//! Authenticated Merkle prefix trie
//!
//! Keys are addressed by the bits of their SHA-256 digest. Each node is
//! stored under its own hash, so the root hash commits to every key/value
//! pair in the trie:
//! - Interior nodes hash their two child hashes
//! - Empty and Leaf nodes hash a type tag, the trie nonce and their prefix
//! - The root hash is kept under a reserved entry-pointer key

mod batch;
mod node;
mod proof;
mod staging;
mod tree;

pub use batch::{KvPair, Mutation, OpType};
pub use node::{
    decode_empty, decode_interior, decode_leaf, EmptyNode, InteriorNode, LeafNode, Node, NodeType,
};
pub use proof::{Proof, Terminal};
pub use staging::StagingTrie;
pub use tree::{generate_nonce, Trie};

/// Reserved key holding the current root hash
pub const ENTRY_KEY: &[u8] = b"authtrie_entry";

/// Reserved key holding the trie nonce
pub const NONCE_KEY: &[u8] = b"authtrie_nonce";

/// Longest allowed metadata key. Node keys are 32-byte hashes, so shorter
/// keys can never collide with a node.
pub const MAX_METADATA_KEY_LEN: usize = 31;
