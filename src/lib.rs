//! # authtrie
//!
//! An authenticated key/value store built on a Merkle prefix trie.
//!
//! Every key maps to a path of bits; every node is stored under its own
//! hash. The root hash therefore commits to the whole key set, and any key
//! can be proven present or absent with a [`Proof`] checked against that
//! root.
//!
//! ## Core Concepts
//!
//! - **Trie**: the tree itself, persisted through a [`store::Database`]
//! - **Proof**: the nodes on a key's path, verifiable against a root hash
//! - **StagingTrie**: in-memory pending writes with dry-run roots and proofs
//! - **Nonce**: random salt mixed into leaf and empty hashes
//!
//! ## Example
//!
//! ```ignore
//! use authtrie::{MemDb, Trie, TrieConfig};
//! use std::sync::Arc;
//!
//! let trie = Trie::create(Arc::new(MemDb::new()), &TrieConfig::default())?;
//! trie.set(b"alice", b"10")?;
//! let root = trie.get_root()?;
//! assert!(trie.get_proof(b"alice")?.verify(&root, b"alice")?);
//! ```

pub mod config;
pub mod model;
pub mod store;
pub mod trie;

mod error;

pub use config::TrieConfig;
pub use error::{Error, Result};
pub use model::{Hash, KeyEncoding};
pub use store::{Bucket, Database, MemDb, RedbDb};
pub use trie::{KvPair, Mutation, OpType, Proof, StagingTrie, Terminal, Trie};
