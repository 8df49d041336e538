//! Trie configuration

use crate::model::KeyEncoding;
use serde::{Deserialize, Serialize};

/// Default redb table holding the trie records
pub const DEFAULT_BUCKET: &str = "authtrie";

/// Default nonce length in bytes
pub const DEFAULT_NONCE_LEN: usize = 32;

/// Settings for creating or opening a trie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieConfig {
    /// Name of the table that holds nodes, reserved keys and metadata
    pub bucket: String,
    /// How keys map to bit-paths
    pub key_encoding: KeyEncoding,
    /// Length of the nonce generated by [`crate::Trie::create`]
    pub nonce_len: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        TrieConfig {
            bucket: DEFAULT_BUCKET.to_string(),
            key_encoding: KeyEncoding::Sha256,
            nonce_len: DEFAULT_NONCE_LEN,
        }
    }
}

impl TrieConfig {
    /// Config using raw key bits instead of hashed keys
    pub fn raw_keys() -> Self {
        TrieConfig {
            key_encoding: KeyEncoding::Raw,
            ..Self::default()
        }
    }
}
