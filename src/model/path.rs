//! Key to bit-path derivation
//!
//! Every node in the trie sits at a prefix of a key's bit-path. Bits are
//! taken most-significant first; a `true` bit selects the left child.

use super::{Hash, HASH_LEN};
use serde::{Deserialize, Serialize};

/// How keys are turned into bit-paths
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEncoding {
    /// Bits of `SHA-256(key)`, always 256 bits long
    #[default]
    Sha256,
    /// Bits of the raw key bytes. Only meant for tests that need to place
    /// keys at predictable positions.
    Raw,
}

impl KeyEncoding {
    /// Length of every bit-path, `None` when it depends on the key
    pub fn max_path_len(&self) -> Option<usize> {
        match self {
            KeyEncoding::Sha256 => Some(HASH_LEN * 8),
            KeyEncoding::Raw => None,
        }
    }

    /// Compute the bit-path of `key`
    pub fn bit_path(&self, key: &[u8]) -> Vec<bool> {
        match self {
            KeyEncoding::Sha256 => to_bits(Hash::digest(key).as_bytes()),
            KeyEncoding::Raw => to_bits(key),
        }
    }
}

/// Expand bytes into bits, MSB first
pub fn to_bits(buf: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(buf.len() * 8);
    for byte in buf {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1 == 1);
        }
    }
    bits
}

/// Pack bits into bytes, MSB first. The last byte is zero-padded.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut buf = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            buf[i / 8] |= 0x80 >> (i % 8);
        }
    }
    buf
}
