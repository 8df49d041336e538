//! Core value types shared by the trie and its storage

mod hash;
mod path;

pub use hash::{Hash, HASH_LEN};
pub use path::{pack_bits, to_bits, KeyEncoding};
