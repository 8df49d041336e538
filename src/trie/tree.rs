//! Merkle prefix trie over a transactional bucket
//!
//! The trie never caches its root in memory: every operation reads the
//! entry pointer from storage, rewrites the nodes on the key's path
//! copy-on-write, and stores the new root hash back under the entry
//! pointer. Deleted keys leave Empty placeholders behind; the trie never
//! shrinks.

use super::batch::{KvPair, OpType};
use super::node::{EmptyNode, InteriorNode, LeafNode, Node};
use super::proof::{Proof, Terminal};
use super::staging::StagingTrie;
use super::{ENTRY_KEY, MAX_METADATA_KEY_LEN, NONCE_KEY};
use crate::config::TrieConfig;
use crate::model::{Hash, KeyEncoding, HASH_LEN};
use crate::store::{update_with, view_with, Bucket, Database};
use crate::{Error, Result};
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Generate a random nonce of `len` bytes
pub fn generate_nonce(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// An authenticated key/value trie stored in a [`Database`]
#[derive(Clone)]
pub struct Trie {
    db: Arc<dyn Database>,
    nonce: Vec<u8>,
    key_encoding: KeyEncoding,
}

impl fmt::Debug for Trie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trie")
            .field("nonce", &hex::encode(&self.nonce))
            .field("key_encoding", &self.key_encoding)
            .finish()
    }
}

impl Trie {
    /// Initialise a new trie in `db` with the given nonce. Fails if the
    /// database already holds a trie.
    pub fn new(db: Arc<dyn Database>, nonce: &[u8]) -> Result<Self> {
        Self::new_with_config(db, nonce, &TrieConfig::default())
    }

    /// Initialise a new trie with a freshly generated nonce
    pub fn create(db: Arc<dyn Database>, config: &TrieConfig) -> Result<Self> {
        let nonce = generate_nonce(config.nonce_len);
        Self::new_with_config(db, &nonce, config)
    }

    pub fn new_with_config(db: Arc<dyn Database>, nonce: &[u8], config: &TrieConfig) -> Result<Self> {
        if nonce.is_empty() {
            return Err(Error::InvalidArgument("nonce must not be empty".into()));
        }
        let trie = Trie {
            db,
            nonce: nonce.to_vec(),
            key_encoding: config.key_encoding,
        };

        let root = update_with(trie.db.as_ref(), |bucket| {
            if bucket.get(NONCE_KEY)?.is_some() {
                return Err(Error::Consistency("nonce already exists".into()));
            }
            bucket.put(NONCE_KEY, &trie.nonce)?;

            let left = trie.store_node(bucket, &Node::Empty(EmptyNode::new(vec![true])))?;
            let right = trie.store_node(bucket, &Node::Empty(EmptyNode::new(vec![false])))?;
            let root = trie.store_node(bucket, &Node::Interior(InteriorNode::new(left, right)))?;
            bucket.put(ENTRY_KEY, root.as_bytes())?;
            Ok(root)
        })?;

        debug!(root = %root, encoding = ?trie.key_encoding, "created trie");
        Ok(trie)
    }

    /// Open an existing trie. Only the nonce and the entry pointer are
    /// checked; use [`Trie::is_valid`] to audit the whole tree.
    pub fn load(db: Arc<dyn Database>) -> Result<Self> {
        Self::load_with_config(db, &TrieConfig::default())
    }

    pub fn load_with_config(db: Arc<dyn Database>, config: &TrieConfig) -> Result<Self> {
        let nonce = view_with(db.as_ref(), |bucket| {
            let nonce = bucket
                .get(NONCE_KEY)?
                .ok_or_else(|| Error::Consistency("nonce does not exist".into()))?;
            let root = bucket
                .get(ENTRY_KEY)?
                .ok_or_else(|| Error::Consistency("entry pointer does not exist".into()))?;
            if bucket.get(&root)?.is_none() {
                return Err(Error::Consistency(format!(
                    "entry pointer references missing record {}",
                    hex::encode(&root)
                )));
            }
            Ok(nonce)
        })?;

        debug!(encoding = ?config.key_encoding, "loaded trie");
        Ok(Trie {
            db,
            nonce,
            key_encoding: config.key_encoding,
        })
    }

    pub fn get_nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn key_encoding(&self) -> KeyEncoding {
        self.key_encoding
    }

    /// The backing database
    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Create a staging overlay on top of this trie
    pub fn staging(&self) -> StagingTrie {
        StagingTrie::new(self.clone())
    }

    // === Reads ===

    /// Current root hash
    pub fn get_root(&self) -> Result<Hash> {
        view_with(self.db.as_ref(), |bucket| self.get_root_with_bucket(bucket))
    }

    pub fn get_root_with_bucket(&self, bucket: &dyn Bucket) -> Result<Hash> {
        let buf = bucket
            .get(ENTRY_KEY)?
            .ok_or_else(|| Error::StorageCorruption("entry pointer missing".into()))?;
        Hash::from_slice(&buf).ok_or_else(|| {
            Error::StorageCorruption(format!("entry pointer has {} bytes", buf.len()))
        })
    }

    /// Look up `key`. A missing key is `Ok(None)`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        view_with(self.db.as_ref(), |bucket| self.get_with_bucket(bucket, key))
    }

    pub fn get_with_bucket(&self, bucket: &dyn Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (_, terminal) = self.walk(bucket, key)?;
        match terminal {
            Terminal::Leaf(leaf) if leaf.key == key => Ok(Some(leaf.value)),
            _ => Ok(None),
        }
    }

    /// Build an inclusion or absence proof for `key`
    pub fn get_proof(&self, key: &[u8]) -> Result<Proof> {
        view_with(self.db.as_ref(), |bucket| self.get_proof_with_bucket(bucket, key))
    }

    pub fn get_proof_with_bucket(&self, bucket: &dyn Bucket, key: &[u8]) -> Result<Proof> {
        let (interiors, terminal) = self.walk(bucket, key)?;
        Ok(Proof {
            interiors,
            terminal,
            nonce: self.nonce.clone(),
            key_encoding: self.key_encoding,
        })
    }

    /// Follow the path of `key` from the root, collecting every interior
    /// node until a Leaf or Empty node is reached.
    fn walk(&self, bucket: &dyn Bucket, key: &[u8]) -> Result<(Vec<InteriorNode>, Terminal)> {
        let bits = self.key_encoding.bit_path(key);
        let mut node_key = self.get_root_with_bucket(bucket)?;
        let mut interiors = Vec::new();

        loop {
            match self.load_node(bucket, &node_key)? {
                Node::Interior(interior) => {
                    let bit = bit_at(&bits, interiors.len())?;
                    node_key = *interior.child(bit);
                    interiors.push(interior);
                }
                Node::Empty(empty) => return Ok((interiors, Terminal::Empty(empty))),
                Node::Leaf(leaf) => return Ok((interiors, Terminal::Leaf(leaf))),
            }
        }
    }

    // === Writes ===

    /// Set or overwrite a key/value pair
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        update_with(self.db.as_ref(), |bucket| self.set_with_bucket(bucket, key, value))
    }

    pub fn set_with_bucket(&self, bucket: &mut dyn Bucket, key: &[u8], value: &[u8]) -> Result<()> {
        let root = self.get_root_with_bucket(bucket)?;
        let bits = self.key_encoding.bit_path(key);
        let new_root = self.set_node(bucket, &root, &bits, 0, key, value)?;
        bucket.put(ENTRY_KEY, new_root.as_bytes())
    }

    fn set_node(
        &self,
        bucket: &mut dyn Bucket,
        node_key: &Hash,
        bits: &[bool],
        depth: usize,
        key: &[u8],
        value: &[u8],
    ) -> Result<Hash> {
        match self.load_node(bucket, node_key)? {
            Node::Empty(empty) => {
                trace!(depth, "set: empty to leaf");
                let leaf = LeafNode::new(empty.prefix, key.to_vec(), value.to_vec());
                self.replace_node(bucket, node_key, &Node::Leaf(leaf))
            }
            Node::Leaf(mut leaf) if leaf.key == key => {
                trace!(depth, "set: overwrite leaf");
                leaf.value = value.to_vec();
                self.replace_node(bucket, node_key, &Node::Leaf(leaf))
            }
            Node::Leaf(leaf) => {
                trace!(depth, "set: extend leaf");
                let old_bits = self.key_encoding.bit_path(&leaf.key);
                let old = Placement::new(&leaf.key, &leaf.value, &old_bits);
                let new = Placement::new(key, value, bits);
                let (left, right) = self.extend_leaf(bucket, leaf.prefix.clone(), &old, &new)?;
                let interior = InteriorNode::new(left, right);
                self.replace_node(bucket, node_key, &Node::Interior(interior))
            }
            Node::Interior(mut interior) => {
                let bit = bit_at(bits, depth)?;
                let child = *interior.child(bit);
                let new_child = self.set_node(bucket, &child, bits, depth + 1, key, value)?;
                interior.set_child(bit, new_child);
                self.replace_node(bucket, node_key, &Node::Interior(interior))
            }
        }
    }

    /// Build the subtree that replaces `old` once a second key lands on its
    /// position. Returns the (left, right) children of the node at `prefix`.
    fn extend_leaf(
        &self,
        bucket: &mut dyn Bucket,
        prefix: Vec<bool>,
        old: &Placement<'_>,
        new: &Placement<'_>,
    ) -> Result<(Hash, Hash)> {
        let depth = prefix.len();
        let (old_bit, new_bit) = match (old.bits.get(depth), new.bits.get(depth)) {
            (Some(a), Some(b)) => (*a, *b),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "key bit-paths do not diverge within {} bits",
                    depth
                )))
            }
        };

        let mut taken = prefix.clone();
        taken.push(old_bit);

        if old_bit != new_bit {
            let mut other = prefix;
            other.push(new_bit);
            let old_leaf = LeafNode::new(taken, old.key.to_vec(), old.value.to_vec());
            let new_leaf = LeafNode::new(other, new.key.to_vec(), new.value.to_vec());
            let old_hash = self.store_node(bucket, &Node::Leaf(old_leaf))?;
            let new_hash = self.store_node(bucket, &Node::Leaf(new_leaf))?;
            return Ok(if old_bit {
                (old_hash, new_hash)
            } else {
                (new_hash, old_hash)
            });
        }

        let (left, right) = self.extend_leaf(bucket, taken, old, new)?;
        let interior = self.store_node(bucket, &Node::Interior(InteriorNode::new(left, right)))?;

        let mut untaken = prefix;
        untaken.push(!old_bit);
        let empty = self.store_node(bucket, &Node::Empty(EmptyNode::new(untaken)))?;

        Ok(if old_bit {
            (interior, empty)
        } else {
            (empty, interior)
        })
    }

    /// Delete `key`. Deleting a missing key leaves the trie unchanged.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        update_with(self.db.as_ref(), |bucket| self.delete_with_bucket(bucket, key))
    }

    pub fn delete_with_bucket(&self, bucket: &mut dyn Bucket, key: &[u8]) -> Result<()> {
        let root = self.get_root_with_bucket(bucket)?;
        let bits = self.key_encoding.bit_path(key);
        match self.delete_node(bucket, &root, &bits, 0, key)? {
            Some(new_root) => bucket.put(ENTRY_KEY, new_root.as_bytes()),
            None => Ok(()),
        }
    }

    /// Returns the new subtree hash, or `None` if nothing changed
    fn delete_node(
        &self,
        bucket: &mut dyn Bucket,
        node_key: &Hash,
        bits: &[bool],
        depth: usize,
        key: &[u8],
    ) -> Result<Option<Hash>> {
        match self.load_node(bucket, node_key)? {
            Node::Empty(_) => Ok(None),
            Node::Leaf(leaf) if leaf.key == key => {
                trace!(depth, "delete: leaf to empty");
                let empty = EmptyNode::new(leaf.prefix);
                self.replace_node(bucket, node_key, &Node::Empty(empty)).map(Some)
            }
            Node::Leaf(_) => Ok(None),
            Node::Interior(mut interior) => {
                let bit = bit_at(bits, depth)?;
                let child = *interior.child(bit);
                match self.delete_node(bucket, &child, bits, depth + 1, key)? {
                    None => Ok(None),
                    Some(new_child) => {
                        interior.set_child(bit, new_child);
                        self.replace_node(bucket, node_key, &Node::Interior(interior))
                            .map(Some)
                    }
                }
            }
        }
    }

    /// Apply a sequence of mutations in one transaction
    pub fn batch<P: KvPair>(&self, pairs: &[P]) -> Result<()> {
        update_with(self.db.as_ref(), |bucket| self.batch_with_bucket(bucket, pairs))
    }

    pub fn batch_with_bucket<P: KvPair>(&self, bucket: &mut dyn Bucket, pairs: &[P]) -> Result<()> {
        for pair in pairs {
            match pair.op() {
                OpType::Set => self.set_with_bucket(bucket, pair.key(), pair.value())?,
                OpType::Delete => self.delete_with_bucket(bucket, pair.key())?,
                OpType::Noop => {}
            }
        }
        Ok(())
    }

    // === Traversal ===

    /// Call `f` on every key/value pair, metadata excluded
    pub fn for_each<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        view_with(self.db.as_ref(), |bucket| self.for_each_with_bucket(bucket, f))
    }

    pub fn for_each_with_bucket<F>(&self, bucket: &dyn Bucket, f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        self.visit(bucket, &mut LeafCallback(f))
    }

    /// Audit the whole trie: every node hashes to its storage key, every
    /// terminal prefix matches its position, every leaf has a valid proof
    /// against the current root, and no unreachable node records exist.
    pub fn is_valid(&self) -> Result<()> {
        view_with(self.db.as_ref(), |bucket| {
            let bucket: &dyn Bucket = bucket;
            let root = self.get_root_with_bucket(bucket)?;
            let mut audit = Audit {
                trie: self,
                bucket,
                root,
                visited: 0,
            };
            self.visit(bucket, &mut audit)?;
            let visited = audit.visited;

            let mut records = 0usize;
            bucket.for_each(&mut |key: &[u8], _: &[u8]| {
                if key.len() == HASH_LEN || is_reserved(key) {
                    records += 1;
                }
                Ok(())
            })?;

            if records != visited + 2 {
                warn!(records, visited, "trie audit found unreachable records");
                return Err(Error::StorageCorruption(format!(
                    "{} records stored but {} reachable",
                    records,
                    visited + 2
                )));
            }
            debug!(root = %root, nodes = visited, "trie audit passed");
            Ok(())
        })
    }

    /// Depth-first traversal from the root, left before right. Interior
    /// hashes are checked on the way down so a corrupted child pointer
    /// cannot send the walk round in a cycle.
    fn visit(&self, bucket: &dyn Bucket, visitor: &mut dyn NodeVisitor) -> Result<()> {
        let root = self.get_root_with_bucket(bucket)?;
        let max_depth = self.key_encoding.max_path_len();
        let mut stack = vec![(root, Vec::new())];

        while let Some((node_key, path)) = stack.pop() {
            match self.load_node(bucket, &node_key)? {
                Node::Interior(interior) => {
                    if interior.hash() != node_key {
                        return Err(Error::StorageCorruption(format!(
                            "interior stored under {} hashes to {}",
                            node_key,
                            interior.hash()
                        )));
                    }
                    if max_depth.is_some_and(|max| path.len() >= max) {
                        return Err(Error::StorageCorruption(format!(
                            "interior {} below the deepest possible key bit",
                            node_key
                        )));
                    }
                    visitor.on_interior(&node_key, &interior)?;
                    let mut right = path.clone();
                    right.push(false);
                    let mut left = path;
                    left.push(true);
                    stack.push((interior.right, right));
                    stack.push((interior.left, left));
                }
                Node::Empty(empty) => visitor.on_empty(&node_key, &empty, &path)?,
                Node::Leaf(leaf) => visitor.on_leaf(&node_key, &leaf, &path)?,
            }
        }
        Ok(())
    }

    // === Metadata ===

    /// Read an application metadata value
    pub fn get_metadata(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        view_with(self.db.as_ref(), |bucket| self.get_metadata_with_bucket(bucket, key))
    }

    pub fn get_metadata_with_bucket(&self, bucket: &dyn Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        check_metadata_key(key)?;
        bucket.get(key)
    }

    pub fn set_metadata(&self, key: &[u8], value: &[u8]) -> Result<()> {
        update_with(self.db.as_ref(), |bucket| self.set_metadata_with_bucket(bucket, key, value))
    }

    pub fn set_metadata_with_bucket(&self, bucket: &mut dyn Bucket, key: &[u8], value: &[u8]) -> Result<()> {
        check_metadata_key(key)?;
        bucket.put(key, value)
    }

    pub fn delete_metadata(&self, key: &[u8]) -> Result<()> {
        update_with(self.db.as_ref(), |bucket| self.delete_metadata_with_bucket(bucket, key))
    }

    pub fn delete_metadata_with_bucket(&self, bucket: &mut dyn Bucket, key: &[u8]) -> Result<()> {
        check_metadata_key(key)?;
        bucket.delete(key)
    }

    // === Copying ===

    /// Copy every record of this trie (nodes, reserved keys and metadata)
    /// into `dst`. `dst` must belong to a different database: copying into
    /// a transaction on the same backend can deadlock.
    pub fn copy_to(&self, dst: &mut dyn Bucket) -> Result<()> {
        view_with(self.db.as_ref(), |src| {
            src.for_each(&mut |key: &[u8], value: &[u8]| dst.put(key, value))
        })
    }

    // === Internal helpers ===

    fn load_node(&self, bucket: &dyn Bucket, node_key: &Hash) -> Result<Node> {
        let buf = bucket
            .get(node_key.as_bytes())?
            .ok_or_else(|| Error::StorageCorruption(format!("missing node {}", node_key)))?;
        Node::decode(&buf)
    }

    fn store_node(&self, bucket: &mut dyn Bucket, node: &Node) -> Result<Hash> {
        let hash = node.hash(&self.nonce);
        bucket.put(hash.as_bytes(), &node.encode()?)?;
        Ok(hash)
    }

    /// Remove the record at `old` and store `node`. The delete comes first
    /// so that an unchanged node keeps its record.
    fn replace_node(&self, bucket: &mut dyn Bucket, old: &Hash, node: &Node) -> Result<Hash> {
        bucket.delete(old.as_bytes())?;
        self.store_node(bucket, node)
    }
}

/// A key/value pair together with its bit-path
struct Placement<'a> {
    key: &'a [u8],
    value: &'a [u8],
    bits: &'a [bool],
}

impl<'a> Placement<'a> {
    fn new(key: &'a [u8], value: &'a [u8], bits: &'a [bool]) -> Self {
        Placement { key, value, bits }
    }
}

fn bit_at(bits: &[bool], depth: usize) -> Result<bool> {
    bits.get(depth).copied().ok_or_else(|| {
        Error::InvalidArgument(format!("key bit-path ends at depth {}", depth))
    })
}

fn is_reserved(key: &[u8]) -> bool {
    key == ENTRY_KEY || key == NONCE_KEY
}

fn check_metadata_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_METADATA_KEY_LEN {
        return Err(Error::InvalidArgument(format!(
            "metadata key is {} bytes, at most {} allowed",
            key.len(),
            MAX_METADATA_KEY_LEN
        )));
    }
    if is_reserved(key) {
        return Err(Error::InvalidArgument(
            "metadata key collides with a reserved key".into(),
        ));
    }
    Ok(())
}

/// Hooks called by [`Trie::visit`]; `path` is the bit sequence taken from
/// the root to reach the node.
trait NodeVisitor {
    fn on_interior(&mut self, _node_key: &Hash, _node: &InteriorNode) -> Result<()> {
        Ok(())
    }

    fn on_empty(&mut self, _node_key: &Hash, _node: &EmptyNode, _path: &[bool]) -> Result<()> {
        Ok(())
    }

    fn on_leaf(&mut self, _node_key: &Hash, _node: &LeafNode, _path: &[bool]) -> Result<()> {
        Ok(())
    }
}

struct LeafCallback<F>(F);

impl<F: FnMut(&[u8], &[u8]) -> Result<()>> NodeVisitor for LeafCallback<F> {
    fn on_leaf(&mut self, _node_key: &Hash, node: &LeafNode, _path: &[bool]) -> Result<()> {
        (self.0)(&node.key, &node.value)
    }
}

struct Audit<'a> {
    trie: &'a Trie,
    bucket: &'a dyn Bucket,
    root: Hash,
    visited: usize,
}

impl Audit<'_> {
    fn check_hash(&self, node_key: &Hash, actual: Hash) -> Result<()> {
        if actual != *node_key {
            return Err(Error::StorageCorruption(format!(
                "node stored under {} hashes to {}",
                node_key, actual
            )));
        }
        Ok(())
    }

    fn check_prefix(&self, node_key: &Hash, prefix: &[bool], path: &[bool]) -> Result<()> {
        if prefix != path {
            return Err(Error::StorageCorruption(format!(
                "node {} has prefix of {} bits at depth {}",
                node_key,
                prefix.len(),
                path.len()
            )));
        }
        Ok(())
    }
}

impl NodeVisitor for Audit<'_> {
    fn on_interior(&mut self, _node_key: &Hash, _node: &InteriorNode) -> Result<()> {
        self.visited += 1;
        Ok(())
    }

    fn on_empty(&mut self, node_key: &Hash, node: &EmptyNode, path: &[bool]) -> Result<()> {
        self.visited += 1;
        self.check_hash(node_key, node.hash(&self.trie.nonce))?;
        self.check_prefix(node_key, &node.prefix, path)
    }

    fn on_leaf(&mut self, node_key: &Hash, node: &LeafNode, path: &[bool]) -> Result<()> {
        self.visited += 1;
        self.check_hash(node_key, node.hash(&self.trie.nonce))?;
        self.check_prefix(node_key, &node.prefix, path)?;

        let proof = self.trie.get_proof_with_bucket(self.bucket, &node.key)?;
        if !proof.verify_with(&self.root, &node.key, self.trie.key_encoding)? {
            return Err(Error::StorageCorruption(format!(
                "proof for leaf {} does not show its key",
                node_key
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemDb;
    use crate::trie::Mutation;

    fn raw_trie() -> (Arc<MemDb>, Trie) {
        let db = Arc::new(MemDb::new());
        let trie = Trie::new_with_config(db.clone(), b"nonce", &TrieConfig::raw_keys()).unwrap();
        (db, trie)
    }

    fn root_children(trie: &Trie) -> (Node, Node) {
        view_with(trie.db().as_ref(), |bucket| {
            let root = trie.get_root_with_bucket(bucket)?;
            match trie.load_node(bucket, &root)? {
                Node::Interior(interior) => Ok((
                    trie.load_node(bucket, &interior.left)?,
                    trie.load_node(bucket, &interior.right)?,
                )),
                other => panic!("root is {:?}", other.node_type()),
            }
        })
        .unwrap()
    }

    #[test]
    fn test_new_writes_five_records() {
        let (db, trie) = raw_trie();
        assert_eq!(db.len(), 5);
        assert_eq!(trie.get_nonce(), b"nonce");

        let (left, right) = root_children(&trie);
        assert_eq!(left, Node::Empty(EmptyNode::new(vec![true])));
        assert_eq!(right, Node::Empty(EmptyNode::new(vec![false])));
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_new_twice_fails() {
        let (db, _) = raw_trie();
        let err = Trie::new(db, b"other").unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn test_empty_nonce_rejected() {
        let err = Trie::new(Arc::new(MemDb::new()), b"").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_load_requires_trie() {
        let err = Trie::load(Arc::new(MemDb::new())).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));

        let (db, trie) = raw_trie();
        trie.set(&[0xff], b"v").unwrap();
        let loaded = Trie::load_with_config(db, &TrieConfig::raw_keys()).unwrap();
        assert_eq!(loaded.get_nonce(), b"nonce");
        assert_eq!(loaded.get_root().unwrap(), trie.get_root().unwrap());
        assert_eq!(loaded.get(&[0xff]).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_load_rejects_dangling_entry_pointer() {
        let (db, _) = raw_trie();
        update_with(db.as_ref(), |b| b.put(ENTRY_KEY, Hash::digest(b"nowhere").as_bytes()))
            .unwrap();
        assert!(matches!(Trie::load(db), Err(Error::Consistency(_))));
    }

    #[test]
    fn test_set_into_empty_children() {
        let (db, trie) = raw_trie();
        trie.set(&[0xff], b"left").unwrap();
        trie.set(&[0x7f], b"right").unwrap();
        assert_eq!(db.len(), 5);

        let (left, right) = root_children(&trie);
        assert_eq!(
            left,
            Node::Leaf(LeafNode::new(vec![true], vec![0xff], b"left".to_vec()))
        );
        assert_eq!(
            right,
            Node::Leaf(LeafNode::new(vec![false], vec![0x7f], b"right".to_vec()))
        );
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_set_extends_leaf() {
        let (db, trie) = raw_trie();
        // 0xff and 0xdf share the bits 1, 1 and split at the third
        trie.set(&[0xff], b"a").unwrap();
        trie.set(&[0xdf], b"b").unwrap();
        // reserved keys, root, empty [0], interiors [1] and [1,1], empty
        // [1,0] and the two leaves
        assert_eq!(db.len(), 9);

        let (left, _) = root_children(&trie);
        let Node::Interior(interior) = left else {
            panic!("left child should be interior");
        };
        view_with(db.as_ref(), |bucket| {
            assert_eq!(
                trie.load_node(bucket, &interior.right)?,
                Node::Empty(EmptyNode::new(vec![true, false]))
            );
            Ok(())
        })
        .unwrap();

        trie.set(&[0x00], b"c").unwrap();
        trie.set(&[0x01], b"d").unwrap();
        for (key, value) in [(0xff, b"a"), (0xdf, b"b"), (0x00, b"c"), (0x01, b"d")] {
            assert_eq!(trie.get(&[key]).unwrap(), Some(value.to_vec()));
        }
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_long_then_short_key() {
        let (_, trie) = raw_trie();
        trie.set(&[0xff, 0x00], b"long").unwrap();
        trie.set(&[0x7f], b"short").unwrap();
        assert_eq!(trie.get(&[0xff, 0x00]).unwrap(), Some(b"long".to_vec()));
        assert_eq!(trie.get(&[0x7f]).unwrap(), Some(b"short".to_vec()));
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_raw_prefix_keys_rejected() {
        let (db, trie) = raw_trie();
        trie.set(&[0x01], b"short").unwrap();
        let before = db.len();
        let err = trie.set(&[0x01, 0x00], b"long").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(db.len(), before);
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_overwrite_and_identical_set() {
        let (db, trie) = raw_trie();
        trie.set(&[0xff], b"one").unwrap();
        trie.set(&[0xff], b"two").unwrap();
        assert_eq!(trie.get(&[0xff]).unwrap(), Some(b"two".to_vec()));

        let root = trie.get_root().unwrap();
        trie.set(&[0xff], b"two").unwrap();
        assert_eq!(trie.get_root().unwrap(), root);
        assert_eq!(db.len(), 5);
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let (_, trie) = raw_trie();
        trie.set(&[0xff], b"v").unwrap();
        let root = trie.get_root().unwrap();

        trie.delete(&[0xdf]).unwrap();
        trie.delete(&[0x00]).unwrap();
        assert_eq!(trie.get_root().unwrap(), root);

        trie.delete(&[0xff]).unwrap();
        let after = trie.get_root().unwrap();
        assert_ne!(after, root);
        trie.delete(&[0xff]).unwrap();
        assert_eq!(trie.get_root().unwrap(), after);
    }

    #[test]
    fn test_delete_keeps_placeholders() {
        let (db, trie) = raw_trie();
        trie.set(&[0xff], b"a").unwrap();
        trie.set(&[0xdf], b"b").unwrap();
        let records = db.len();

        trie.delete(&[0xff]).unwrap();
        trie.delete(&[0xdf]).unwrap();
        assert_eq!(db.len(), records);
        assert_eq!(trie.get(&[0xff]).unwrap(), None);
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_batch_applies_in_order() {
        let trie = Trie::new(Arc::new(MemDb::new()), b"nonce").unwrap();
        trie.batch(&[
            Mutation::set(b"a".to_vec(), b"1".to_vec()),
            Mutation::set(b"b".to_vec(), b"2".to_vec()),
            Mutation::noop(),
            Mutation::delete(b"a".to_vec()),
            Mutation::set(b"b".to_vec(), b"3".to_vec()),
        ])
        .unwrap();
        assert_eq!(trie.get(b"a").unwrap(), None);
        assert_eq!(trie.get(b"b").unwrap(), Some(b"3".to_vec()));
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_for_each_skips_metadata() {
        let trie = Trie::new(Arc::new(MemDb::new()), b"nonce").unwrap();
        trie.set(b"a", b"1").unwrap();
        trie.set(b"b", b"2").unwrap();
        trie.set_metadata(b"meta", b"x").unwrap();

        let mut seen = Vec::new();
        trie.for_each(|k: &[u8], v: &[u8]| {
            seen.push((k.to_vec(), v.to_vec()));
            Ok(())
        })
        .unwrap();
        seen.sort();
        assert_eq!(
            seen,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
    }

    #[test]
    fn test_metadata_keys() {
        let trie = Trie::new(Arc::new(MemDb::new()), b"nonce").unwrap();
        trie.set_metadata(b"height", b"42").unwrap();
        assert_eq!(trie.get_metadata(b"height").unwrap(), Some(b"42".to_vec()));
        trie.delete_metadata(b"height").unwrap();
        assert_eq!(trie.get_metadata(b"height").unwrap(), None);

        let long = [b'k'; MAX_METADATA_KEY_LEN + 1];
        assert!(matches!(
            trie.set_metadata(&long, b"v"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(trie.set_metadata(&long[..MAX_METADATA_KEY_LEN], b"v").is_ok());
        for reserved in [ENTRY_KEY, NONCE_KEY] {
            assert!(matches!(
                trie.set_metadata(reserved, b"v"),
                Err(Error::InvalidArgument(_))
            ));
            assert!(matches!(
                trie.get_metadata(reserved),
                Err(Error::InvalidArgument(_))
            ));
        }
        trie.is_valid().unwrap();
    }

    #[test]
    fn test_is_valid_detects_orphan_record() {
        let (db, trie) = raw_trie();
        trie.set(&[0xff], b"v").unwrap();
        let orphan = Node::Empty(EmptyNode::new(vec![false, false]));
        update_with(db.as_ref(), |b| trie.store_node(b, &orphan)).unwrap();
        assert!(matches!(trie.is_valid(), Err(Error::StorageCorruption(_))));
    }

    #[test]
    fn test_is_valid_detects_tampered_leaf() {
        let (db, trie) = raw_trie();
        trie.set(&[0xff], b"honest").unwrap();

        let (left, _) = root_children(&trie);
        let Node::Leaf(leaf) = left else {
            panic!("left child should be a leaf");
        };
        let key = leaf.hash(trie.get_nonce());
        let forged = LeafNode::new(leaf.prefix.clone(), leaf.key.clone(), b"forged".to_vec());
        update_with(db.as_ref(), |b| b.put(key.as_bytes(), &Node::Leaf(forged).encode()?))
            .unwrap();

        assert_eq!(trie.get(&[0xff]).unwrap(), Some(b"forged".to_vec()));
        assert!(matches!(trie.is_valid(), Err(Error::StorageCorruption(_))));
    }

    #[test]
    fn test_missing_node_is_corruption() {
        let (db, trie) = raw_trie();
        let root = trie.get_root().unwrap();
        update_with(db.as_ref(), |b| b.delete(root.as_bytes())).unwrap();
        assert!(matches!(trie.get(&[0xff]), Err(Error::StorageCorruption(_))));
    }

    #[test]
    fn test_self_referencing_interior_is_corruption() {
        let (db, trie) = raw_trie();
        let root = trie.get_root().unwrap();
        let (_, right) = root_children(&trie);
        let looped = InteriorNode::new(root, right.hash(trie.get_nonce()));
        update_with(db.as_ref(), |b| b.put(root.as_bytes(), &Node::Interior(looped).encode()?))
            .unwrap();

        let res = trie.for_each(|_: &[u8], _: &[u8]| Ok(()));
        assert!(matches!(res, Err(Error::StorageCorruption(_))));
        assert!(matches!(trie.is_valid(), Err(Error::StorageCorruption(_))));
    }

    #[test]
    fn test_interior_chain_deeper_than_hash_is_corruption() {
        let db = Arc::new(MemDb::new());
        let trie = Trie::new(db.clone(), b"nonce").unwrap();
        update_with(db.as_ref(), |b| {
            let empty = trie.store_node(b, &Node::Empty(EmptyNode::new(Vec::new())))?;
            let mut top = empty;
            for _ in 0..=256 {
                top = trie.store_node(b, &Node::Interior(InteriorNode::new(top, empty)))?;
            }
            b.put(ENTRY_KEY, top.as_bytes())
        })
        .unwrap();

        let res = trie.for_each(|_: &[u8], _: &[u8]| Ok(()));
        assert!(matches!(res, Err(Error::StorageCorruption(_))));
    }

    #[test]
    fn test_metadata_inside_caller_transaction() {
        let db = Arc::new(MemDb::new());
        let trie = Trie::new(db.clone(), b"nonce").unwrap();
        update_with(db.as_ref(), |b| {
            trie.set_metadata_with_bucket(b, b"epoch", b"3")?;
            assert_eq!(trie.get_metadata_with_bucket(b, b"epoch")?, Some(b"3".to_vec()));
            trie.delete_metadata_with_bucket(b, b"epoch")?;
            assert_eq!(trie.get_metadata_with_bucket(b, b"epoch")?, None);
            trie.set_metadata_with_bucket(b, b"epoch", b"4")
        })
        .unwrap();
        assert_eq!(trie.get_metadata(b"epoch").unwrap(), Some(b"4".to_vec()));

        let res = view_with(db.as_ref(), |b| trie.get_metadata_with_bucket(b, NONCE_KEY));
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_copy_to_other_backend() {
        let trie = Trie::new(Arc::new(MemDb::new()), b"nonce").unwrap();
        trie.set(b"a", b"1").unwrap();
        trie.set_metadata(b"meta", b"x").unwrap();

        let other = Arc::new(MemDb::new());
        update_with(other.as_ref(), |b| trie.copy_to(b)).unwrap();

        let copy = Trie::load(other).unwrap();
        assert_eq!(copy.get_root().unwrap(), trie.get_root().unwrap());
        assert_eq!(copy.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(copy.get_metadata(b"meta").unwrap(), Some(b"x".to_vec()));
        copy.is_valid().unwrap();
    }

    #[test]
    fn test_create_generates_nonce() {
        let config = TrieConfig {
            nonce_len: 16,
            ..TrieConfig::default()
        };
        let a = Trie::create(Arc::new(MemDb::new()), &config).unwrap();
        let b = Trie::create(Arc::new(MemDb::new()), &config).unwrap();
        assert_eq!(a.get_nonce().len(), 16);
        assert_ne!(a.get_nonce(), b.get_nonce());
        assert_ne!(a.get_root().unwrap(), b.get_root().unwrap());
    }
}
