//! Staging overlay
//!
//! A `StagingTrie` collects writes in memory on top of a source [`Trie`].
//! Reads consult the overlay first. Root hashes and proofs are computed by
//! replaying the pending writes inside a dry-run transaction on the source,
//! so the source only changes on [`StagingTrie::commit`].

use super::batch::{KvPair, Mutation, OpType};
use super::proof::Proof;
use super::tree::Trie;
use crate::model::Hash;
use crate::store::{dry_run_with, update_with, Bucket};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Clone, Default)]
struct Pending {
    /// Pending sets. Never shares a key with `deleted`.
    overlay: HashMap<Vec<u8>, Vec<u8>>,
    deleted: HashSet<Vec<u8>>,
    /// Every write in call order
    log: Vec<Mutation>,
}

impl Pending {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.deleted.remove(key);
        self.overlay.insert(key.to_vec(), value.to_vec());
        self.log.push(Mutation::set(key, value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.overlay.remove(key);
        self.deleted.insert(key.to_vec());
        self.log.push(Mutation::delete(key));
    }

    fn replay(&self, trie: &Trie, bucket: &mut dyn Bucket) -> Result<()> {
        trie.batch_with_bucket(bucket, &self.log)
    }
}

/// Pending writes layered over a [`Trie`]
pub struct StagingTrie {
    source: Trie,
    pending: Mutex<Pending>,
}

impl Clone for StagingTrie {
    /// Copies the pending writes; the source trie is shared
    fn clone(&self) -> Self {
        StagingTrie {
            source: self.source.clone(),
            pending: Mutex::new(self.pending.lock().clone()),
        }
    }
}

impl StagingTrie {
    pub fn new(source: Trie) -> Self {
        StagingTrie {
            source,
            pending: Mutex::new(Pending::default()),
        }
    }

    /// The trie this overlay writes to on commit
    pub fn source(&self) -> &Trie {
        &self.source
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let pending = self.pending.lock();
            if pending.deleted.contains(key) {
                return Ok(None);
            }
            if let Some(value) = pending.overlay.get(key) {
                return Ok(Some(value.clone()));
            }
        }
        self.source.get(key)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.pending.lock().set(key, value);
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.pending.lock().delete(key);
        Ok(())
    }

    /// Stage every operation in order
    pub fn batch<P: KvPair>(&self, pairs: &[P]) -> Result<()> {
        let mut pending = self.pending.lock();
        for pair in pairs {
            match pair.op() {
                OpType::Set => pending.set(pair.key(), pair.value()),
                OpType::Delete => pending.delete(pair.key()),
                OpType::Noop => {}
            }
        }
        Ok(())
    }

    /// Number of staged writes not yet committed
    pub fn pending_len(&self) -> usize {
        self.pending.lock().log.len()
    }

    /// Root hash the source would have after a commit
    pub fn get_root(&self) -> Result<Hash> {
        let pending = self.pending.lock();
        dry_run_with(self.source.db().as_ref(), |bucket| {
            pending.replay(&self.source, bucket)?;
            self.source.get_root_with_bucket(bucket)
        })
    }

    /// Proof for `key` against [`StagingTrie::get_root`]
    pub fn get_proof(&self, key: &[u8]) -> Result<Proof> {
        let pending = self.pending.lock();
        dry_run_with(self.source.db().as_ref(), |bucket| {
            pending.replay(&self.source, bucket)?;
            self.source.get_proof_with_bucket(bucket, key)
        })
    }

    /// Apply the staged writes to the source in one transaction and clear
    /// them. On error the source and the staged writes are left unchanged.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        let root = update_with(self.source.db().as_ref(), |bucket| {
            pending.replay(&self.source, bucket)?;
            self.source.get_root_with_bucket(bucket)
        })?;
        debug!(root = %root, writes = pending.log.len(), "committed staged writes");
        *pending = Pending::default();
        Ok(())
    }

    /// Visit the merged view: source pairs that are neither deleted nor
    /// overwritten, then staged pairs.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let snapshot = self.pending.lock().clone();
        self.source.for_each(|key: &[u8], value: &[u8]| {
            if snapshot.deleted.contains(key) || snapshot.overlay.contains_key(key) {
                return Ok(());
            }
            f(key, value)
        })?;
        for (key, value) in &snapshot.overlay {
            f(key, value)?;
        }
        Ok(())
    }

    pub fn get_metadata(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.source.get_metadata(key)
    }

    pub fn get_nonce(&self) -> &[u8] {
        self.source.get_nonce()
    }

    /// Check that no key is both staged and deleted
    pub fn sanity_check(&self) -> Result<()> {
        let pending = self.pending.lock();
        match pending.overlay.keys().find(|key| pending.deleted.contains(*key)) {
            Some(key) => Err(Error::Consistency(format!(
                "key {} is both staged and deleted",
                hex::encode(key)
            ))),
            None => Ok(()),
        }
    }
}
