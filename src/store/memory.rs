//! In-memory storage backend
//!
//! Writes made inside a transaction are buffered and only applied to the
//! shared map when an `update` callback succeeds. Dry runs therefore only
//! need the read lock: their buffer is dropped on return.

use super::{Bucket, Database, ForEachFn, TxFn};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

struct MemState {
    data: Map,
    closed: bool,
}

/// A [`Database`] kept entirely in memory
pub struct MemDb {
    state: RwLock<MemState>,
}

impl MemDb {
    /// Create an empty in-memory database
    pub fn new() -> Self {
        MemDb {
            state: RwLock::new(MemState {
                data: Map::new(),
                closed: false,
            }),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for MemDb {
    fn update(&self, f: &mut TxFn<'_>) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::Closed);
        }
        let pending = {
            let mut tx = MemTx::new(&state.data, true);
            f(&mut tx)?;
            tx.pending
        };
        for (key, value) in pending {
            match value {
                Some(value) => state.data.insert(key, value),
                None => state.data.remove(&key),
            };
        }
        Ok(())
    }

    fn view(&self, f: &mut TxFn<'_>) -> Result<()> {
        let state = self.state.read();
        if state.closed {
            return Err(Error::Closed);
        }
        f(&mut MemTx::new(&state.data, false))
    }

    fn update_dry_run(&self, f: &mut TxFn<'_>) -> Result<()> {
        let state = self.state.read();
        if state.closed {
            return Err(Error::Closed);
        }
        f(&mut MemTx::new(&state.data, true))
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        state.closed = true;
        state.data.clear();
        Ok(())
    }
}

/// A transaction over a borrowed snapshot; `None` in `pending` marks a delete
struct MemTx<'a> {
    base: &'a Map,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    writable: bool,
}

impl<'a> MemTx<'a> {
    fn new(base: &'a Map, writable: bool) -> Self {
        MemTx {
            base,
            pending: BTreeMap::new(),
            writable,
        }
    }
}

impl Bucket for MemTx<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(value) => Ok(value.clone()),
            None => Ok(self.base.get(key).cloned()),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn for_each(&self, f: &mut ForEachFn<'_>) -> Result<()> {
        for (key, value) in self.base {
            match self.pending.get(key) {
                Some(Some(updated)) => f(key, updated)?,
                Some(None) => {}
                None => f(key, value)?,
            }
        }
        for (key, value) in &self.pending {
            if let Some(value) = value {
                if !self.base.contains_key(key) {
                    f(key, value)?;
                }
            }
        }
        Ok(())
    }
}
