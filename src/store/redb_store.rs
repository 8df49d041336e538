//! Disk-backed storage using redb
//!
//! All records live in a single redb table named after the configured
//! bucket. `update` commits the write transaction when the callback
//! succeeds and aborts it otherwise; `update_dry_run` always aborts.

use super::{Bucket, Database, ForEachFn, TxFn};
use crate::config::TrieConfig;
use crate::{Error, Result};
use parking_lot::RwLock;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::debug;

type Bytes = &'static [u8];
type NodeTable<'a> = TableDefinition<'a, Bytes, Bytes>;

/// A [`Database`] stored in a redb file
pub struct RedbDb {
    path: PathBuf,
    bucket: String,
    /// `None` once closed
    db: RwLock<Option<redb::Database>>,
}

impl RedbDb {
    /// Open or create a database file using the default bucket
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &TrieConfig::default())
    }

    /// Open or create a database file using `config.bucket` as table name
    pub fn open_with(path: impl AsRef<Path>, config: &TrieConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = redb::Database::create(&path).map_err(Error::storage)?;

        // Create the table up front so read transactions can always open it
        let write_txn = db.begin_write().map_err(Error::storage)?;
        write_txn
            .open_table(NodeTable::new(&config.bucket))
            .map_err(Error::storage)?;
        write_txn.commit().map_err(Error::storage)?;

        debug!(path = %path.display(), bucket = %config.bucket, "opened redb store");
        Ok(RedbDb {
            path,
            bucket: config.bucket.clone(),
            db: RwLock::new(Some(db)),
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> NodeTable<'_> {
        TableDefinition::new(&self.bucket)
    }

    fn write(&self, f: &mut TxFn<'_>, persist: bool) -> Result<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(Error::Closed)?;
        let write_txn = db.begin_write().map_err(Error::storage)?;
        let res = {
            let table = write_txn.open_table(self.table()).map_err(Error::storage)?;
            let mut bucket = WriteBucket { table };
            f(&mut bucket)
        };
        match res {
            Ok(()) if persist => write_txn.commit().map_err(Error::storage),
            Ok(()) => write_txn.abort().map_err(Error::storage),
            Err(e) => {
                write_txn.abort().map_err(Error::storage)?;
                Err(e)
            }
        }
    }
}

impl Database for RedbDb {
    fn update(&self, f: &mut TxFn<'_>) -> Result<()> {
        self.write(f, true)
    }

    fn view(&self, f: &mut TxFn<'_>) -> Result<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(Error::Closed)?;
        let read_txn = db.begin_read().map_err(Error::storage)?;
        let table = read_txn.open_table(self.table()).map_err(Error::storage)?;
        f(&mut ReadBucket { table })
    }

    fn update_dry_run(&self, f: &mut TxFn<'_>) -> Result<()> {
        self.write(f, false)
    }

    fn close(&self) -> Result<()> {
        if self.db.write().take().is_some() {
            debug!(path = %self.path.display(), "closed redb store");
        }
        Ok(())
    }
}

struct ReadBucket<T> {
    table: T,
}

struct WriteBucket<'txn> {
    table: redb::Table<'txn, Bytes, Bytes>,
}

fn table_get<T: ReadableTable<Bytes, Bytes>>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let value = table.get(key).map_err(Error::storage)?;
    Ok(value.map(|guard| guard.value().to_vec()))
}

fn table_for_each<T: ReadableTable<Bytes, Bytes>>(table: &T, f: &mut ForEachFn<'_>) -> Result<()> {
    for entry in table.iter().map_err(Error::storage)? {
        let (key, value) = entry.map_err(Error::storage)?;
        f(key.value(), value.value())?;
    }
    Ok(())
}

impl<T: ReadableTable<Bytes, Bytes>> Bucket for ReadBucket<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        table_get(&self.table, key)
    }

    fn put(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(Error::ReadOnly)
    }

    fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(Error::ReadOnly)
    }

    fn for_each(&self, f: &mut ForEachFn<'_>) -> Result<()> {
        table_for_each(&self.table, f)
    }
}

impl Bucket for WriteBucket<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        table_get(&self.table, key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.table.insert(key, value).map_err(Error::storage)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.table.remove(key).map_err(Error::storage)?;
        Ok(())
    }

    fn for_each(&self, f: &mut ForEachFn<'_>) -> Result<()> {
        table_for_each(&self.table, f)
    }
}
