//! Transactional key/value storage used by the trie
//!
//! The trie only needs a single bucket of byte keys and values plus three
//! kinds of transaction: read-only, read-write and dry-run. Two backends are
//! provided: [`MemDb`] for tests and ephemeral tries, and [`RedbDb`] for a
//! persistent file-backed store.

mod memory;
mod redb_store;

pub use memory::MemDb;
pub use redb_store::RedbDb;

use crate::{Error, Result};

/// Callback invoked for every key/value pair by [`Bucket::for_each`]
pub type ForEachFn<'a> = dyn FnMut(&[u8], &[u8]) -> Result<()> + 'a;

/// Callback run inside a transaction
pub type TxFn<'a> = dyn FnMut(&mut dyn Bucket) -> Result<()> + 'a;

/// The key/value view available inside a transaction
pub trait Bucket {
    /// Get a copy of the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Visit every pair, stopping at the first callback error
    fn for_each(&self, f: &mut ForEachFn<'_>) -> Result<()>;
}

/// A backend that can run transactions over one bucket
pub trait Database: Send + Sync {
    /// Run `f` in a read-write transaction. Writes are applied only if `f`
    /// returns `Ok`.
    fn update(&self, f: &mut TxFn<'_>) -> Result<()>;

    /// Run `f` in a read-only transaction. `put` and `delete` fail with
    /// [`Error::ReadOnly`].
    fn view(&self, f: &mut TxFn<'_>) -> Result<()>;

    /// Run `f` in a read-write transaction that is always discarded
    fn update_dry_run(&self, f: &mut TxFn<'_>) -> Result<()>;

    /// Release backend resources. Later transactions fail with
    /// [`Error::Closed`].
    fn close(&self) -> Result<()>;
}

/// Run a read-write transaction and return the value produced by `f`
pub fn update_with<D, T, F>(db: &D, f: F) -> Result<T>
where
    D: Database + ?Sized,
    F: FnOnce(&mut dyn Bucket) -> Result<T>,
{
    run_once(f, |tx| db.update(tx))
}

/// Run a read-only transaction and return the value produced by `f`
pub fn view_with<D, T, F>(db: &D, f: F) -> Result<T>
where
    D: Database + ?Sized,
    F: FnOnce(&mut dyn Bucket) -> Result<T>,
{
    run_once(f, |tx| db.view(tx))
}

/// Run a dry-run transaction and return the value produced by `f`
pub fn dry_run_with<D, T, F>(db: &D, f: F) -> Result<T>
where
    D: Database + ?Sized,
    F: FnOnce(&mut dyn Bucket) -> Result<T>,
{
    run_once(f, |tx| db.update_dry_run(tx))
}

/// Adapt a `FnOnce` returning a value to the object-safe `FnMut` callback
/// taken by [`Database`].
fn run_once<T, F, R>(f: F, run: R) -> Result<T>
where
    F: FnOnce(&mut dyn Bucket) -> Result<T>,
    R: FnOnce(&mut TxFn<'_>) -> Result<()>,
{
    let mut f = Some(f);
    let mut out = None;
    run(&mut |bucket: &mut dyn Bucket| {
        let f = f
            .take()
            .ok_or_else(|| Error::Storage("transaction callback invoked twice".into()))?;
        out = Some(f(bucket)?);
        Ok(())
    })?;
    out.ok_or_else(|| Error::Storage("transaction callback was not invoked".into()))
}
