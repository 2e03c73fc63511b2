//! RocksDB-backed key-value chain store.
//!
//! A single ordered byte keyspace (the default column family) holding every
//! record the SPV store persists, addressed through the prefix schema defined
//! in [`crate::store`]. Operations are synchronous and run to completion;
//! range scans are lazy but cannot be paused or aborted mid-flight.

use std::path::{Path, PathBuf};

use rocksdb::{Direction, IteratorMode, Options, DB};

use wisp_core::error::StoreError;

/// Ordered persistent byte-keyed map with get/put/range/delete/reset.
pub struct ChainDb {
    /// `None` only transiently while [`reset`](ChainDb::reset) rebuilds the
    /// backing store, or permanently if a reset failed partway.
    db: Option<DB>,
    path: PathBuf,
}

impl ChainDb {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = Self::open_db(&path)?;
        Ok(Self { db: Some(db), path })
    }

    fn open_db(path: &Path) -> Result<DB, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        DB::open(&opts, path).map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn handle(&self) -> Result<&DB, StoreError> {
        self.db.as_ref().ok_or(StoreError::Closed)
    }

    /// Look up a key. Absent keys are `Ok(None)`, not an error.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.handle()?
            .get(key)
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    /// Write a key-value pair, overwriting any existing value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.handle()?
            .put(key, value)
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    /// Delete a key. Deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.handle()?
            .delete(key)
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    /// Lazy ordered scan over keys in `[start, end)`, byte-lexicographic.
    ///
    /// Each call starts a fresh scan; there is no way to resume or cancel
    /// one partway.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<RangeIter<'_>, StoreError> {
        let inner = self
            .handle()?
            .iterator(IteratorMode::From(start, Direction::Forward));
        Ok(RangeIter {
            inner,
            end: end.to_vec(),
            done: false,
        })
    }

    /// Destroy and recreate the entire backing store.
    ///
    /// Unconditionally destructive: every record is lost with no rollback.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        if let Some(db) = self.db.take() {
            drop(db);
        }
        DB::destroy(&Options::default(), &self.path)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        self.db = Some(Self::open_db(&self.path)?);
        Ok(())
    }
}

/// Iterator over a key range, ending at the exclusive upper bound.
pub struct RangeIter<'a> {
    inner: rocksdb::DBIteratorWithThreadMode<'a, DB>,
    end: Vec<u8>,
    done: bool,
}

impl Iterator for RangeIter<'_> {
    type Item = Result<(Box<[u8]>, Box<[u8]>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next()? {
            Ok((key, value)) => {
                if key.as_ref() >= self.end.as_slice() {
                    self.done = true;
                    return None;
                }
                Some(Ok((key, value)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(StoreError::Storage(e.to_string())))
            }
        }
    }
}
