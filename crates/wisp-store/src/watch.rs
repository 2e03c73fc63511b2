//! Watched-address set.
//!
//! A set of 20-byte address digests deciding which transactions the store
//! retains. Mutated only by explicit adds; persisted as JSON under a single
//! reserved key and reloaded on open.

use std::collections::BTreeSet;

use wisp_core::error::{CodecError, StoreError};
use wisp_core::types::Hash160;

use crate::db::ChainDb;

/// Reserved key holding the serialized set.
pub(crate) const KEY_WATCHED_ADDRS: &[u8] = b"watched_addrs";

/// The set of watched address digests.
#[derive(Debug, Default, Clone)]
pub struct WatchedAddrs {
    addrs: BTreeSet<Hash160>,
}

impl WatchedAddrs {
    /// Load the persisted set, or an empty one if none was ever written.
    pub fn load(db: &ChainDb) -> Result<Self, StoreError> {
        let addrs = match db.get(KEY_WATCHED_ADDRS)? {
            Some(bytes) => {
                let list: Vec<Hash160> = serde_json::from_slice(&bytes)
                    .map_err(|e| CodecError::Deserialization(e.to_string()))?;
                list.into_iter().collect()
            }
            None => BTreeSet::new(),
        };
        Ok(Self { addrs })
    }

    /// Add a digest and persist the updated set.
    pub fn add(&mut self, addr: Hash160, db: &ChainDb) -> Result<(), StoreError> {
        self.addrs.insert(addr);
        let list: Vec<&Hash160> = self.addrs.iter().collect();
        let bytes = serde_json::to_vec(&list)
            .map_err(|e| CodecError::Serialization(e.to_string()))?;
        db.put(KEY_WATCHED_ADDRS, &bytes)
    }

    pub fn contains(&self, addr: &Hash160) -> bool {
        self.addrs.contains(addr)
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Drop all entries from the in-memory set (used by store reset; the
    /// persisted copy dies with the backing store).
    pub fn clear(&mut self) {
        self.addrs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (ChainDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = ChainDb::open(dir.path().join("chaindata")).unwrap();
        (db, dir)
    }

    #[test]
    fn starts_empty() {
        let (db, _dir) = temp_db();
        let watched = WatchedAddrs::load(&db).unwrap();
        assert!(watched.is_empty());
        assert_eq!(watched.len(), 0);
    }

    #[test]
    fn add_and_contains() {
        let (db, _dir) = temp_db();
        let mut watched = WatchedAddrs::load(&db).unwrap();
        let addr = Hash160([0xAA; 20]);

        watched.add(addr, &db).unwrap();
        assert!(watched.contains(&addr));
        assert!(!watched.contains(&Hash160([0xBB; 20])));
        assert_eq!(watched.len(), 1);

        // Duplicate adds are idempotent.
        watched.add(addr, &db).unwrap();
        assert_eq!(watched.len(), 1);
    }

    #[test]
    fn survives_reload() {
        let (db, _dir) = temp_db();
        let mut watched = WatchedAddrs::load(&db).unwrap();
        watched.add(Hash160([0x01; 20]), &db).unwrap();
        watched.add(Hash160([0x02; 20]), &db).unwrap();

        let reloaded = WatchedAddrs::load(&db).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(&Hash160([0x01; 20])));
        assert!(reloaded.contains(&Hash160([0x02; 20])));
    }
}
