//! The SPV chain store: block persistence, orphan resolution, reorg
//! processing and chain queries.
//!
//! The store reacts to blocks and reorg instructions handed to it by the
//! surrounding client's chain-selection logic; it performs no proof-of-work,
//! merkle-proof or signature verification of its own. Single-threaded and
//! synchronous: every operation runs to completion before returning.
//!
//! Writes are not atomic across keys. `persist` and `reorg` issue several
//! independent puts (block record, head pointer, depth index); a crash
//! partway through can leave the head or index inconsistent with the block
//! records until the affected keys are rewritten.

use std::collections::VecDeque;
use std::path::Path;

use wisp_core::error::{CodecError, StoreError};
use wisp_core::script::{classify_output, ChainVariant};
use wisp_core::types::{CompactBlock, Hash160, Hash256, Membership, Transaction, TxOut};

use crate::db::ChainDb;
use crate::watch::WatchedAddrs;

// --- Key schema ---
//
// One ordered keyspace. Membership stored in the block record is
// authoritative; the `b`/`o` prefix only records how the block first
// arrived.

const PREFIX_BLOCK: u8 = b'b';
const PREFIX_DEPTH: u8 = b'd';
const PREFIX_ORPHAN: u8 = b'o';
const PREFIX_TX: u8 = b't';
const KEY_HEAD: &[u8] = b"head";

fn prefixed(prefix: u8, hash: &Hash256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = prefix;
    key[1..].copy_from_slice(hash.as_bytes());
    key
}

fn block_key(hash: &Hash256) -> [u8; 33] {
    prefixed(PREFIX_BLOCK, hash)
}

fn orphan_key(hash: &Hash256) -> [u8; 33] {
    prefixed(PREFIX_ORPHAN, hash)
}

fn tx_key(hash: &Hash256) -> [u8; 33] {
    prefixed(PREFIX_TX, hash)
}

/// Big-endian depth keeps the index ordered under byte-lexicographic scans.
fn depth_key(depth: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = PREFIX_DEPTH;
    key[1..].copy_from_slice(&depth.to_be_bytes());
    key
}

fn encode_block(block: &CompactBlock) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::encode_to_vec(block, bincode::config::standard())
        .map_err(|e| CodecError::Serialization(e.to_string()))?)
}

fn decode_block(bytes: &[u8]) -> Result<CompactBlock, StoreError> {
    let (block, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| CodecError::Deserialization(e.to_string()))?;
    Ok(block)
}

fn decode_tx(bytes: &[u8]) -> Result<Transaction, StoreError> {
    let (tx, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| CodecError::Deserialization(e.to_string()))?;
    Ok(tx)
}

/// A stored output paying a queried address digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressTxOut {
    /// Transaction containing the output.
    pub txid: Hash256,
    /// Output index within that transaction.
    pub vout: u32,
    pub output: TxOut,
}

/// SPV chain store over a [`ChainDb`] keyspace.
///
/// Owns the best-chain head state explicitly: it is loaded from the store
/// when the store is opened and threaded through every mutation, never
/// recomputed lazily.
pub struct SpvStore {
    db: ChainDb,
    /// Deepest MAIN-chain block, `None` until the first main block persists.
    head: Option<CompactBlock>,
    watched: WatchedAddrs,
    variant: ChainVariant,
}

impl SpvStore {
    /// Open or create a store, loading the head block and watched-address
    /// set persisted by earlier runs.
    pub fn open(path: impl AsRef<Path>, variant: ChainVariant) -> Result<Self, StoreError> {
        let db = ChainDb::open(path)?;
        let head = Self::load_head(&db)?;
        let watched = WatchedAddrs::load(&db)?;
        Ok(Self {
            db,
            head,
            watched,
            variant,
        })
    }

    fn load_head(db: &ChainDb) -> Result<Option<CompactBlock>, StoreError> {
        let Some(bytes) = db.get(KEY_HEAD)? else {
            return Ok(None);
        };
        if bytes.len() != 32 {
            return Err(StoreError::Storage("invalid head hash length".into()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        match db.get(&block_key(&Hash256(hash)))? {
            Some(data) => Ok(Some(decode_block(&data)?)),
            None => Ok(None),
        }
    }

    // --- Block persistence & orphan resolution ---

    /// Persist a block with its caller-assigned chain position, then connect
    /// any pending orphans that become reachable from it.
    ///
    /// The caller supplies membership, depth and the parent's cumulative
    /// work; chain selection is the caller's responsibility. The block's
    /// work is `parent_work` plus its own contribution from `bits`.
    ///
    /// `txs` are the block's decoded transactions; with a non-empty watch
    /// set each one is offered to [`store_tx`](Self::store_tx). Orphans
    /// reconnected later have no transactions on hand, so their payloads are
    /// only captured when the block first arrives.
    pub fn persist(
        &mut self,
        block: &CompactBlock,
        txs: &[Transaction],
        membership: Membership,
        depth: u64,
        parent_work: u128,
    ) -> Result<(u64, Membership), StoreError> {
        let mut rec = block.clone();
        rec.membership = membership;
        rec.depth = depth;
        rec.work = parent_work.saturating_add(rec.work_contribution());
        self.write_block(&rec)?;

        if !self.watched.is_empty() {
            for tx in txs {
                self.store_tx(tx)?;
            }
        }

        // Connect pending orphans breadth-first. A worklist instead of
        // recursion keeps arbitrarily long orphan chains off the call stack.
        let mut connectable = VecDeque::new();
        if membership != Membership::Orphan {
            connectable.push_back(rec);
        }
        while let Some(parent) = connectable.pop_front() {
            let parent_hash = parent.hash();
            for orphan in self.orphans_with_prev(&parent_hash)? {
                let mut child = orphan;
                child.membership = parent.membership;
                child.depth = parent.depth + 1;
                child.work = parent.work.saturating_add(child.work_contribution());
                self.write_block(&child)?;
                tracing::debug!(
                    hash = %child.hash(),
                    depth = child.depth,
                    membership = %child.membership,
                    "connected orphan"
                );
                connectable.push_back(child);
            }
        }

        Ok((depth, membership))
    }

    /// Write a block record under the prefix matching its membership, and
    /// advance the head pointer and depth index for main-chain blocks.
    fn write_block(&mut self, rec: &CompactBlock) -> Result<(), StoreError> {
        let hash = rec.hash();
        let key = match rec.membership {
            Membership::Orphan => orphan_key(&hash),
            Membership::Main | Membership::Side => block_key(&hash),
        };
        self.db.put(&key, &encode_block(rec)?)?;
        if rec.membership == Membership::Main {
            self.db.put(KEY_HEAD, hash.as_bytes())?;
            self.db.put(&depth_key(rec.depth), hash.as_bytes())?;
            self.head = Some(rec.clone());
        }
        Ok(())
    }

    /// Pending orphans whose parent is `hash`.
    ///
    /// Scans the whole orphan keyspace; collected eagerly so the caller can
    /// write while no scan is live. O(pending orphans) per persisted block,
    /// acceptable at SPV scale where few orphans are pending at once.
    fn orphans_with_prev(&self, hash: &Hash256) -> Result<Vec<CompactBlock>, StoreError> {
        let mut children = Vec::new();
        for item in self.db.range(&[PREFIX_ORPHAN], &[PREFIX_ORPHAN + 1])? {
            let (_, value) = item?;
            let orphan = decode_block(&value)?;
            if orphan.prev_hash == *hash {
                children.push(orphan);
            }
        }
        Ok(children)
    }

    // --- Reorg processing ---

    /// Switch best-chain membership between two forks.
    ///
    /// `leaving` and `entering` must be consistent, depth-ordered slices
    /// spanning exactly the divergent range between the old and new best
    /// chain; the store trusts the caller's fork decision and compares no
    /// work itself. Blocks in `leaving` become SIDE; blocks in `entering`
    /// become MAIN and reclaim their depth-index entries. Depth entries
    /// vacated by a longer abandoned branch are cleared, and the head moves
    /// to the deepest entering block.
    ///
    /// A hash missing from the block keyspace violates the caller contract
    /// and fails with [`StoreError::BlockNotFound`].
    pub fn reorg(&mut self, leaving: &[Hash256], entering: &[Hash256]) -> Result<(), StoreError> {
        let mut vacated = Vec::with_capacity(leaving.len());
        for hash in leaving {
            let mut rec = self.load_block(hash)?;
            rec.membership = Membership::Side;
            self.db.put(&block_key(hash), &encode_block(&rec)?)?;
            vacated.push(rec.depth);
        }

        let mut new_head: Option<CompactBlock> = None;
        for hash in entering {
            let mut rec = self.load_block(hash)?;
            rec.membership = Membership::Main;
            self.db.put(&block_key(hash), &encode_block(&rec)?)?;
            self.db.put(&depth_key(rec.depth), hash.as_bytes())?;
            if new_head.as_ref().is_none_or(|h| rec.depth >= h.depth) {
                new_head = Some(rec);
            }
        }

        if let Some(head) = new_head {
            // Depths exclusive to the abandoned branch would otherwise keep
            // pointing at now-side blocks.
            for depth in vacated.iter().filter(|d| **d > head.depth) {
                self.db.delete(&depth_key(*depth))?;
            }
            self.db.put(KEY_HEAD, head.hash().as_bytes())?;
            tracing::info!(
                head = %head.hash(),
                depth = head.depth,
                left = leaving.len(),
                entered = entering.len(),
                "reorganized best chain"
            );
            self.head = Some(head);
        }
        Ok(())
    }

    fn load_block(&self, hash: &Hash256) -> Result<CompactBlock, StoreError> {
        match self.db.get(&block_key(hash))? {
            Some(bytes) => decode_block(&bytes),
            None => Err(StoreError::BlockNotFound(hash.to_string())),
        }
    }

    // --- Transaction relevance & storage ---

    /// Persist a transaction's payload if it touches a watched address.
    ///
    /// Returns whether the payload was written. With an empty watch set no
    /// transaction is ever relevant, regardless of content.
    pub fn store_tx(&mut self, tx: &Transaction) -> Result<bool, StoreError> {
        if self.watched.is_empty() || !self.is_relevant(tx)? {
            return Ok(false);
        }
        let txid = tx.txid()?;
        let payload = tx.payload()?;
        tracing::debug!(%txid, bytes = payload.len(), "storing watched transaction");
        self.db.put(&tx_key(&txid), &payload)?;
        Ok(true)
    }

    /// A transaction is relevant if any output pays a watched digest, or
    /// any input spends a stored output that did. Inputs whose previous
    /// transaction is not stored are skipped.
    fn is_relevant(&self, tx: &Transaction) -> Result<bool, StoreError> {
        for (vout, out) in tx.outputs.iter().enumerate() {
            if self.output_watched(out, vout as u32) {
                return Ok(true);
            }
        }
        for input in &tx.inputs {
            let Some(prev_tx) = self.get_tx(&input.prev_out.txid)? else {
                continue;
            };
            let Some(prev_out) = prev_tx.outputs.get(input.prev_out.vout as usize) else {
                continue;
            };
            if self.output_watched(prev_out, input.prev_out.vout) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Exact comparison of classifier-extracted digests against the watch
    /// set; scripts the classifier cannot read match nothing.
    fn output_watched(&self, out: &TxOut, vout: u32) -> bool {
        classify_output(&out.script, vout, self.variant)
            .addresses
            .iter()
            .any(|(_, digest)| self.watched.contains(digest))
    }

    /// Add an address digest to the watch set and persist it.
    pub fn add_watched_address(&mut self, addr: Hash160) -> Result<(), StoreError> {
        self.watched.add(addr, &self.db)?;
        tracing::info!(%addr, watching = self.watched.len(), "added watched address");
        Ok(())
    }

    // --- Queries ---

    /// Whether a non-orphan block record exists for `hash`.
    pub fn has_block(&self, hash: &Hash256) -> Result<bool, StoreError> {
        Ok(self.db.get(&block_key(hash))?.is_some())
    }

    /// Whether a transaction payload is stored for `hash`.
    pub fn has_tx(&self, hash: &Hash256) -> Result<bool, StoreError> {
        Ok(self.db.get(&tx_key(hash))?.is_some())
    }

    /// Current main-chain head block, if any main block has been persisted.
    pub fn get_head(&self) -> Option<&CompactBlock> {
        self.head.as_ref()
    }

    /// Hash of the current head block.
    pub fn get_head_hash(&self) -> Option<Hash256> {
        self.head.as_ref().map(|b| b.hash())
    }

    /// Depth of the current head block.
    pub fn get_depth(&self) -> Option<u64> {
        self.head.as_ref().map(|b| b.depth)
    }

    /// Load a block by hash. Orphan-keyed records are not visible here.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<CompactBlock>, StoreError> {
        if let Some(head) = &self.head {
            if head.hash() == *hash {
                return Ok(Some(head.clone()));
            }
        }
        match self.db.get(&block_key(hash))? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The main-chain block at `depth`, via the depth index.
    pub fn get_block_by_depth(&self, depth: u64) -> Result<Option<CompactBlock>, StoreError> {
        match self.depth_entry(depth)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    fn depth_entry(&self, depth: u64) -> Result<Option<Hash256>, StoreError> {
        match self.db.get(&depth_key(depth))? {
            Some(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Hash256(hash)))
            }
            Some(_) => Err(StoreError::Storage("invalid depth index entry".into())),
            None => Ok(None),
        }
    }

    /// The main-chain successor of the block `prev_hash`, resolved through
    /// the depth index.
    pub fn get_block_by_prev_hash(
        &self,
        prev_hash: &Hash256,
    ) -> Result<Option<CompactBlock>, StoreError> {
        match self.get_block(prev_hash)? {
            Some(parent) => self.get_block_by_depth(parent.depth + 1),
            None => Ok(None),
        }
    }

    /// Load a stored transaction by hash.
    pub fn get_tx(&self, hash: &Hash256) -> Result<Option<Transaction>, StoreError> {
        match self.db.get(&tx_key(hash))? {
            Some(bytes) => Ok(Some(decode_tx(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored outputs paying `digest`.
    ///
    /// Linear scan over the transaction keyspace; there is no secondary
    /// index. Everything the store holds is confirmed, so
    /// `include_unconfirmed` only matters to callers layering a mempool on
    /// top; it is accepted for interface parity.
    pub fn get_txouts_for_hash160(
        &self,
        digest: &Hash160,
        _include_unconfirmed: bool,
    ) -> Result<Vec<AddressTxOut>, StoreError> {
        let mut matches = Vec::new();
        for item in self.db.range(&[PREFIX_TX], &[PREFIX_TX + 1])? {
            let (_, value) = item?;
            let tx = decode_tx(&value)?;
            let txid = tx.txid()?;
            for (vout, out) in tx.outputs.iter().enumerate() {
                let classification = classify_output(&out.script, vout as u32, self.variant);
                if classification.addresses.iter().any(|(_, d)| d == digest) {
                    matches.push(AddressTxOut {
                        txid,
                        vout: vout as u32,
                        output: out.clone(),
                    });
                }
            }
        }
        Ok(matches)
    }

    /// Sampled integrity audit of the depth index.
    ///
    /// Walks up to `samples` depths down from the head and verifies that
    /// each present depth-index entry resolves to a decodable MAIN block at
    /// that depth. Violations are logged and counted; absent entries are
    /// skipped (the stored chain may not reach back to depth zero).
    pub fn check_consistency(&self, samples: u64) -> Result<u64, StoreError> {
        let Some(head_depth) = self.get_depth() else {
            return Ok(0);
        };
        let mut violations = 0;
        for depth in (0..=head_depth).rev().take(samples as usize) {
            match self.get_block_by_depth(depth)? {
                Some(block) if block.membership == Membership::Main && block.depth == depth => {}
                Some(block) => {
                    tracing::warn!(
                        depth,
                        hash = %block.hash(),
                        membership = %block.membership,
                        "depth index points at non-main block"
                    );
                    violations += 1;
                }
                None => {}
            }
        }
        Ok(violations)
    }

    /// Destroy and recreate the backing store, clearing the head state and
    /// watch set. Unconditionally destructive; there is no rollback.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.db.reset()?;
        self.head = None;
        self.watched.clear();
        Ok(())
    }
}
