//! Core SPV types: hashes, compact blocks, transactions.
//!
//! A [`CompactBlock`] is what an SPV client retains per block: the 80-byte
//! header fields plus the merkle-inclusion proof digests, never the full
//! transaction set. Chain membership, depth and cumulative work ride along
//! in the record and are managed exclusively by the store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CodecError;
use crate::work;

/// A 32-byte hash value (block hashes, txids, merkle digests).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Marks coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 20-byte address digest (RIPEMD-160 of SHA-256 of a public key, or the
/// digest embedded directly in a pay-to-hash160 script).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash160 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Chain membership of a stored block.
///
/// `Orphan` means the block's parent was unknown when it arrived. Membership
/// in the record is authoritative; the storage key prefix a block was first
/// written under may disagree after a reorg or orphan connection.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum Membership {
    /// On the best chain.
    Main,
    /// On a known side chain.
    Side,
    /// Parent not yet stored.
    Orphan,
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Membership::Main => "main",
            Membership::Side => "side",
            Membership::Orphan => "orphan",
        };
        f.write_str(s)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            vout: u32::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxIn {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub prev_out: OutPoint,
    /// Unlocking script bytes.
    pub script_sig: Vec<u8>,
    /// Sequence number.
    pub sequence: u32,
}

/// A transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOut {
    /// Value in base units.
    pub value: u64,
    /// Raw output script bytes.
    pub script: Vec<u8>,
}

/// A decoded transaction, as handed to the store by the surrounding client.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxIn>,
    /// Outputs created by this transaction.
    pub outputs: Vec<TxOut>,
    /// Earliest block/time this transaction may confirm.
    pub lock_time: u32,
}

impl Transaction {
    /// Canonical payload bytes, as persisted under the `t` keyspace.
    pub fn payload(&self) -> Result<Vec<u8>, CodecError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> Result<usize, CodecError> {
        Ok(self.payload()?.len())
    }

    /// Compute the transaction ID (double SHA-256 of the canonical payload).
    pub fn txid(&self) -> Result<Hash256, CodecError> {
        let payload = self.payload()?;
        let first = Sha256::digest(&payload);
        Ok(Hash256(Sha256::digest(first).into()))
    }

    /// Check if this is a coinbase transaction (single input, null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_out.is_null()
    }
}

/// A compact block: header fields, merkle-proof digests, and the
/// store-managed chain position.
///
/// `membership`, `depth` and `work` are set by the persistence engine when
/// the block is written and mutated only by the reorg processor afterwards.
/// `depth` is meaningful only for `Main`/`Side` blocks.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CompactBlock {
    /// Protocol version.
    pub version: u32,
    /// Hash of the parent block header.
    pub prev_hash: Hash256,
    /// Merkle root over the block's full transaction set.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub time: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
    /// Partial merkle tree digests proving inclusion of matched transactions.
    pub merkle_hashes: Vec<Hash256>,
    /// Traversal flag bits accompanying `merkle_hashes`.
    pub merkle_flags: Vec<u8>,
    /// Opaque auxiliary proof-of-work blob, for merge-mined chain variants.
    pub aux_pow: Option<Vec<u8>>,
    /// Chain membership, authoritative over the storage key prefix.
    pub membership: Membership,
    /// Distance from genesis along prev links. Main/Side only.
    pub depth: u64,
    /// Cumulative proof-of-work up to and including this block.
    pub work: u128,
}

impl CompactBlock {
    /// Serialized header size used for hashing.
    const HEADER_SIZE: usize = 4 + 32 + 32 + 4 + 4 + 4;

    /// Compute the block hash: double SHA-256 over the 80-byte header layout
    /// `version || prev_hash || merkle_root || time || bits || nonce`,
    /// integers little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HEADER_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.time.to_le_bytes());
        data.extend_from_slice(&self.bits.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }

    /// Proof-of-work contributed by this block alone, derived from `bits`.
    pub fn work_contribution(&self) -> u128 {
        work::work_from_bits(self.bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prev_out: OutPoint {
                    txid: Hash256([0x11; 32]),
                    vout: 0,
                },
                script_sig: vec![0u8; 16],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 50_0000_0000,
                script: vec![0u8; 25],
            }],
            lock_time: 0,
        }
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prev_out: OutPoint::null(),
                script_sig: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 50_0000_0000,
                script: vec![0u8; 25],
            }],
            lock_time: 0,
        }
    }

    fn sample_block() -> CompactBlock {
        CompactBlock {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256([0x22; 32]),
            time: 1_700_000_000,
            bits: 0x1d00ffff,
            nonce: 0,
            merkle_hashes: vec![Hash256([0x33; 32])],
            merkle_flags: vec![0x1d],
            aux_pow: None,
            membership: Membership::Main,
            depth: 0,
            work: 0,
        }
    }

    // --- Hash newtypes ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
        assert!(!Hash256([1; 32]).is_zero());
    }

    #[test]
    fn hash256_display_hex() {
        let s = format!("{}", Hash256([0xAB; 32]));
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn hash160_display_hex() {
        let s = format!("{}", Hash160([0x0F; 20]));
        assert_eq!(s.len(), 40);
        assert_eq!(&s[0..2], "0f");
    }

    // --- OutPoint ---

    #[test]
    fn outpoint_null_detection() {
        assert!(OutPoint::null().is_null());
        let op = OutPoint { txid: Hash256([1; 32]), vout: 0 };
        assert!(!op.is_null());
    }

    // --- Transaction ---

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn txid_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.txid().unwrap(), tx.txid().unwrap());
    }

    #[test]
    fn txid_changes_with_data() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.lock_time = 1;
        assert_ne!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn payload_size_matches_payload() {
        let tx = sample_tx();
        assert_eq!(tx.payload_size().unwrap(), tx.payload().unwrap().len());
    }

    // --- CompactBlock ---

    #[test]
    fn block_hash_deterministic() {
        let b = sample_block();
        assert_eq!(b.hash(), b.hash());
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let b1 = sample_block();
        let mut b2 = b1.clone();
        b2.nonce = 1;
        assert_ne!(b1.hash(), b2.hash());
    }

    #[test]
    fn block_hash_ignores_storage_fields() {
        // Membership, depth, work and the merkle proof are not part of the
        // header, so rewriting them (reorg, orphan connection) must not
        // change the block's identity.
        let b1 = sample_block();
        let mut b2 = b1.clone();
        b2.membership = Membership::Side;
        b2.depth = 99;
        b2.work = 12345;
        b2.merkle_hashes.clear();
        assert_eq!(b1.hash(), b2.hash());
    }

    #[test]
    fn block_hash_header_is_80_bytes() {
        assert_eq!(CompactBlock::HEADER_SIZE, 80);
    }

    // --- Bincode round-trips ---

    #[test]
    fn bincode_round_trip_block() {
        let mut b = sample_block();
        b.aux_pow = Some(vec![1, 2, 3]);
        b.work = u128::from(u64::MAX) + 17;
        let encoded = bincode::encode_to_vec(&b, bincode::config::standard()).unwrap();
        let (decoded, _): (CompactBlock, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(b, decoded);
    }

    #[test]
    fn bincode_round_trip_transaction() {
        let tx = sample_tx();
        let encoded = tx.payload().unwrap();
        let (decoded, _): (Transaction, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(tx, decoded);
    }
}
