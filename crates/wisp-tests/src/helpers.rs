//! Shared builders for the integration tests.

use wisp_core::types::{
    CompactBlock, Hash160, Hash256, Membership, OutPoint, Transaction, TxIn, TxOut,
};

/// The classic minimum-difficulty compact target.
pub const GENESIS_BITS: u32 = 0x1d00ffff;

/// Work contributed by one block at [`GENESIS_BITS`].
pub const GENESIS_WORK: u128 = 4_295_032_833;

/// Address digest from a seed byte.
pub fn digest(seed: u8) -> Hash160 {
    Hash160([seed; 20])
}

/// Standard pay-to-pubkey-hash locking script for `digest`.
pub fn p2pkh(digest: &Hash160) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 20];
    script.extend_from_slice(&digest.0);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// A compact block on top of `prev_hash`; `nonce` keeps hashes distinct.
pub fn make_block(prev_hash: Hash256, nonce: u32) -> CompactBlock {
    CompactBlock {
        version: 1,
        prev_hash,
        merkle_root: Hash256([0xAB; 32]),
        time: 1_300_000_000 + nonce,
        bits: GENESIS_BITS,
        nonce,
        merkle_hashes: Vec::new(),
        merkle_flags: Vec::new(),
        aux_pow: None,
        membership: Membership::Orphan,
        depth: 0,
        work: 0,
    }
}

/// A linked chain of `len` blocks starting on top of `prev_hash`.
pub fn chain(mut prev_hash: Hash256, len: usize, nonce_base: u32) -> Vec<CompactBlock> {
    let mut blocks = Vec::with_capacity(len);
    for i in 0..len {
        let block = make_block(prev_hash, nonce_base + i as u32);
        prev_hash = block.hash();
        blocks.push(block);
    }
    blocks
}

/// Coinbase transaction paying `to`; `tag` keeps txids distinct.
pub fn coinbase_paying(to: &Hash160, tag: u32) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prev_out: OutPoint::null(),
            script_sig: tag.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 50_000_000,
            script: p2pkh(to),
        }],
        lock_time: 0,
    }
}

/// Transaction spending one output and paying `to`.
pub fn spend(prev_txid: Hash256, vout: u32, to: &Hash160) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prev_out: OutPoint {
                txid: prev_txid,
                vout,
            },
            script_sig: vec![0; 72],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 49_000_000,
            script: p2pkh(to),
        }],
        lock_time: 0,
    }
}
