//! Output script classification and address extraction.
//!
//! [`classify_output`] is a pure, total function: it never fails and never
//! aborts the caller's persistence flow. Scripts that cannot be parsed are
//! logged and classified [`ScriptKind::Unknown`] with empty address and name
//! lists.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::ScriptError;
use crate::types::Hash160;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1: u8 = 0x51;
const OP_3: u8 = 0x53;
const OP_16: u8 = 0x60;
const OP_DUP: u8 = 0x76;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKMULTISIG: u8 = 0xae;

/// Compressed / uncompressed public key lengths.
const PUBKEY_LENS: [usize; 2] = [33, 65];

/// Chain variant the deployment is configured for.
///
/// Name-registration scripts are only recognized on [`ChainVariant::Namecoin`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChainVariant {
    #[default]
    Bitcoin,
    /// Merge-mined variant carrying name-registration operations.
    Namecoin,
}

/// Script pattern recognized by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    /// `OP_DUP OP_HASH160 <digest> OP_EQUALVERIFY OP_CHECKSIG`.
    PubkeyHash,
    /// `<pubkey> OP_CHECKSIG`.
    Pubkey,
    /// `OP_m <pubkeys...> OP_n OP_CHECKMULTISIG`.
    Multisig,
    /// Name operation prefix over a standard pay-to-hash160 tail.
    NameRegistration,
    /// Anything else, including unparseable byte sequences.
    Unknown,
}

/// Result of classifying one output script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub kind: ScriptKind,
    /// `(output_index, address_digest)` pairs extracted from the script.
    pub addresses: Vec<(u32, Hash160)>,
    /// `(output_index, raw_script)` name records, Namecoin variant only.
    pub names: Vec<(u32, Vec<u8>)>,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            kind: ScriptKind::Unknown,
            addresses: Vec::new(),
            names: Vec::new(),
        }
    }
}

/// The 20-byte address digest: RIPEMD-160 over SHA-256.
pub fn hash160(data: &[u8]) -> Hash160 {
    Hash160(Ripemd160::digest(Sha256::digest(data)).into())
}

/// One tokenized script element.
enum Op<'a> {
    Push(&'a [u8]),
    Code(u8),
}

/// Split a script into push data and opcodes.
fn tokenize(script: &[u8]) -> Result<Vec<Op<'_>>, ScriptError> {
    let mut ops = Vec::new();
    let mut at = 0usize;
    while at < script.len() {
        let opcode = script[at];
        at += 1;
        let push_len = match opcode {
            1..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => {
                let len = *script.get(at).ok_or(ScriptError::TruncatedLength(at))? as usize;
                at += 1;
                Some(len)
            }
            OP_PUSHDATA2 => {
                let bytes = script
                    .get(at..at + 2)
                    .ok_or(ScriptError::TruncatedLength(at))?;
                at += 2;
                Some(u16::from_le_bytes([bytes[0], bytes[1]]) as usize)
            }
            OP_PUSHDATA4 => {
                let bytes = script
                    .get(at..at + 4)
                    .ok_or(ScriptError::TruncatedLength(at))?;
                at += 4;
                Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
            }
            _ => None,
        };
        match push_len {
            Some(len) => {
                let data = script
                    .get(at..at + len)
                    .ok_or(ScriptError::TruncatedPush(at))?;
                at += len;
                ops.push(Op::Push(data));
            }
            None => ops.push(Op::Code(opcode)),
        }
    }
    Ok(ops)
}

/// Decode an `OP_1`..`OP_16` opcode to its small integer.
fn small_int(code: u8) -> Option<u8> {
    (OP_1..=OP_16).contains(&code).then(|| code - OP_1 + 1)
}

fn match_pubkey_hash(ops: &[Op<'_>]) -> Option<Hash160> {
    match ops {
        [
            Op::Code(OP_DUP),
            Op::Code(OP_HASH160),
            Op::Push(digest),
            Op::Code(OP_EQUALVERIFY),
            Op::Code(OP_CHECKSIG),
        ] if digest.len() == 20 => {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(digest);
            Some(Hash160(bytes))
        }
        _ => None,
    }
}

fn match_pubkey(ops: &[Op<'_>]) -> Option<Hash160> {
    match ops {
        [Op::Push(key), Op::Code(OP_CHECKSIG)] if PUBKEY_LENS.contains(&key.len()) => {
            Some(hash160(key))
        }
        _ => None,
    }
}

fn match_multisig(ops: &[Op<'_>]) -> Option<Vec<Hash160>> {
    if ops.len() < 4 {
        return None;
    }
    let Op::Code(first) = &ops[0] else { return None };
    let required = small_int(*first)?;
    let Op::Code(OP_CHECKMULTISIG) = &ops[ops.len() - 1] else {
        return None;
    };
    let Op::Code(second_last) = &ops[ops.len() - 2] else {
        return None;
    };
    let total = small_int(*second_last)?;
    if required > total {
        return None;
    }
    let keys = &ops[1..ops.len() - 2];
    if keys.len() != total as usize {
        return None;
    }
    let mut digests = Vec::with_capacity(keys.len());
    for op in keys {
        let Op::Push(key) = op else { return None };
        if !PUBKEY_LENS.contains(&key.len()) {
            return None;
        }
        digests.push(hash160(key));
    }
    Some(digests)
}

/// Name operations carry an `OP_1`..`OP_3` tag (new / first-update / update)
/// and end in a standard pay-to-hash160 tail.
fn match_name_registration(ops: &[Op<'_>]) -> Option<Hash160> {
    if ops.len() < 6 {
        return None;
    }
    let Op::Code(tag) = &ops[0] else { return None };
    if !(OP_1..=OP_3).contains(tag) {
        return None;
    }
    match_pubkey_hash(&ops[ops.len() - 5..])
}

/// Classify one output script, extracting address digests and name records.
///
/// Patterns are tried in priority order: pay-to-hash160 / pay-to-pubkey,
/// multisig, then (Namecoin only) name registration. Parse failures are
/// logged and yield [`ScriptKind::Unknown`]; the caller's persistence flow
/// is never interrupted.
pub fn classify_output(script: &[u8], vout: u32, variant: ChainVariant) -> Classification {
    let ops = match tokenize(script) {
        Ok(ops) => ops,
        Err(e) => {
            tracing::error!(vout, error = %e, "failed to parse output script");
            return Classification::unknown();
        }
    };

    if let Some(digest) = match_pubkey_hash(&ops) {
        return Classification {
            kind: ScriptKind::PubkeyHash,
            addresses: vec![(vout, digest)],
            names: Vec::new(),
        };
    }
    if let Some(digest) = match_pubkey(&ops) {
        return Classification {
            kind: ScriptKind::Pubkey,
            addresses: vec![(vout, digest)],
            names: Vec::new(),
        };
    }
    if let Some(digests) = match_multisig(&ops) {
        return Classification {
            kind: ScriptKind::Multisig,
            addresses: digests.into_iter().map(|d| (vout, d)).collect(),
            names: Vec::new(),
        };
    }
    if variant == ChainVariant::Namecoin {
        if let Some(digest) = match_name_registration(&ops) {
            return Classification {
                kind: ScriptKind::NameRegistration,
                addresses: vec![(vout, digest)],
                names: vec![(vout, script.to_vec())],
            };
        }
    }

    tracing::debug!(vout, len = script.len(), "unknown script type");
    Classification::unknown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p2pkh_script(digest: [u8; 20]) -> Vec<u8> {
        let mut s = vec![OP_DUP, OP_HASH160, 20];
        s.extend_from_slice(&digest);
        s.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        s
    }

    fn p2pk_script(key: &[u8]) -> Vec<u8> {
        let mut s = vec![key.len() as u8];
        s.extend_from_slice(key);
        s.push(OP_CHECKSIG);
        s
    }

    fn multisig_script(required: u8, keys: &[Vec<u8>]) -> Vec<u8> {
        let mut s = vec![OP_1 + required - 1];
        for key in keys {
            s.push(key.len() as u8);
            s.extend_from_slice(key);
        }
        s.push(OP_1 + keys.len() as u8 - 1);
        s.push(OP_CHECKMULTISIG);
        s
    }

    fn name_new_script(digest: [u8; 20]) -> Vec<u8> {
        // OP_1 <name-hash> OP_2DROP + standard pay-to-hash160 tail.
        let mut s = vec![OP_1, 20];
        s.extend_from_slice(&[0x42; 20]);
        s.push(0x6d);
        s.extend_from_slice(&p2pkh_script(digest));
        s
    }

    #[test]
    fn classifies_pay_to_hash160() {
        let digest = [0xAA; 20];
        let c = classify_output(&p2pkh_script(digest), 3, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::PubkeyHash);
        assert_eq!(c.addresses, vec![(3, Hash160(digest))]);
        assert!(c.names.is_empty());
    }

    #[test]
    fn classifies_pay_to_pubkey_with_hashed_key() {
        let key = [0x02; 33];
        let c = classify_output(&p2pk_script(&key), 0, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Pubkey);
        assert_eq!(c.addresses, vec![(0, hash160(&key))]);
    }

    #[test]
    fn classifies_uncompressed_pubkey() {
        let key = [0x04; 65];
        let c = classify_output(&p2pk_script(&key), 0, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Pubkey);
    }

    #[test]
    fn classifies_multisig_one_address_per_key() {
        let keys = vec![vec![0x02; 33], vec![0x03; 33], vec![0x04; 65]];
        let c = classify_output(&multisig_script(2, &keys), 1, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Multisig);
        assert_eq!(c.addresses.len(), 3);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(c.addresses[i], (1, hash160(key)));
        }
    }

    #[test]
    fn rejects_multisig_with_key_count_mismatch() {
        // Claims 3 keys but carries 2.
        let keys = vec![vec![0x02; 33], vec![0x03; 33]];
        let mut s = vec![OP_1 + 1];
        for key in &keys {
            s.push(key.len() as u8);
            s.extend_from_slice(key);
        }
        s.push(OP_3);
        s.push(OP_CHECKMULTISIG);
        let c = classify_output(&s, 0, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Unknown);
    }

    #[test]
    fn name_registration_requires_namecoin_variant() {
        let digest = [0xBB; 20];
        let script = name_new_script(digest);

        let c = classify_output(&script, 2, ChainVariant::Namecoin);
        assert_eq!(c.kind, ScriptKind::NameRegistration);
        assert_eq!(c.addresses, vec![(2, Hash160(digest))]);
        assert_eq!(c.names, vec![(2, script.clone())]);

        let c = classify_output(&script, 2, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Unknown);
        assert!(c.addresses.is_empty());
    }

    #[test]
    fn unparseable_script_is_unknown() {
        // OP_PUSHDATA1 with no length byte.
        let c = classify_output(&[OP_PUSHDATA1], 0, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Unknown);
        assert!(c.addresses.is_empty());
        assert!(c.names.is_empty());

        // Push claiming more data than remains.
        let c = classify_output(&[10, 0x01, 0x02], 0, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Unknown);
    }

    #[test]
    fn nonstandard_script_is_unknown() {
        let c = classify_output(&[OP_DUP, OP_DUP, OP_CHECKSIG], 0, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Unknown);
    }

    #[test]
    fn empty_script_is_unknown() {
        let c = classify_output(&[], 0, ChainVariant::Bitcoin);
        assert_eq!(c.kind, ScriptKind::Unknown);
    }

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let c = classify_output(&bytes, 0, ChainVariant::Namecoin);
            if c.kind == ScriptKind::Unknown {
                prop_assert!(c.addresses.is_empty());
                prop_assert!(c.names.is_empty());
            }
        }

        #[test]
        fn p2pkh_always_extracts_embedded_digest(digest in any::<[u8; 20]>(), vout in any::<u32>()) {
            let c = classify_output(&p2pkh_script(digest), vout, ChainVariant::Bitcoin);
            prop_assert_eq!(c.kind, ScriptKind::PubkeyHash);
            prop_assert_eq!(c.addresses, vec![(vout, Hash160(digest))]);
        }
    }
}
