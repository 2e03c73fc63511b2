//! Proof-of-work accounting from compact difficulty bits.
//!
//! The store never verifies proof-of-work; it only accumulates each block's
//! contribution so the caller's chain-selection logic can compare forks.

/// Per-block work contribution derived from the compact `bits` encoding.
///
/// Compact bits encode a target as `mantissa * 256^(exponent - 3)`; the
/// contribution is `2^256 / (target + 1)`, computed here in `u128`:
///
/// ```text
/// 2^256 / (mantissa * 2^(8 * (exponent - 3))) = 2^(256 - 8*(exponent - 3)) / mantissa
/// ```
///
/// Results that would exceed `u128` saturate at `u128::MAX`; real chains sit
/// far below that bound. A zero mantissa, a sign-flagged mantissa, or a
/// target at or above 2^256 all contribute zero.
pub fn work_from_bits(bits: u32) -> u128 {
    let exponent = (bits >> 24) as i64;
    let mantissa = (bits & 0x007f_ffff) as u128;
    if mantissa == 0 || bits & 0x0080_0000 != 0 {
        return 0;
    }
    let shift = 256 - 8 * (exponent - 3);
    if shift <= 0 {
        return 0;
    }
    if shift >= 128 {
        return u128::MAX;
    }
    (1u128 << shift) / mantissa
}
