//! Integration tests for the Wisp SPV store.
//!
//! The tests in `tests/` exercise the store the way a syncing client would:
//! blocks arriving in and out of order, fork switches, watched-address
//! wallets, and restarts against the same data directory.

pub mod helpers;
