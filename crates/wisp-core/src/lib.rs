//! # wisp-core
//! Foundation types and pure chain logic for the Wisp SPV store.

pub mod error;
pub mod script;
pub mod types;
pub mod work;
