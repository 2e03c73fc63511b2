//! # wisp-store
//! Chain persistence for the Wisp SPV client: the key-value chain store,
//! the block persistence and orphan-resolution engine, the reorg processor,
//! and the watched-address transaction filter.

pub mod db;
pub mod store;
pub mod watch;

pub use store::SpvStore;
