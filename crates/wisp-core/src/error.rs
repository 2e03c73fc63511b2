//! Error types for the Wisp SPV store.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("serialization: {0}")] Serialization(String),
    #[error("deserialization: {0}")] Deserialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("truncated push at offset {0}")] TruncatedPush(usize),
    #[error("truncated pushdata length at offset {0}")] TruncatedLength(usize),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage: {0}")] Storage(String),
    #[error("codec: {source}")] Codec { #[from] source: CodecError },
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("database is closed")] Closed,
}

#[derive(Error, Debug)]
pub enum WispError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Script(#[from] ScriptError),
    #[error(transparent)] Store(#[from] StoreError),
}
