//! Relay Protocol — Shared JSON-RPC 2.0 types and protocol definitions.
//!
//! This crate contains no I/O or async code. It defines the message types
//! used for communication between the CLI (or any other client) and the
//! Relay daemon.

mod generate;
mod jsonrpc;

pub use generate::*;
pub use jsonrpc::*;
use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid JSON-RPC request: {0}")]
    InvalidRequest(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}
