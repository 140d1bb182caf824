//! Relay Daemon — Unix-socket JSON-RPC server in front of the completion
//! router.

pub mod config;
pub mod handler;
pub mod server;
