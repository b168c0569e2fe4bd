//! Model Context Protocol client side: JSON-RPC envelopes and the request driver
//!
//! Builds requests for `initialize`, `tools/list` and `tools/call`, correlates
//! each reply with its request id, and classifies failures.

pub mod client;
pub mod rpc;
pub mod types;

pub use client::{Exchange, McpClient};
