//! Model Context Protocol layer.
//!
//! [`protocol`] holds the JSON-RPC 2.0 wire types and the MCP error codes;
//! [`server`] is the per-session server instance that registers the tool
//! and resource surface for one product.

pub mod protocol;
pub mod server;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::McpServer;
