pub mod jsonrpc;
pub mod service;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use service::{McpService, PROTOCOL_VERSION, SERVER_NAME};
