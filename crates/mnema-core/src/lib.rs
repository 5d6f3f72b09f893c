pub mod auth;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod mcp;
pub mod memory;
pub mod tools;

pub use auth::{IssuedToken, Principal, TokenStore};
pub use checkpoint::{Checkpoint, CheckpointStore, SavedCheckpoint};
pub use config::{EmbeddingConfig, HostPolicy, MnemaConfig};
pub use embedding::{EmbeddingProvider, HashedEmbedder, HttpEmbedder};
pub use error::MnemaError;
pub use mcp::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpService, PROTOCOL_VERSION};
pub use memory::{
    EngineTuning, MemoryEngine, MemoryProjection, MemoryRecord, MemoryStore, PruneReport,
    RecallResult, RememberOutcome, Tag, UserLocks,
};
pub use tools::{default_registry, Tool, ToolContext, ToolDef, ToolRegistry, ToolResult};
