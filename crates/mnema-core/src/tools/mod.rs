pub mod checkpoint;
pub mod forget;
pub mod inventory;
pub mod recall;
pub mod registry;
pub mod remember;
pub mod resume;
pub mod tool;

use std::sync::Arc;

use crate::checkpoint::CheckpointStore;
use crate::memory::MemoryEngine;

pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolDef, ToolResult};

pub use checkpoint::CheckpointTool;
pub use forget::ForgetTool;
pub use inventory::InventoryTool;
pub use recall::RecallTool;
pub use remember::RememberTool;
pub use resume::ResumeTool;

/// Registry carrying the full tool surface of the service.
pub fn default_registry(
    engine: Arc<MemoryEngine>,
    checkpoints: Arc<CheckpointStore>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RememberTool::new(engine.clone())));
    registry.register(Arc::new(RecallTool::new(engine.clone())));
    registry.register(Arc::new(ForgetTool::new(engine.clone())));
    registry.register(Arc::new(InventoryTool::new(engine)));
    registry.register(Arc::new(CheckpointTool::new(checkpoints.clone())));
    registry.register(Arc::new(ResumeTool::new(checkpoints)));
    registry
}
