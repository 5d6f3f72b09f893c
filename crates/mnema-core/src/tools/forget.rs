use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MnemaError;
use crate::memory::MemoryEngine;
use crate::tools::tool::{required_str, Tool, ToolContext, ToolResult};

/// Delete one memory. A record belonging to someone else reads as missing,
/// so the response never confirms existence across users.
pub struct ForgetTool {
    engine: Arc<MemoryEngine>,
}

impl ForgetTool {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ForgetTool {
    fn name(&self) -> &str {
        "forget"
    }

    fn description(&self) -> &str {
        "Delete a stored memory by its ID. Conflict links pointing at the \
         deleted memory are cleaned up automatically."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "information_id": {
                    "type": "string",
                    "description": "ID of the memory to delete (as returned by remember or recall)"
                },
                "user_token": {
                    "type": "string",
                    "description": "Authentication token (injected by the gateway, never user-provided)"
                }
            },
            "required": ["information_id"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, MnemaError> {
        let id = required_str(&args, "information_id")?;
        match self.engine.forget(&ctx.principal, id).await {
            Ok(()) => Ok(ToolResult::ok(format!("Memory {id} deleted."))),
            Err(MnemaError::NotFound) => {
                Ok(ToolResult::err(format!("Memory {id} not found.")))
            }
            Err(err) => Err(err),
        }
    }
}
