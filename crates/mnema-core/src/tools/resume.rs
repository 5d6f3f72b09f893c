use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::checkpoint::CheckpointStore;
use crate::error::MnemaError;
use crate::tools::tool::{Tool, ToolContext, ToolResult};

/// Restore the caller's saved checkpoint, if any.
pub struct ResumeTool {
    store: Arc<CheckpointStore>,
}

impl ResumeTool {
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ResumeTool {
    fn name(&self) -> &str {
        "resume"
    }

    fn description(&self) -> &str {
        "Load the conversation context saved with checkpoint, if one exists."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_token": {
                    "type": "string",
                    "description": "Authentication token (injected by the gateway, never user-provided)"
                }
            }
        })
    }

    async fn call(&self, ctx: &ToolContext, _args: Value) -> Result<ToolResult, MnemaError> {
        let Some(checkpoint) = self.store.load(&ctx.principal.user_id).await? else {
            return Ok(ToolResult::ok(
                "No saved checkpoint found. Use checkpoint to save one.",
            ));
        };

        let mut out = String::from("Restored checkpoint");
        if let Some(title) = &checkpoint.title {
            let _ = write!(out, " '{title}'");
        }
        let _ = writeln!(
            out,
            " from {}:\n",
            checkpoint.created_at.format("%Y-%m-%d %H:%M UTC")
        );
        out.push_str(&checkpoint.content);
        Ok(ToolResult::ok(out))
    }
}
