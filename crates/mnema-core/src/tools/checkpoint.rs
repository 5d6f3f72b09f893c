use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::checkpoint::CheckpointStore;
use crate::error::MnemaError;
use crate::tools::tool::{optional_str, required_str, Tool, ToolContext, ToolResult};

/// Save the single short-term checkpoint slot. When the save displaces an
/// earlier checkpoint the notice leads the payload; the agent must pass it
/// on verbatim so the user knows context was replaced.
pub struct CheckpointTool {
    store: Arc<CheckpointStore>,
}

impl CheckpointTool {
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CheckpointTool {
    fn name(&self) -> &str {
        "checkpoint"
    }

    fn description(&self) -> &str {
        "Save the current conversation context so a future session can pick \
         it up with resume. Each user has exactly one checkpoint slot; saving \
         again replaces it and the response says so."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The conversation context to save"
                },
                "title": {
                    "type": "string",
                    "description": "Optional short label for the checkpoint"
                },
                "user_token": {
                    "type": "string",
                    "description": "Authentication token (injected by the gateway, never user-provided)"
                }
            },
            "required": ["text"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, MnemaError> {
        let text = required_str(&args, "text")?;
        let title = optional_str(&args, "title");

        let saved = self
            .store
            .save(&ctx.principal.user_id, text, title)
            .await?;

        let mut out = String::new();
        if let Some(previous) = saved.previous_created_at {
            out.push_str(&format!(
                "Note: this replaced your previous checkpoint from {}.\n\n",
                previous.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        out.push_str(&format!(
            "Checkpoint saved (ID: {}). Use resume in a new session to restore it.",
            saved.id
        ));
        Ok(ToolResult::ok(out))
    }
}
