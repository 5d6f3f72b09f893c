use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MnemaError;
use crate::memory::{MemoryEngine, Tag};
use crate::tools::tool::{limit_arg, optional_str, Tool, ToolContext, ToolResult};

const DEFAULT_LIMIT: usize = 1000;

/// Inventory listing: everything the service knows about the caller,
/// newest first, no scoring.
pub struct InventoryTool {
    engine: Arc<MemoryEngine>,
}

impl InventoryTool {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for InventoryTool {
    fn name(&self) -> &str {
        "what_do_you_know"
    }

    fn description(&self) -> &str {
        "List everything stored about the user, newest first, optionally \
         filtered by category."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": Tag::ALL.map(Tag::as_str).to_vec(),
                    "description": "Optional category filter"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of memories to return (default: 1000)",
                    "default": DEFAULT_LIMIT
                },
                "user_token": {
                    "type": "string",
                    "description": "Authentication token (injected by the gateway, never user-provided)"
                }
            }
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, MnemaError> {
        let tag = optional_str(&args, "category").map(Tag::parse).transpose()?;
        let limit = limit_arg(&args, "limit", DEFAULT_LIMIT)?;

        let items = self.engine.inventory(&ctx.principal, tag, limit).await?;
        if items.is_empty() {
            let filter_text = tag
                .map(|t| format!(" in category '{t}'"))
                .unwrap_or_default();
            return Ok(ToolResult::ok(format!("No memories stored{filter_text}.")));
        }

        let filter_text = tag
            .map(|t| format!(" (category: {t})"))
            .unwrap_or_default();
        let mut out = format!("Your memories{filter_text} ({} total):\n\n", items.len());
        for (idx, item) in items.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. [{}] {} (ID: {}, {})",
                idx + 1,
                item.tag,
                item.text,
                item.id,
                item.created_date()
            );
        }
        Ok(ToolResult::ok(out))
    }
}
