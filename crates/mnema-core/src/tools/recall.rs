use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MnemaError;
use crate::memory::{MemoryEngine, Tag};
use crate::tools::tool::{limit_arg, optional_str, required_str, Tool, ToolContext, ToolResult};

const DEFAULT_LIMIT: usize = 10;

/// Hybrid search over the caller's memories, with conflict groups appended
/// after the primary result list.
pub struct RecallTool {
    engine: Arc<MemoryEngine>,
}

impl RecallTool {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Search stored memories by meaning, topped up with keyword matches. \
         Conflicting memories are grouped at the end of the response; surface \
         those groups to the user rather than silently picking one side."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 10)",
                    "default": DEFAULT_LIMIT
                },
                "category_filter": {
                    "type": "string",
                    "enum": Tag::ALL.map(Tag::as_str).to_vec(),
                    "description": "Optional category to restrict the search to"
                },
                "user_token": {
                    "type": "string",
                    "description": "Authentication token (injected by the gateway, never user-provided)"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, MnemaError> {
        let query = required_str(&args, "query")?;
        let limit = limit_arg(&args, "limit", DEFAULT_LIMIT)?;
        let tag_filter = optional_str(&args, "category_filter")
            .map(Tag::parse)
            .transpose()?;

        let result = self
            .engine
            .recall(&ctx.principal, query, limit, tag_filter)
            .await?;

        if result.items.is_empty() {
            return Ok(ToolResult::ok(format!(
                "No memories found matching '{query}'."
            )));
        }

        let mut out = format!("Found {} memories for '{query}':\n\n", result.items.len());
        for (idx, item) in result.items.iter().enumerate() {
            let similarity = item
                .similarity
                .map(|s| format!("{s:.3}"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                out,
                "{}. [{}] {} (ID: {}, similarity {}, {})",
                idx + 1,
                item.tag,
                item.text,
                item.id,
                similarity,
                item.created_date()
            );
        }

        if !result.conflict_groups.is_empty() {
            let _ = write!(
                out,
                "\nCONFLICTS DETECTED ({} group{}):\n",
                result.conflict_groups.len(),
                if result.conflict_groups.len() == 1 { "" } else { "s" }
            );
            for (idx, group) in result.conflict_groups.iter().enumerate() {
                let _ = writeln!(out, "Conflict group {}:", idx + 1);
                for member in group {
                    let _ = writeln!(
                        out,
                        "  - {} (ID: {}, {})",
                        member.text,
                        member.id,
                        member.created_date()
                    );
                }
            }
            out.push_str(
                "Ask the user which memory in each group is current before relying on any of them.",
            );
        }

        Ok(ToolResult::ok(out))
    }
}
