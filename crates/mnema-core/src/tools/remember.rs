use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MnemaError;
use crate::memory::{MemoryEngine, RememberOutcome, Tag};
use crate::tools::tool::{required_str, Tool, ToolContext, ToolResult};

/// Store a memory, reporting duplicates, quota refusals, and any conflict
/// candidates the ingest detected.
pub struct RememberTool {
    engine: Arc<MemoryEngine>,
}

impl RememberTool {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store a new memory about the user with automatic duplicate and conflict detection. \
         Conflicting earlier memories are listed in the response; ask the user which to keep."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The memory text to store"
                },
                "category": {
                    "type": "string",
                    "enum": Tag::ALL.map(Tag::as_str).to_vec(),
                    "description": "Category for the memory"
                },
                "user_token": {
                    "type": "string",
                    "description": "Authentication token (injected by the gateway, never user-provided)"
                }
            },
            "required": ["text", "category"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, MnemaError> {
        let text = required_str(&args, "text")?;
        let tag = Tag::parse(required_str(&args, "category")?)?;

        let outcome = self.engine.remember(&ctx.principal, text, tag).await?;
        let content = match outcome {
            RememberOutcome::Stored { id, conflicts } => {
                let mut out = String::from("Memory stored.\n\n");
                let _ = writeln!(out, "Text: {text}");
                let _ = writeln!(out, "Category: {tag}");
                let _ = writeln!(out, "ID: {id}");
                if !conflicts.is_empty() {
                    let _ = write!(out, "\nCONFLICTS DETECTED with existing memories:\n");
                    for conflict in &conflicts {
                        let _ = writeln!(
                            out,
                            "- {} (ID: {}, {})",
                            conflict.text,
                            conflict.id,
                            conflict.created_date()
                        );
                    }
                    out.push_str(
                        "\nThese may contradict the new memory. Ask the user which to keep, \
                         then use forget to remove the losers.",
                    );
                }
                out
            }
            RememberOutcome::DuplicateExact => {
                "Skipped: an identical memory (same text and category) is already stored."
                    .to_string()
            }
            RememberOutcome::DuplicateSemantic { id, similarity } => format!(
                "Skipped: too similar to existing memory {id} (similarity {similarity:.3}). \
                 Forget it first if this version should replace it."
            ),
            RememberOutcome::QuotaExceeded {
                used,
                limit,
                upgrade_url,
            } => format!(
                "Memory limit reached: {used} of {limit} used. \
                 Forget memories you no longer need, or upgrade: {upgrade_url}"
            ),
        };
        Ok(ToolResult::ok(content))
    }
}
