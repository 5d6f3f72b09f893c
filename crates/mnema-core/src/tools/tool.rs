use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Principal;
use crate::error::MnemaError;

/// Per-call context assembled by the dispatcher. The principal is resolved
/// from the injected `user_token` before the tool ever runs; tools never
/// see the token itself.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub principal: Principal,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, MnemaError>;
}

/// Textual payload returned to the language-model consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Wire-facing tool description, serialised into `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Helpers shared by the tool implementations.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, MnemaError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MnemaError::Validation(format!("'{key}' is required")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn limit_arg(args: &Value, key: &str, default: usize) -> Result<usize, MnemaError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => {
            let limit = value
                .as_u64()
                .ok_or_else(|| MnemaError::Validation(format!("'{key}' must be a positive integer")))?;
            if limit == 0 {
                return Err(MnemaError::Validation(format!("'{key}' must be at least 1")));
            }
            Ok(limit as usize)
        }
    }
}
