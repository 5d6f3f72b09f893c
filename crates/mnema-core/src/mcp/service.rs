use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::auth::TokenStore;
use crate::config::HostPolicy;
use crate::error::MnemaError;
use crate::mcp::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "mnema";

/// Server-side MCP method handling: `initialize`, `tools/list`, and
/// `tools/call` dispatch into the tool registry.
///
/// Authentication is per call: the gateway injects `user_token` into the
/// call arguments, the service pops it (so no tool and no response ever
/// sees it) and resolves the principal.
pub struct McpService {
    registry: ToolRegistry,
    tokens: TokenStore,
    hosts: HostPolicy,
}

impl McpService {
    pub fn new(registry: ToolRegistry, tokens: TokenStore, hosts: HostPolicy) -> Self {
        Self {
            registry,
            tokens,
            hosts,
        }
    }

    /// Handle one raw JSON-RPC frame. Returns `None` for notifications.
    pub async fn handle(&self, raw: &str, host: Option<&str>) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "unparseable frame");
                return Some(JsonRpcResponse::failure(
                    None,
                    PARSE_ERROR,
                    format!("parse error: {err}"),
                ));
            }
        };

        if request.is_notification() {
            debug!(method = %request.method, "notification ignored");
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": { "listChanged": false }
                    },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                json!({ "tools": self.registry.tool_defs() }),
            ),
            "tools/call" => self.call_tool(id, request.params, host).await,
            other => JsonRpcResponse::failure(
                Some(id),
                METHOD_NOT_FOUND,
                format!("unknown method: {other}"),
            ),
        };
        Some(response)
    }

    async fn call_tool(
        &self,
        id: Value,
        params: Option<Value>,
        host: Option<&str>,
    ) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::failure(Some(id), INVALID_PARAMS, "params required");
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::failure(Some(id), INVALID_PARAMS, "'name' is required");
        };

        let mut args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        // The reserved slot written by the gateway. Popped here so neither
        // the tool nor the formatted payload can echo it.
        let token = args
            .as_object_mut()
            .and_then(|object| object.remove("user_token"))
            .and_then(|value| value.as_str().map(str::to_string));

        let result = self.dispatch(name, token, args, host).await;
        JsonRpcResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": result.content }],
                "isError": result.is_error
            }),
        )
    }

    async fn dispatch(
        &self,
        name: &str,
        token: Option<String>,
        args: Value,
        host: Option<&str>,
    ) -> ToolResult {
        let Some(token) = token else {
            return ToolResult::err(
                "Error: no authentication token found. Connect through the authenticated gateway.",
            );
        };

        let principal = match self.tokens.validate(&token).await {
            Ok(principal) => principal,
            Err(MnemaError::Unauthenticated) => {
                return ToolResult::err("Error: invalid or expired token.");
            }
            Err(err) => {
                error!(%err, "token validation backend failure");
                return ToolResult::err(
                    "Error: authentication backend temporarily unavailable. Please retry.",
                );
            }
        };

        if !principal.is_admin {
            if let Err(MnemaError::ForbiddenHost { canonical }) = self.hosts.check(host) {
                warn!(user_id = %principal.user_id, ?host, "memory operation on non-allow-listed host");
                return ToolResult::err(format!(
                    "Error: memory operations must go through {canonical}."
                ));
            }
        }

        let Some(tool) = self.registry.get(name) else {
            return ToolResult::err(format!("Unknown tool: {name}"));
        };

        let ctx = ToolContext { principal };
        match tool.call(&ctx, args).await {
            Ok(result) => result,
            Err(MnemaError::Validation(message)) => ToolResult::err(format!("Error: {message}")),
            Err(MnemaError::NotFound) => ToolResult::err("Error: not found."),
            Err(err) if err.is_retryable() => {
                error!(tool = name, %err, "backend failure during tool call");
                ToolResult::err("Error: backend temporarily unavailable. Please retry.")
            }
            Err(err) => {
                error!(tool = name, %err, "tool call failed");
                ToolResult::err(format!("Error executing {name}: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::db::connect;
    use crate::embedding::HashedEmbedder;
    use crate::memory::{EngineTuning, MemoryEngine, MemoryStore};
    use crate::tools::default_registry;

    struct Fixture {
        service: McpService,
        token: String,
        _dir: tempfile::TempDir,
    }

    async fn fixture_with_hosts(hosts: HostPolicy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(&dir.path().join("svc.db")).await.unwrap();
        let tokens = TokenStore::new(pool.clone());
        let issued = tokens.issue(Some("tester")).await.unwrap();
        let engine = Arc::new(MemoryEngine::new(
            MemoryStore::new(pool.clone()),
            Arc::new(HashedEmbedder),
            EngineTuning::default(),
        ));
        let checkpoints = Arc::new(CheckpointStore::new(pool));
        let registry = default_registry(engine, checkpoints);
        Fixture {
            service: McpService::new(registry, tokens, hosts),
            token: issued.token,
            _dir: dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_hosts(HostPolicy::default()).await
    }

    fn call_frame(id: u64, tool: &str, mut args: serde_json::Map<String, Value>, token: Option<&str>) -> String {
        if let Some(token) = token {
            args.insert("user_token".to_string(), json!(token));
        }
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": tool, "arguments": args }
        })
        .to_string()
    }

    fn text_of(response: &JsonRpcResponse) -> String {
        response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn is_error(response: &JsonRpcResponse) -> bool {
        response.result.as_ref().unwrap()["isError"]
            .as_bool()
            .unwrap()
    }

    #[tokio::test]
    async fn initialize_names_the_server_and_protocol() {
        let fx = fixture().await;
        let response = fx
            .service
            .handle(r#"{"jsonrpc":"2.0","id":0,"method":"initialize"}"#, None)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn tools_list_exposes_the_six_operations() {
        let fx = fixture().await;
        let response = fx
            .service
            .handle(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#, None)
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        assert_eq!(
            names,
            vec!["checkpoint", "forget", "recall", "remember", "resume", "what_do_you_know"]
        );
        for tool in &tools {
            assert!(tool["inputSchema"].is_object());
        }
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let fx = fixture().await;
        let response = fx
            .service
            .handle(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, None)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_methods_fail_with_method_not_found() {
        let fx = fixture().await;
        let response = fx
            .service
            .handle(r#"{"jsonrpc":"2.0","id":4,"method":"resources/list"}"#, None)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn garbage_frames_fail_with_parse_error() {
        let fx = fixture().await;
        let response = fx.service.handle("{not json", None).await.unwrap();
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn remember_stores_through_the_full_stack() {
        let fx = fixture().await;
        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("I deploy on Fridays"));
        args.insert("category".to_string(), json!("routine"));

        let frame = call_frame(2, "remember", args, Some(&fx.token));
        let response = fx.service.handle(&frame, None).await.unwrap();
        assert!(!is_error(&response));
        let text = text_of(&response);
        assert!(text.contains("Memory stored"));
        assert!(text.contains("ID: mem_"));
        // The injected token must never leak back out.
        assert!(!text.contains(&fx.token));
    }

    #[tokio::test]
    async fn missing_token_is_rejected_as_unauthenticated() {
        let fx = fixture().await;
        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("something"));
        args.insert("category".to_string(), json!("goal"));

        let frame = call_frame(3, "remember", args, None);
        let response = fx.service.handle(&frame, None).await.unwrap();
        assert!(is_error(&response));
        assert!(text_of(&response).contains("no authentication token"));
    }

    #[tokio::test]
    async fn bogus_token_is_rejected_without_detail() {
        let fx = fixture().await;
        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("something"));
        args.insert("category".to_string(), json!("goal"));

        let frame = call_frame(3, "remember", args, Some("attacker-token"));
        let response = fx.service.handle(&frame, None).await.unwrap();
        assert!(is_error(&response));
        assert!(text_of(&response).contains("invalid or expired"));
    }

    #[tokio::test]
    async fn invalid_category_lists_the_accepted_values() {
        let fx = fixture().await;
        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("something"));
        args.insert("category".to_string(), json!("mood"));

        let frame = call_frame(5, "remember", args, Some(&fx.token));
        let response = fx.service.handle(&frame, None).await.unwrap();
        assert!(is_error(&response));
        let text = text_of(&response);
        assert!(text.contains("goal"));
        assert!(text.contains("preference"));
    }

    #[tokio::test]
    async fn closed_host_list_blocks_other_ingresses() {
        let fx = fixture_with_hosts(HostPolicy {
            allowed_hosts: vec!["mnema.dev".to_string()],
            canonical_host: "mnema.dev".to_string(),
        })
        .await;
        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("something"));
        args.insert("category".to_string(), json!("goal"));

        let frame = call_frame(6, "remember", args, Some(&fx.token));
        let blocked = fx.service.handle(&frame, Some("rogue.example.com")).await.unwrap();
        assert!(is_error(&blocked));
        assert!(text_of(&blocked).contains("mnema.dev"));

        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("something"));
        args.insert("category".to_string(), json!("goal"));
        let frame = call_frame(7, "remember", args, Some(&fx.token));
        let allowed = fx.service.handle(&frame, Some("api.mnema.dev:443")).await.unwrap();
        assert!(!is_error(&allowed));
    }

    #[tokio::test]
    async fn checkpoint_then_resume_round_trips_with_overwrite_notice() {
        let fx = fixture().await;

        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("v1 context"));
        let frame = call_frame(8, "checkpoint", args, Some(&fx.token));
        let first = fx.service.handle(&frame, None).await.unwrap();
        assert!(!text_of(&first).contains("replaced"));

        let mut args = serde_json::Map::new();
        args.insert("text".to_string(), json!("v2 context"));
        let frame = call_frame(9, "checkpoint", args, Some(&fx.token));
        let second = fx.service.handle(&frame, None).await.unwrap();
        let text = text_of(&second);
        assert!(
            text.starts_with("Note: this replaced your previous checkpoint"),
            "overwrite notice must lead the payload: {text}"
        );

        let frame = call_frame(10, "resume", serde_json::Map::new(), Some(&fx.token));
        let resumed = fx.service.handle(&frame, None).await.unwrap();
        assert!(text_of(&resumed).contains("v2 context"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_in_band() {
        let fx = fixture().await;
        let frame = call_frame(11, "telepathy", serde_json::Map::new(), Some(&fx.token));
        let response = fx.service.handle(&frame, None).await.unwrap();
        assert!(is_error(&response));
        assert!(text_of(&response).contains("Unknown tool"));
    }
}
