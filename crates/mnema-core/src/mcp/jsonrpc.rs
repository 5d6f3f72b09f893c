use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Inbound JSON-RPC frame. Ids may be numbers or strings depending on the
/// client; a missing or null id marks a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn default_version() -> String {
    "2.0".to_string()
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        matches!(&self.id, None | Some(Value::Null))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_both_parse() {
        let a: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        let b: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#).unwrap();
        assert!(!a.is_notification());
        assert!(!b.is_notification());
    }

    #[test]
    fn missing_and_null_ids_are_notifications() {
        let a: JsonRpcRequest =
            serde_json::from_str(r#"{"method":"notifications/initialized"}"#).unwrap();
        let b: JsonRpcRequest =
            serde_json::from_str(r#"{"id":null,"method":"notifications/initialized"}"#).unwrap();
        assert!(a.is_notification());
        assert!(b.is_notification());
    }

    #[test]
    fn success_omits_the_error_field_on_the_wire() {
        let response = JsonRpcResponse::success(serde_json::json!(1), serde_json::json!({}));
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(!encoded.contains("error"));
        assert!(encoded.contains("\"result\""));
    }

    #[test]
    fn failure_omits_the_result_field_on_the_wire() {
        let response = JsonRpcResponse::failure(None, METHOD_NOT_FOUND, "nope");
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(!encoded.contains("result"));
        assert!(encoded.contains("-32601"));
    }
}
