use serde_json::Value;

/// Overwrite `params.arguments.user_token` in a `tools/call` frame with the
/// session's bound token. Returns `None` when the body is not a tool call
/// with an arguments object; such frames pass through byte-identical.
///
/// The write is unconditional: whatever token the client put there (including
/// a forged one) is replaced before the frame reaches the tool server.
pub fn inject_user_token(body: &[u8], token: &str) -> Option<Vec<u8>> {
    let mut message: Value = serde_json::from_slice(body).ok()?;
    if message.get("method").and_then(Value::as_str) != Some("tools/call") {
        return None;
    }
    let arguments = message.get_mut("params")?.get_mut("arguments")?;
    let object = arguments.as_object_mut()?;
    object.insert("user_token".to_string(), Value::String(token.to_string()));
    serde_json::to_vec(&message).ok()
}
