use axum::http::{header, HeaderMap};

/// Token extraction order: `Authorization: Bearer`, then `?token=`.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(bearer) = value.strip_prefix("Bearer ") {
            if !bearer.is_empty() {
                return Some(bearer.to_string());
            }
        }
    }
    query_token
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Tokens are logged by prefix only. Char-based so a token with multibyte
/// UTF-8 cannot split a character at the cut.
pub fn token_prefix(token: &str) -> String {
    token.chars().take(10).collect()
}
