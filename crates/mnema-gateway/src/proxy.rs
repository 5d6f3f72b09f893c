use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use mnema_core::MnemaError;

use crate::auth::{extract_token, token_prefix};
use crate::inject::inject_user_token;
use crate::GatewayState;

/// Forwarded chunks buffered towards a slow client before backpressure.
const FORWARD_QUEUE_CAP: usize = 32;
/// Yield to the scheduler every this many forwarded chunks.
const YIELD_EVERY_CHUNKS: u64 = 10;
/// Give up scanning for a session id once this much handshake data passed.
const MAX_HANDSHAKE_SCAN_BYTES: usize = 64 * 1024;

/// A session binding: the principal captured when the handshake event for
/// this session id was first observed. First binder wins.
#[derive(Debug, Clone)]
pub struct BoundSession {
    pub user_id: String,
    pub token: String,
}

pub type SessionTable = Arc<DashMap<String, BoundSession>>;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET|POST /sse`: authenticate, then forward the upstream SSE stream
/// byte-for-byte while watching the handshake for the session id.
pub async fn open_stream(
    State(state): State<GatewayState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = extract_token(&headers, query.token.as_deref()) else {
        warn!("stream request without a token");
        return (StatusCode::UNAUTHORIZED, "token required").into_response();
    };

    let principal = match state.tokens.validate(&token).await {
        Ok(principal) => principal,
        Err(MnemaError::Unauthenticated) => {
            return (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response();
        }
        Err(err) => {
            error!(%err, "auth backend failure");
            return (StatusCode::SERVICE_UNAVAILABLE, "auth backend unavailable").into_response();
        }
    };
    info!(
        user_id = %principal.user_id,
        token = %token_prefix(&token),
        "stream session authenticated"
    );

    let upstream_url = format!("{}/sse", state.upstream.trim_end_matches('/'));
    let upstream = match state
        .client
        .get(&upstream_url)
        .header(header::ACCEPT, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            error!(status = %response.status(), "upstream rejected the stream");
            return (StatusCode::BAD_GATEWAY, "upstream error").into_response();
        }
        Err(err) => {
            error!(%err, "upstream connect failed");
            return (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response();
        }
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(FORWARD_QUEUE_CAP);
    let sessions = state.sessions.clone();
    let user_id = principal.user_id.clone();
    tokio::spawn(pump_stream(upstream, tx, sessions, user_id, token));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            // Keep reverse proxies from buffering the stream.
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// Forward upstream chunks untouched. Only the handshake is inspected:
/// complete events (up to the first `\n\n` boundaries) are scanned until a
/// `session_id=<hex>` shows up, then the binding is recorded and everything
/// after is pure passthrough.
async fn pump_stream(
    upstream: reqwest::Response,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    sessions: SessionTable,
    user_id: String,
    token: String,
) {
    let mut stream = upstream.bytes_stream();
    let mut handshake: Vec<u8> = Vec::new();
    let mut bound = false;
    let mut chunks: u64 = 0;

    while let Some(next) = stream.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(err) => {
                // Passthrough only: no synthetic frames. Dropping the sender
                // closes the client stream, which is the honest signal.
                warn!(%err, %user_id, "upstream stream error; closing client stream");
                return;
            }
        };

        if !bound {
            handshake.extend_from_slice(&chunk);
            match scan_for_session_id(&mut handshake) {
                Some(session_id) => {
                    bind_session(&sessions, &session_id, &user_id, &token);
                    bound = true;
                    handshake = Vec::new();
                }
                None if handshake.len() > MAX_HANDSHAKE_SCAN_BYTES => {
                    warn!(%user_id, "no session id within handshake window");
                    bound = true;
                    handshake = Vec::new();
                }
                None => {}
            }
        }

        if tx.send(Ok(chunk)).await.is_err() {
            debug!(%user_id, "client disconnected; stopping forward loop");
            return;
        }
        chunks += 1;
        if chunks % YIELD_EVERY_CHUNKS == 0 {
            tokio::task::yield_now().await;
        }
    }
}

/// Consume complete SSE events from `buffer`, returning the first session
/// id found. Incomplete trailing data stays in the buffer for the next
/// chunk.
fn scan_for_session_id(buffer: &mut Vec<u8>) -> Option<String> {
    loop {
        let boundary = find_subslice(buffer, b"\n\n")?;
        let event = buffer.drain(..boundary + 2).collect::<Vec<u8>>();
        if let Some(session_id) = session_id_in(&event) {
            return Some(session_id);
        }
    }
}

fn session_id_in(event: &[u8]) -> Option<String> {
    let start = find_subslice(event, b"session_id=")? + b"session_id=".len();
    let id: String = event[start..]
        .iter()
        .take_while(|byte| byte.is_ascii_hexdigit())
        .map(|byte| *byte as char)
        .collect();
    if id.is_empty() { None } else { Some(id) }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn bind_session(sessions: &SessionTable, session_id: &str, user_id: &str, token: &str) {
    if let Some(existing) = sessions.get(session_id) {
        if existing.user_id != user_id {
            warn!(
                session_id,
                bound_user = %existing.user_id,
                attempted_user = %user_id,
                "session fixation attempt, keeping first binding"
            );
        }
        return;
    }
    sessions.insert(
        session_id.to_string(),
        BoundSession {
            user_id: user_id.to_string(),
            token: token.to_string(),
        },
    );
    info!(session_id, user_id, "session bound");
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `POST /messages/?session_id=...`: authenticate via the session binding,
/// overwrite the `user_token` argument on tool calls, forward, relay.
pub async fn forward_message(
    State(state): State<GatewayState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id else {
        return (StatusCode::UNAUTHORIZED, "session_id required").into_response();
    };
    let Some(bound) = state
        .sessions
        .get(&session_id)
        .map(|entry| entry.value().clone())
    else {
        warn!(session_id, "message for unbound session rejected");
        return (StatusCode::UNAUTHORIZED, "no session binding").into_response();
    };

    let outbound = match inject_user_token(&body, &bound.token) {
        Some(rewritten) => {
            debug!(session_id, user_id = %bound.user_id, "token injected into tool call");
            rewritten
        }
        None => body.to_vec(),
    };

    let url = format!("{}/messages/", state.upstream.trim_end_matches('/'));
    // reqwest recomputes Content-Length from the (possibly rewritten) body.
    match state
        .client
        .post(&url)
        .query(&[("session_id", session_id.as_str())])
        .header(header::CONTENT_TYPE, "application/json")
        .body(outbound)
        .send()
        .await
    {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let bytes = response.bytes().await.unwrap_or_default();
            (status, bytes).into_response()
        }
        Err(err) => {
            error!(%err, "message forward failed");
            (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response()
        }
    }
}

pub async fn health() -> Response {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "mnema-gateway",
    }))
    .into_response()
}
