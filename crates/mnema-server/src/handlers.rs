use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::AppState;

/// Open an MCP session stream. The first event is the handshake naming the
/// message endpoint (and thereby the session id); every subsequent event
/// carries one JSON-RPC response.
pub async fn open_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session_id, rx) = state.sessions.create().await;
    info!(%session_id, "sse session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages/?session_id={session_id}"));
    let stream = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(
        ReceiverStream::new(rx)
            .map(|payload| Ok(Event::default().event("message").data(payload))),
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

/// Inbound JSON-RPC frames. Responses are pushed onto the session's SSE
/// stream; the POST itself just acknowledges receipt.
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(tx) = state.sessions.sender(&query.session_id).await else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok());

    let Some(response) = state.service.handle(&body, host).await else {
        // Notification: accepted, nothing to push.
        return (StatusCode::ACCEPTED, "Accepted").into_response();
    };

    let payload = match serde_json::to_string(&response) {
        Ok(payload) => payload,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("encode error: {err}"),
            )
                .into_response();
        }
    };

    if tx.send(payload).await.is_err() {
        warn!(session_id = %query.session_id, "session stream closed; dropping response");
        state.sessions.remove(&query.session_id).await;
        return (StatusCode::NOT_FOUND, "session closed").into_response();
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "healthy",
        "service": "mnema-server",
        "open_sessions": state.sessions.len().await,
    }))
    .into_response()
}

#[derive(Debug, Deserialize, Default)]
pub struct GenerateTokenRequest {
    #[serde(default)]
    pub user_name: Option<String>,
}

/// Create a principal and its connection URL. The body is optional JSON.
pub async fn generate_token(State(state): State<AppState>, body: String) -> Response {
    let request: GenerateTokenRequest = serde_json::from_str(&body).unwrap_or_default();

    let issued = match state.tokens.issue(request.user_name.as_deref()).await {
        Ok(issued) => issued,
        Err(err) => {
            warn!(%err, "token issuance failed");
            return (StatusCode::SERVICE_UNAVAILABLE, "token store unavailable").into_response();
        }
    };
    let memories_used = state
        .store
        .count(&issued.user_id)
        .await
        .unwrap_or_default();

    let url = format!(
        "{}/sse?token={}",
        state.config.public_base_url.trim_end_matches('/'),
        issued.token
    );
    Json(json!({
        "token": issued.token,
        "user_id": issued.user_id,
        "url": url,
        "memory_limit": state.config.memory_quota,
        "memories_used": memories_used,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct JoinWaitlistRequest {
    pub email: String,
}

pub async fn join_waitlist(State(state): State<AppState>, body: String) -> Response {
    let Ok(request) = serde_json::from_str::<JoinWaitlistRequest>(&body) else {
        return (StatusCode::BAD_REQUEST, "'email' is required").into_response();
    };

    match state.tokens.waitlist_add(&request.email, None).await {
        Ok(()) => Json(json!({
            "message": "You're on the list. We'll be in touch.",
            "email": request.email.trim().to_lowercase(),
        }))
        .into_response(),
        Err(mnema_core::MnemaError::Validation(message)) => {
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        Err(err) => {
            warn!(%err, "waitlist insert failed");
            (StatusCode::SERVICE_UNAVAILABLE, "waitlist unavailable").into_response()
        }
    }
}
