//! HTTP endpoints: unary `/chat`, chunked `/chat/stream`, and the
//! streaming-capability probe.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use parley_core::errors::GENERIC_ERROR;
use parley_core::frames::{
    ChatErrorBody, ChatRequest, ChatResponse, StreamFrame, DATA_PREFIX, DONE_SENTINEL,
};
use parley_core::provider::{TokenEvent, TokenStream};

use crate::filter::ContentFilter;
use crate::history;
use crate::server::AppState;

pub const MAX_MESSAGE_CHARS: usize = 4000;

pub const STREAMING_SUPPORT_HEADER: &str = "x-streaming-support";

/// Why a request was rejected before reaching the provider.
pub(crate) enum Rejection {
    Empty,
    TooLong,
    Blocked(&'static str),
}

impl Rejection {
    pub(crate) fn user_message(&self) -> &'static str {
        match self {
            Self::Empty => "Message is required",
            Self::TooLong => "Message is too long. Please keep it under 4000 characters.",
            Self::Blocked(_) => "Content blocked by safety guidelines",
        }
    }

    fn body(&self) -> ChatErrorBody {
        let (reason, blocked) = match self {
            Self::Blocked(reason) => (Some((*reason).to_string()), Some(true)),
            _ => (None, None),
        };
        ChatErrorBody {
            error: self.user_message().to_string(),
            reason,
            blocked,
        }
    }

    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self.body())).into_response()
    }
}

/// Trim and validate an inbound message against length limits and the
/// content filter. Shared by the HTTP routes and the channel endpoint.
pub(crate) fn validate(message: &str, filter: &ContentFilter) -> Result<String, Rejection> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(Rejection::Empty);
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(Rejection::TooLong);
    }
    if let Some(reason) = filter.check(trimmed) {
        return Err(Rejection::Blocked(reason));
    }
    Ok(trimmed.to_string())
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let message = match validate(&req.message, &state.filter) {
        Ok(m) => m,
        Err(rejection) => return rejection.into_response(),
    };
    let shaped = history::shape_unary(&req.conversation_history);

    match state.provider.invoke(&message, &shaped).await {
        Ok(text) => {
            // The response passes through the same filter as the request.
            if state.filter.check(&text).is_some() {
                tracing::warn!(provider = state.provider.name(), "response tripped the filter");
                let body = ChatErrorBody {
                    error: "Response blocked by safety guidelines".to_string(),
                    reason: None,
                    blocked: Some(true),
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            Json(ChatResponse {
                response: text,
                timestamp: chrono::Utc::now().to_rfc3339(),
                session_id: req.session_id.unwrap_or_default(),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(kind = e.error_kind(), error = %e, "provider invocation failed");
            let body = ChatErrorBody {
                error: GENERIC_ERROR.to_string(),
                reason: None,
                blocked: None,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

pub async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let message = match validate(&req.message, &state.filter) {
        Ok(m) => m,
        Err(rejection) => return rejection.into_response(),
    };
    let shaped = history::shape_streaming(&req.conversation_history);

    let tokens = match state.provider.stream(&message, &shaped).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(kind = e.error_kind(), error = %e, "provider stream failed to open");
            let body = ChatErrorBody {
                error: GENERIC_ERROR.to_string(),
                reason: None,
                blocked: None,
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
    ];
    (headers, Body::from_stream(frame_stream(tokens))).into_response()
}

/// `HEAD /chat/stream`: capability probe for the chunked fallback.
pub async fn stream_probe_handler() -> Response {
    ([(STREAMING_SUPPORT_HEADER, "true")], StatusCode::OK).into_response()
}

fn data_line(payload: &str) -> Bytes {
    Bytes::from(format!("{DATA_PREFIX}{payload}\n\n"))
}

fn frame(frame: &StreamFrame) -> Bytes {
    data_line(&serde_json::to_string(frame).unwrap_or_default())
}

/// Frame provider tokens as event-stream data lines. The stream ends right
/// after the first terminal frame; a provider stream that runs dry without
/// one still gets a `[DONE]` so clients never hang.
fn frame_stream(
    tokens: TokenStream,
) -> impl Stream<Item = Result<Bytes, std::convert::Infallible>> + Send {
    futures::stream::unfold((tokens, false), |(mut tokens, done)| async move {
        if done {
            return None;
        }
        let (bytes, done) = match tokens.next().await {
            Some(TokenEvent::Delta(text)) => (frame(&StreamFrame::Text(text)), false),
            Some(TokenEvent::Error(error)) => (frame(&StreamFrame::Error(error)), true),
            Some(TokenEvent::Done) | None => (data_line(DONE_SENTINEL), true),
        };
        Some((Ok(bytes), (tokens, done)))
    })
}
