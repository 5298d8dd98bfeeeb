//! Wire schemas for the HTTP surface.

use agent_relay_core::{Message, ProtocolEvent, context::DEFAULT_MAX_TOKENS};
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// Body of `POST /chat/completions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

const fn default_stream() -> bool {
    true
}

const fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsResponse {
    pub agents: Vec<String>,
}

/// Error body for non-streaming failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Serialize)]
struct ContentPayload<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
    kind: &'a str,
}

#[derive(Serialize)]
struct CompletionPayload {
    status: &'static str,
    total_chars: usize,
}

/// Map a relay event onto a server-sent event.
#[must_use]
pub fn sse_event(event: &ProtocolEvent) -> Event {
    match event {
        ProtocolEvent::DebugNote { text } => Event::default().event("debug").data(text),
        ProtocolEvent::ContentChunk { text } => {
            Event::default().data(json(&ContentPayload { content: text }))
        }
        ProtocolEvent::NewMessageBoundary { text } => Event::default()
            .event("new_message")
            .data(json(&ContentPayload { content: text })),
        ProtocolEvent::Error { kind, detail } => Event::default().event("error").data(json(
            &ErrorPayload {
                error: detail,
                kind: kind.label(),
            },
        )),
        ProtocolEvent::Completion { total_chars } => {
            Event::default()
                .event("completion")
                .data(json(&CompletionPayload {
                    status: "complete",
                    total_chars: *total_chars,
                }))
        }
    }
}

fn json<T: Serialize>(value: &T) -> String {
    // Plain structs of strings and integers always serialize.
    serde_json::to_string(value).unwrap_or_default()
}
