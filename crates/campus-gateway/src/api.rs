use std::convert::Infallible;

use axum::Json;
use axum::extract::{FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use campus_agents::{AssistantRequest, IntelligentResponse, RequestContext, StreamEvent};
use campus_common::{ConversationId, Role, UserId};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::state::SharedState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// JSON error body returned by the API routes.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Caller identity as verified by the upstream authentication layer.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let user_id = header(USER_ID_HEADER).ok_or_else(|| {
            ApiError::new(StatusCode::UNAUTHORIZED, format!("missing {USER_ID_HEADER} header"))
        })?;
        let role = header(USER_ROLE_HEADER).ok_or_else(|| {
            ApiError::new(StatusCode::UNAUTHORIZED, format!("missing {USER_ROLE_HEADER} header"))
        })?;
        Ok(Self {
            user_id: UserId::from(user_id),
            role: Role::new(role),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub content: String,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub context: RequestContext,
}

impl ChatBody {
    /// The role always comes from the verified identity, never the body.
    fn into_request(self, identity: Identity) -> AssistantRequest {
        let mut context = self.context;
        context.role = identity.role;
        AssistantRequest {
            content: self.content,
            user_id: identity.user_id,
            conversation_id: self.conversation_id.unwrap_or_default(),
            context,
        }
    }
}

fn to_sse(event: StreamEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .json_data(event.payload())
        .unwrap_or_else(|_| Event::default().event("error").data("{}"))
}

/// POST /api/assistant/stream: one named SSE event per stream event.
pub async fn stream_chat(
    State(state): State<SharedState>,
    identity: Identity,
    Json(body): Json<ChatBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request = body.into_request(identity);
    info!(
        conversation = %request.conversation_id,
        role = %request.context.role,
        "streaming request accepted"
    );

    let buffer = state.config.streaming.channel_buffer.max(1);
    let (tx, rx) = mpsc::channel::<StreamEvent>(buffer);
    let runtime = state.runtime.clone();
    tokio::spawn(async move {
        let response = runtime.process_request_stream(request, tx).await;
        debug!(
            approach = %response.metadata.approach,
            elapsed_ms = response.metadata.execution_time_ms,
            "streaming request finished"
        );
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok(to_sse(event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /api/assistant/chat: the whole response as one JSON document.
pub async fn chat(
    State(state): State<SharedState>,
    identity: Identity,
    Json(body): Json<ChatBody>,
) -> Json<IntelligentResponse> {
    let request = body.into_request(identity);
    Json(state.runtime.process_request(request).await)
}

/// GET /api/tools/cache
pub async fn tool_cache_stats(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let runtime = &state.runtime;
    Json(serde_json::json!({
        "registry": runtime.registry().stats(),
        "intentCache": runtime.classifier().cache().len(),
        "promptCache": runtime.prompts().cache().stats(),
    }))
}

/// DELETE /api/tools/cache
pub async fn clear_tool_cache(State(state): State<SharedState>) -> Json<serde_json::Value> {
    state.runtime.registry().clear_cache();
    Json(serde_json::json!({ "cleared": true }))
}

/// POST /api/prompt-cache/invalidate
pub async fn invalidate_prompt_cache(
    State(state): State<SharedState>,
) -> Json<serde_json::Value> {
    let cache = state.runtime.prompts().cache();
    let dropped = cache.stats().prompts;
    cache.invalidate_all();
    info!(dropped, "prompt cache invalidated");
    Json(serde_json::json!({ "invalidated": dropped }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_role_overrides_body_role() {
        let body: ChatBody = serde_json::from_value(serde_json::json!({
            "content": "统计在职教师数量",
            "conversationId": "c9",
            "context": { "role": "admin", "currentRound": 1 }
        }))
        .unwrap();
        let request = body.into_request(Identity {
            user_id: UserId::from("u7"),
            role: Role::new("Teacher"),
        });
        assert_eq!(request.context.role, Role::new("teacher"));
        assert_eq!(request.conversation_id.as_str(), "c9");
        assert_eq!(request.user_id.as_str(), "u7");
        assert_eq!(request.context.current_round, 1);
    }

    #[test]
    fn missing_conversation_gets_fresh_id() {
        let body: ChatBody =
            serde_json::from_value(serde_json::json!({ "content": "你好" })).unwrap();
        let request = body.into_request(Identity {
            user_id: UserId::from("u1"),
            role: Role::new("parent"),
        });
        assert!(!request.conversation_id.as_str().is_empty());
    }
}
