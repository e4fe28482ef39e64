use axum::extract::State;
use axum::{Json, Router, routing::post};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use healthybites_core::conversation::{InboundEvent, Outbound};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/messages", post(post_message))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessagesResponse {
    /// Replies in the order the transport should render them.
    pub messages: Vec<Outbound>,
}

/// Handle one inbound chat event
///
/// Runs a single conversation turn and returns the replies. Turn-level
/// failures are answered with an apology message, not an error status.
#[utoipa::path(
    post,
    path = "/v1/messages",
    request_body = InboundEvent,
    responses(
        (status = 200, description = "Replies for this turn", body = MessagesResponse),
        (status = 400, description = "Malformed event", body = healthybites_core::error::ApiError),
        (status = 429, description = "Too many requests", body = healthybites_core::error::ApiError)
    ),
    tag = "conversation"
)]
pub async fn post_message(
    State(state): State<AppState>,
    AppJson(event): AppJson<InboundEvent>,
) -> Result<Json<MessagesResponse>, AppError> {
    if event.conversation_id.trim().is_empty() {
        return Err(AppError::validation(
            "conversation_id",
            "conversation_id must not be empty",
        ));
    }
    let messages = state.engine.handle_event(&event).await;
    Ok(Json(MessagesResponse { messages }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::routes::testing::TestApp;

    #[tokio::test]
    async fn first_message_is_welcomed() {
        let app = TestApp::new();
        let (status, body) = app
            .post(
                "/v1/messages",
                json!({"conversation_id": "c-1", "text": "hi"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["type"], "text");
        assert_eq!(messages[0]["text"], "Welcome to HealthyBites Express!");
    }

    #[tokio::test]
    async fn blank_conversation_id_is_rejected() {
        let app = TestApp::new();
        let (status, body) = app
            .post("/v1/messages", json!({"conversation_id": "  ", "text": "hi"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "conversation_id");
    }

    #[tokio::test]
    async fn missing_conversation_id_names_the_field() {
        let app = TestApp::new();
        let (status, body) = app.post("/v1/messages", json!({"text": "hi"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "conversation_id");
    }
}
