use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::post};
use chrono::Duration;

use healthybites_core::orders::{CreateOrderRequest, Order};

use crate::conversation::order_notice_key;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::locks::phone_key;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/orders", post(create_order))
}

/// Unclaimed "order received" notices lapse after this long.
fn notice_ttl() -> Duration {
    Duration::hours(24)
}

/// Order intake
///
/// Persists a Pending order and arms the "order received" notice shown on
/// the customer's next conversation turn.
#[utoipa::path(
    post,
    path = "/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = Order),
        (status = 400, description = "A required field is missing", body = healthybites_core::error::ApiError),
        (status = 429, description = "Too many requests", body = healthybites_core::error::ApiError)
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let phone = req
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("phone", "Missing required field: phone"))?
        .to_string();

    let _guard = state.locks.acquire(&phone_key(&phone)).await;
    let order = state.lifecycle.create_from_request(req).await?;
    state
        .kv
        .set(
            &order_notice_key(&order.phone),
            &order.id.to_string(),
            Some(notice_ttl()),
        )
        .await?;

    tracing::info!(phone = %order.phone, order_id = %order.id, "order received");
    Ok((StatusCode::CREATED, Json(order)))
}
