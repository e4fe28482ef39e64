use axum::extract::{Path, State};
use axum::{Json, Router, routing::get, routing::post};

use healthybites_core::profile::{
    DefaultOrderRequest, MealType, SubscriptionStatusResponse, SubscriptionUpdateRequest,
    UserProfile,
};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::locks::phone_key;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/profiles/{phone}", get(get_subscription_status))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/subscriptions", post(update_subscription))
        .route("/v1/default-orders", post(save_default_order))
}

async fn load_profile(state: &AppState, phone: &str) -> Result<UserProfile, AppError> {
    state
        .store
        .get_profile(phone)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: "profile",
            id: phone.to_string(),
        })
}

/// Set a subscription tier
///
/// The subscription runs for 30 days from the time of this call.
#[utoipa::path(
    post,
    path = "/v1/subscriptions",
    request_body = SubscriptionUpdateRequest,
    responses(
        (status = 200, description = "Subscription updated", body = SubscriptionStatusResponse),
        (status = 400, description = "Unknown tier", body = healthybites_core::error::ApiError),
        (status = 404, description = "No profile for this phone", body = healthybites_core::error::ApiError)
    ),
    tag = "profiles"
)]
pub async fn update_subscription(
    State(state): State<AppState>,
    AppJson(req): AppJson<SubscriptionUpdateRequest>,
) -> Result<Json<SubscriptionStatusResponse>, AppError> {
    let phone = req.phone.trim();
    let _guard = state.locks.acquire(&phone_key(phone)).await;
    let mut profile = load_profile(&state, phone).await?;
    profile.subscribe(req.tier, state.clock.now());
    state.store.update_profile(&profile).await?;

    tracing::info!(phone = %phone, tier = req.tier.as_str(), "subscription updated");
    Ok(Json(SubscriptionStatusResponse::from(&profile)))
}

/// Save the default order for a meal
///
/// Subscription auto-orders use these items.
#[utoipa::path(
    post,
    path = "/v1/default-orders",
    request_body = DefaultOrderRequest,
    responses(
        (status = 200, description = "Default order saved", body = UserProfile),
        (status = 400, description = "mealType is not lunch or dinner", body = healthybites_core::error::ApiError),
        (status = 404, description = "No profile for this phone", body = healthybites_core::error::ApiError)
    ),
    tag = "profiles"
)]
pub async fn save_default_order(
    State(state): State<AppState>,
    AppJson(req): AppJson<DefaultOrderRequest>,
) -> Result<Json<UserProfile>, AppError> {
    let meal = MealType::parse(&req.meal_type).ok_or_else(|| AppError::Validation {
        message: "Invalid meal type. Must be 'lunch' or 'dinner'.".to_string(),
        field: Some("mealType".to_string()),
        received: Some(serde_json::Value::String(req.meal_type.clone())),
        docs_hint: None,
    })?;

    let phone = req.phone.trim();
    let _guard = state.locks.acquire(&phone_key(phone)).await;
    let mut profile = load_profile(&state, phone).await?;
    profile.set_default_items(meal, req.items);
    state.store.update_profile(&profile).await?;

    tracing::info!(phone = %phone, meal = meal.as_str(), "default order saved");
    Ok(Json(profile))
}

/// Subscription status for a phone
#[utoipa::path(
    get,
    path = "/v1/profiles/{phone}",
    params(("phone" = String, Path, description = "10-digit phone number")),
    responses(
        (status = 200, description = "Subscription status", body = SubscriptionStatusResponse),
        (status = 404, description = "No profile for this phone", body = healthybites_core::error::ApiError)
    ),
    tag = "profiles"
)]
pub async fn get_subscription_status(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> Result<Json<SubscriptionStatusResponse>, AppError> {
    let profile = load_profile(&state, phone.trim()).await?;
    Ok(Json(SubscriptionStatusResponse::from(&profile)))
}
