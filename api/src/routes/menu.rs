use axum::extract::State;
use axum::{Json, Router, routing::get};

use healthybites_core::menu::Menu;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/menu", get(get_menu))
}

/// Today's menu
#[utoipa::path(
    get,
    path = "/v1/menu",
    responses(
        (status = 200, description = "Lunch, dinner and extra items", body = Menu)
    ),
    tag = "menu"
)]
pub async fn get_menu(State(state): State<AppState>) -> Json<Menu> {
    Json(state.menu.as_ref().clone())
}
