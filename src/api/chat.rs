use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use crate::chat::{ChatOutcome, ChatTurn};

use super::error::ApiError;
use super::routes::AppState;

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(turn): Json<ChatTurn>,
) -> Result<Json<ChatOutcome>, ApiError> {
    Ok(Json(state.chat.complete(turn).await?))
}
