//! Directory API Endpoints

use crate::api::{AppState, AuthenticatedSession};
use crate::config::DirectoryEntry;
use crate::errors::AuthError;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /api/users
pub async fn list_users(
    AuthenticatedSession(_session): AuthenticatedSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<DirectoryEntry>>, AuthError> {
    Ok(Json(state.directory.list_users().await?))
}

/// GET /api/users/{id}
pub async fn get_user(
    AuthenticatedSession(_session): AuthenticatedSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AuthError> {
    Ok(match state.directory.get_user(&id).await? {
        Some(user) => Json(user).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "not_found" })),
        )
            .into_response(),
    })
}
