use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer};

use maildeck_core::api::ColumnResponse;
use maildeck_core::columns::{ColumnRepository, ColumnUpdate};

use crate::AppState;
use crate::api::error::ApiError;
use crate::auth::AuthUser;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/columns", get(list_columns).post(create_column))
        .route("/columns/initialize", post(initialize_columns))
        .route("/columns/{id}", axum::routing::patch(update_column).delete(delete_column))
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

async fn list_columns(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ColumnResponse>>, ApiError> {
    let repo = ColumnRepository::new(state.db.clone());
    let columns = repo.list_for_user(user_id).await?;
    Ok(Json(columns.iter().map(ColumnResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateColumnRequest {
    title: String,
    order_index: Option<i64>,
    label_token: Option<String>,
    color: Option<String>,
}

async fn create_column(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateColumnRequest>,
) -> Result<(StatusCode, Json<ColumnResponse>), ApiError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    if body.order_index.is_some_and(|index| index < 0) {
        return Err(ApiError::validation("orderIndex must not be negative"));
    }

    let repo = ColumnRepository::new(state.db.clone());
    let column = repo
        .create(user_id, title, body.order_index, body.label_token, body.color)
        .await?;
    Ok((StatusCode::CREATED, Json(ColumnResponse::from(&column))))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UpdateColumnRequest {
    title: Option<String>,
    order_index: Option<i64>,
    #[serde(deserialize_with = "double_option")]
    label_token: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    color: Option<Option<String>>,
}

async fn update_column(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateColumnRequest>,
) -> Result<Json<ColumnResponse>, ApiError> {
    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::validation("title must not be empty"));
    }
    if body.order_index.is_some_and(|index| index < 0) {
        return Err(ApiError::validation("orderIndex must not be negative"));
    }

    let repo = ColumnRepository::new(state.db.clone());
    let column = repo
        .update(
            user_id,
            id,
            ColumnUpdate {
                title: body.title.map(|t| t.trim().to_string()),
                order_index: body.order_index,
                label_token: body.label_token,
                color: body.color,
            },
        )
        .await?;
    Ok(Json(ColumnResponse::from(&column)))
}

async fn delete_column(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let repo = ColumnRepository::new(state.db.clone());
    repo.delete(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn initialize_columns(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ColumnResponse>>, ApiError> {
    let repo = ColumnRepository::new(state.db.clone());
    let columns = repo.seed_defaults(user_id).await?;
    Ok(Json(columns.iter().map(ColumnResponse::from).collect()))
}
