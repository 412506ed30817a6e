use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::{Database, Feed, Follow};
use crate::store::StoreError;

const DEFAULT_POSTS_LIMIT: i64 = 5;
const MAX_POSTS_LIMIT: i64 = 100;

pub struct AppState {
    pub db: Arc<Database>,
}

// Custom error type
#[derive(Debug)]
pub enum AppError {
    Unauthorized(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl AppError {
    /// Maps a unique-constraint failure to 409 with `message`.
    fn from_store(err: StoreError, message: &str) -> Self {
        match err {
            StoreError::Conflict => AppError::Conflict(message.to_string()),
            other => other.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(err) => {
                error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/readiness", get(readiness))
        .route("/err", get(err))
        .route("/users", post(create_user).get(get_user))
        .route("/feeds", post(create_feed).get(get_feeds))
        .route("/follows", post(create_follow).get(get_follows))
        .route("/follows/:id", delete(delete_follow))
        .route("/posts", get(get_posts));

    Router::new()
        .nest("/v1", v1)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Route handlers
pub async fn readiness() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn err() -> Result<Json<()>, AppError> {
    Err(AppError::Internal(anyhow::anyhow!("requested error")))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }

    let user = state.db.create_user(name).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(user)
}

#[derive(Debug, Deserialize)]
pub struct CreateFeedRequest {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct FeedCreated {
    pub feed: Feed,
    pub follow: Follow,
}

pub async fn create_feed(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreateFeedRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = request.name.trim();
    let url = request.url.trim();
    if name.is_empty() || url.is_empty() {
        return Err(AppError::BadRequest(
            "name and url must not be empty".to_string(),
        ));
    }
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => {
            return Err(AppError::BadRequest(format!(
                "'{}' is not an http(s) url",
                url
            )))
        }
    }

    let (feed, follow) = state
        .db
        .create_feed_with_follow(user.id, name, url)
        .await
        .map_err(|e| AppError::from_store(e, "a feed with this url already exists"))?;

    Ok((StatusCode::CREATED, Json(FeedCreated { feed, follow })))
}

pub async fn get_feeds(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let feeds = state.db.get_feeds().await?;
    Ok(Json(feeds))
}

#[derive(Debug, Deserialize)]
pub struct CreateFollowRequest {
    pub feed_id: Uuid,
}

pub async fn create_follow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreateFollowRequest>,
) -> Result<impl IntoResponse, AppError> {
    let feed = state
        .db
        .get_feed(request.feed_id)
        .await?
        .ok_or_else(|| AppError::NotFound("feed not found".to_string()))?;

    let follow = state
        .db
        .create_follow(user.id, feed.id)
        .await
        .map_err(|e| AppError::from_store(e, "already following this feed"))?;

    Ok((StatusCode::CREATED, Json(follow)))
}

pub async fn get_follows(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let follows = state.db.get_follows(user.id).await?;
    Ok(Json(follows))
}

pub async fn delete_follow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(follow_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.db.delete_follow(follow_id, user.id).await? {
        return Err(AppError::NotFound("follow not found".to_string()));
    }
    Ok(Json(json!({ "deleted": follow_id })))
}

#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    #[serde(default = "default_posts_limit")]
    pub limit: i64,
}

fn default_posts_limit() -> i64 {
    DEFAULT_POSTS_LIMIT
}

pub async fn get_posts(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<PostsQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.limit < 1 {
        return Err(AppError::BadRequest(
            "limit must be a positive number".to_string(),
        ));
    }

    let limit = query.limit.min(MAX_POSTS_LIMIT);
    let posts = state.db.get_posts_for_user(user.id, limit).await?;
    Ok(Json(posts))
}
