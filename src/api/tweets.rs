use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::{get, patch, post},
};

use super::{
    ApiError, ApiResponse, ApiResult, AppState, ContentBody, empty, ensure_owner,
    ensure_valid_id, required,
};
use crate::{
    auth::{AuthUser, Viewer},
    models::{TweetRecord, TweetView, UserRecord},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_tweet))
        .route("/user/{user_id}", get(user_tweets))
        .route("/{tweet_id}", patch(update_tweet).delete(delete_tweet))
}

async fn create_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ContentBody>, JsonRejection>,
) -> ApiResult<ApiResponse<TweetRecord>> {
    let Json(body) = payload?;
    let content = required(body.content.as_deref(), "content")?;
    let tweet = state.store.create_tweet(&user.id, &content).await?;
    tracing::info!(tweet_id = %tweet.id, user = %user.username, "posted tweet");
    Ok(ApiResponse::created(tweet, "Tweet created successfully"))
}

async fn user_tweets(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(user_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<TweetView>>> {
    ensure_valid_id(&user_id, "user")?;
    if !state.store.user_exists(&user_id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    let tweets = state.store.user_tweets(&user_id, viewer.id()).await?;
    Ok(ApiResponse::ok(tweets, "Tweets fetched successfully"))
}

async fn owned_tweet(state: &AppState, tweet_id: &str, user: &UserRecord) -> ApiResult<TweetRecord> {
    ensure_valid_id(tweet_id, "tweet")?;
    let tweet = state
        .store
        .find_tweet(tweet_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
    ensure_owner(&tweet.owner_id, user, "tweet")?;
    Ok(tweet)
}

async fn update_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(tweet_id): Path<String>,
    payload: Result<Json<ContentBody>, JsonRejection>,
) -> ApiResult<ApiResponse<TweetRecord>> {
    let Json(body) = payload?;
    let content = required(body.content.as_deref(), "content")?;
    let tweet = owned_tweet(&state, &tweet_id, &user).await?;
    let updated = state
        .store
        .update_tweet(&tweet.id, &content)
        .await?
        .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
    Ok(ApiResponse::ok(updated, "Tweet updated successfully"))
}

async fn delete_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(tweet_id): Path<String>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let tweet = owned_tweet(&state, &tweet_id, &user).await?;
    state.store.delete_tweet(&tweet.id).await?;
    tracing::info!(tweet_id = %tweet.id, "deleted tweet");
    Ok(ApiResponse::ok(empty(), "Tweet deleted successfully"))
}
