use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    routing::{get, patch},
};

use super::{
    ApiError, ApiResponse, ApiResult, AppState, ContentBody, PageQuery, empty, ensure_owner,
    ensure_valid_id, required, videos::visible_video,
};
use crate::{
    auth::{AuthUser, Viewer},
    models::{CommentRecord, CommentView, Paginated, UserRecord},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/{video_id}", get(video_comments).post(add_comment))
        .route("/c/{comment_id}", patch(update_comment).delete(delete_comment))
}

async fn video_comments(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(video_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<ApiResponse<Paginated<CommentView>>> {
    let Query(query) = query?;
    let video = visible_video(&state, &video_id, viewer.id()).await?;
    let page = query.page();
    let (comments, total) = state
        .store
        .video_comments(&video.id, viewer.id(), page)
        .await?;
    Ok(ApiResponse::ok(
        Paginated::new(comments, total, page),
        "Comments fetched successfully",
    ))
}

async fn add_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(video_id): Path<String>,
    payload: Result<Json<ContentBody>, JsonRejection>,
) -> ApiResult<ApiResponse<CommentRecord>> {
    let Json(body) = payload?;
    let content = required(body.content.as_deref(), "content")?;
    let video = visible_video(&state, &video_id, Some(&user.id)).await?;
    let comment = state
        .store
        .create_comment(&video.id, &user.id, &content)
        .await?;
    tracing::info!(comment_id = %comment.id, video_id = %video.id, "added comment");
    Ok(ApiResponse::created(comment, "Comment added successfully"))
}

async fn owned_comment(
    state: &AppState,
    comment_id: &str,
    user: &UserRecord,
) -> ApiResult<CommentRecord> {
    ensure_valid_id(comment_id, "comment")?;
    let comment = state
        .store
        .find_comment(comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    ensure_owner(&comment.owner_id, user, "comment")?;
    Ok(comment)
}

async fn update_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(comment_id): Path<String>,
    payload: Result<Json<ContentBody>, JsonRejection>,
) -> ApiResult<ApiResponse<CommentRecord>> {
    let Json(body) = payload?;
    let content = required(body.content.as_deref(), "content")?;
    let comment = owned_comment(&state, &comment_id, &user).await?;
    let updated = state
        .store
        .update_comment(&comment.id, &content)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    Ok(ApiResponse::ok(updated, "Comment updated successfully"))
}

async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(comment_id): Path<String>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let comment = owned_comment(&state, &comment_id, &user).await?;
    state.store.delete_comment(&comment.id).await?;
    tracing::info!(comment_id = %comment.id, "deleted comment");
    Ok(ApiResponse::ok(empty(), "Comment deleted successfully"))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use super::super::test_support::*;

    #[tokio::test]
    async fn comment_lifecycle() {
        let app = TestApp::new().await;
        let ivy = app.user("ivy").await;
        let jack = app.user("jack").await;
        let video = app.video(&ivy, "intro").await;
        let uri = format!("/api/v1/comments/{}", video.id);

        let (status, body) = app
            .call(Method::POST, &uri, Some(&app.token(&jack)), Some(json!({"content": "Nice!"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let comment_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .call(Method::POST, &uri, Some(&app.token(&jack)), Some(json!({"content": "  "})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app.get(&format!("{uri}?page=1&limit=5"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["totalDocs"], 1);
        assert_eq!(body["data"]["docs"][0]["content"], "Nice!");
        assert_eq!(body["data"]["docs"][0]["owner"]["username"], "jack");

        let edit = format!("/api/v1/comments/c/{comment_id}");
        let (status, _) = app
            .call(Method::PATCH, &edit, Some(&app.token(&ivy)), Some(json!({"content": "mine now"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = app
            .call(Method::PATCH, &edit, Some(&app.token(&jack)), Some(json!({"content": "Very nice!"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["content"], "Very nice!");

        let (status, _) = app
            .call(Method::DELETE, &edit, Some(&app.token(&ivy)), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app
            .call(Method::DELETE, &edit, Some(&app.token(&jack)), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .call(Method::DELETE, &edit, Some(&app.token(&jack)), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app.get(&uri, None).await;
        assert_eq!(body["data"]["docs"], json!([]));
    }

    #[tokio::test]
    async fn comments_on_missing_or_hidden_videos_are_404() {
        let app = TestApp::new().await;
        let ivy = app.user("ivy").await;
        let jack = app.user("jack").await;
        let missing = format!("/api/v1/comments/{}", crate::store::new_id());
        let (status, _) = app.get(&missing, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .call(Method::POST, &missing, Some(&app.token(&jack)), Some(json!({"content": "hi"})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let draft = app.video(&ivy, "draft").await;
        app.state.store.toggle_publish(&draft.id).await.unwrap();
        let uri = format!("/api/v1/comments/{}", draft.id);
        let (status, _) = app.get(&uri, Some(&app.token(&jack))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.get(&uri, Some(&app.token(&ivy))).await;
        assert_eq!(status, StatusCode::OK);
    }
}
