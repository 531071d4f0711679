use axum::{
    Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;

use super::{ApiError, ApiResponse, ApiResult, AppState, ensure_valid_id, videos::visible_video};
use crate::{
    auth::AuthUser,
    models::{LikeTarget, LikedVideo, UserRecord},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/toggle/v/{video_id}", post(toggle_video_like))
        .route("/toggle/c/{comment_id}", post(toggle_comment_like))
        .route("/toggle/t/{tweet_id}", post(toggle_tweet_like))
        .route("/videos", get(liked_videos))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LikeStatus {
    is_liked: bool,
}

async fn toggle(
    state: &AppState,
    target: LikeTarget,
    id: &str,
    user: &UserRecord,
) -> ApiResult<ApiResponse<LikeStatus>> {
    let label = target.label();
    match target {
        // Drafts cannot be liked by anyone but their owner.
        LikeTarget::Video => {
            visible_video(state, id, Some(&user.id)).await?;
        }
        // Comments follow the visibility of the video they sit under.
        LikeTarget::Comment => {
            ensure_valid_id(id, label)?;
            let comment = state
                .store
                .find_comment(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Comment not found"))?;
            visible_video(state, &comment.video_id, Some(&user.id)).await?;
        }
        LikeTarget::Tweet => {
            ensure_valid_id(id, label)?;
            if !state.store.like_target_exists(target, id).await? {
                return Err(ApiError::not_found("Tweet not found"));
            }
        }
    }

    let is_liked = state.store.toggle_like(target, id, &user.id).await?;
    let message = if is_liked {
        format!("Liked {label}")
    } else {
        format!("Removed like from {label}")
    };
    Ok(ApiResponse::ok(LikeStatus { is_liked }, message))
}

async fn toggle_video_like(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<LikeStatus>> {
    toggle(&state, LikeTarget::Video, &video_id, &user).await
}

async fn toggle_comment_like(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(comment_id): Path<String>,
) -> ApiResult<ApiResponse<LikeStatus>> {
    toggle(&state, LikeTarget::Comment, &comment_id, &user).await
}

async fn toggle_tweet_like(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(tweet_id): Path<String>,
) -> ApiResult<ApiResponse<LikeStatus>> {
    toggle(&state, LikeTarget::Tweet, &tweet_id, &user).await
}

async fn liked_videos(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<ApiResponse<Vec<LikedVideo>>> {
    let videos = state.store.liked_videos(&user.id).await?;
    Ok(ApiResponse::ok(videos, "Liked videos fetched successfully"))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::super::test_support::*;

    #[tokio::test]
    async fn toggling_a_video_like_flips_state() {
        let app = TestApp::new().await;
        let kim = app.user("kim").await;
        let leo = app.user("leo").await;
        let video = app.video(&kim, "cats").await;
        let token = app.token(&leo);
        let uri = format!("/api/v1/likes/toggle/v/{}", video.id);

        let (status, body) = app.call(Method::POST, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isLiked"], true);

        let (_, body) = app.get("/api/v1/likes/videos", Some(&token)).await;
        assert_eq!(body["data"][0]["id"], video.id.as_str());
        assert_eq!(body["data"][0]["owner"]["username"], "kim");
        assert!(body["data"][0]["likedAt"].is_string());

        let (status, body) = app.call(Method::POST, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isLiked"], false);

        let (_, body) = app.get("/api/v1/likes/videos", Some(&token)).await;
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn comment_and_tweet_likes_show_in_counts() {
        let app = TestApp::new().await;
        let kim = app.user("kim").await;
        let leo = app.user("leo").await;
        let video = app.video(&kim, "cats").await;
        let comment = app
            .state
            .store
            .create_comment(&video.id, &kim.id, "first")
            .await
            .unwrap();
        let tweet = app.state.store.create_tweet(&kim.id, "hello").await.unwrap();
        let token = app.token(&leo);

        let (status, body) = app
            .call(Method::POST, &format!("/api/v1/likes/toggle/c/{}", comment.id), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isLiked"], true);
        let (status, _) = app
            .call(Method::POST, &format!("/api/v1/likes/toggle/t/{}", tweet.id), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = app
            .get(&format!("/api/v1/comments/{}", video.id), Some(&token))
            .await;
        assert_eq!(body["data"]["docs"][0]["totalLikes"], 1);
        assert_eq!(body["data"]["docs"][0]["isLiked"], true);

        let (_, body) = app
            .get(&format!("/api/v1/tweets/user/{}", kim.id), None)
            .await;
        assert_eq!(body["data"][0]["totalLikes"], 1);
        assert_eq!(body["data"][0]["isLiked"], false);
    }

    #[tokio::test]
    async fn comments_under_a_draft_are_hidden_from_others() {
        let app = TestApp::new().await;
        let ivy = app.user("ivy").await;
        let jack = app.user("jack").await;
        let video = app.video(&ivy, "work in progress").await;
        let comment = app
            .state
            .store
            .create_comment(&video.id, &ivy.id, "note to self")
            .await
            .unwrap();
        app.state.store.toggle_publish(&video.id).await.unwrap();
        let uri = format!("/api/v1/likes/toggle/c/{}", comment.id);

        let (status, body) = app
            .call(Method::POST, &uri, Some(&app.token(&jack)), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, body) = app
            .call(Method::POST, &uri, Some(&app.token(&ivy)), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isLiked"], true);
    }

    #[tokio::test]
    async fn rejects_bad_targets() {
        let app = TestApp::new().await;
        let leo = app.user("leo").await;
        let token = app.token(&leo);

        let (status, _) = app
            .call(Method::POST, "/api/v1/likes/toggle/t/not-an-id", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = crate::store::new_id();
        let (status, _) = app
            .call(Method::POST, &format!("/api/v1/likes/toggle/c/{missing}"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .call(Method::POST, &format!("/api/v1/likes/toggle/v/{missing}"), None, None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
