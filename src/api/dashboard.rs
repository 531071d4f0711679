use axum::{Router, extract::State, routing::get};

use super::{ApiResponse, ApiResult, AppState};
use crate::{
    auth::AuthUser,
    models::{ChannelStats, VideoView},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(channel_stats))
        .route("/videos", get(channel_videos))
}

async fn channel_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<ApiResponse<ChannelStats>> {
    let stats = state.store.channel_stats(&user.id).await?;
    Ok(ApiResponse::ok(stats, "Channel stats fetched successfully"))
}

async fn channel_videos(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<ApiResponse<Vec<VideoView>>> {
    let videos = state.store.channel_videos(&user.id).await?;
    Ok(ApiResponse::ok(videos, "Channel videos fetched successfully"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::super::test_support::*;
    use crate::models::LikeTarget;

    #[tokio::test]
    async fn stats_and_videos_for_the_caller() {
        let app = TestApp::new().await;
        let sam = app.user("sam").await;
        let tia = app.user("tia").await;
        let store = &app.state.store;

        let public = app.video(&sam, "public").await;
        let draft = app.video(&sam, "draft").await;
        store.toggle_publish(&draft.id).await.unwrap();
        store.increment_views(&public.id).await.unwrap();
        store.toggle_like(LikeTarget::Video, &public.id, &tia.id).await.unwrap();
        store.toggle_subscription(&tia.id, &sam.id).await.unwrap();
        store.create_tweet(&sam.id, "hi").await.unwrap();

        let token = app.token(&sam);
        let (status, body) = app.get("/api/v1/dashboard/stats", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["totalSubscribers"], 1);
        assert_eq!(body["data"]["totalVideos"], 2);
        assert_eq!(body["data"]["totalViews"], 1);
        assert_eq!(body["data"]["totalLikes"], 1);
        assert_eq!(body["data"]["totalTweets"], 1);

        let (status, body) = app.get("/api/v1/dashboard/videos", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        let videos = body["data"].as_array().unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0]["title"], "draft");
        assert_eq!(videos[0]["isPublished"], false);
        assert_eq!(videos[1]["totalLikes"], 1);
    }

    #[tokio::test]
    async fn dashboard_requires_a_session() {
        let app = TestApp::new().await;
        let (status, _) = app.get("/api/v1/dashboard/stats", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
