use axum::{
    Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use super::{ApiError, ApiResponse, ApiResult, AppState, ensure_valid_id};
use crate::{
    auth::AuthUser,
    models::{SubscribedChannel, Subscriber},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/c/{channel_id}",
            get(channel_subscribers).post(toggle_subscription),
        )
        .route("/u/{subscriber_id}", get(subscribed_channels))
}

#[derive(Debug, Serialize)]
struct SubscriptionStatus {
    subscribed: bool,
}

/// Validates `id` and checks that the user exists.
async fn existing_user(state: &AppState, id: &str, what: &str) -> ApiResult<()> {
    ensure_valid_id(id, what)?;
    if state.store.user_exists(id).await? {
        Ok(())
    } else {
        Err(ApiError::not_found(match what {
            "channel" => "Channel not found",
            _ => "User not found",
        }))
    }
}

async fn toggle_subscription(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<SubscriptionStatus>> {
    ensure_valid_id(&channel_id, "channel")?;
    if channel_id == user.id {
        return Err(ApiError::bad_request("You cannot subscribe to your own channel"));
    }
    existing_user(&state, &channel_id, "channel").await?;

    let subscribed = state
        .store
        .toggle_subscription(&user.id, &channel_id)
        .await?;
    tracing::debug!(subscriber = %user.id, channel = %channel_id, subscribed, "toggled subscription");
    let message = if subscribed {
        "Subscribed successfully"
    } else {
        "Unsubscribed successfully"
    };
    Ok(ApiResponse::ok(SubscriptionStatus { subscribed }, message))
}

async fn channel_subscribers(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<Subscriber>>> {
    existing_user(&state, &channel_id, "channel").await?;
    let subscribers = state.store.channel_subscribers(&channel_id).await?;
    Ok(ApiResponse::ok(subscribers, "Subscribers fetched successfully"))
}

async fn subscribed_channels(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(subscriber_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<SubscribedChannel>>> {
    existing_user(&state, &subscriber_id, "subscriber").await?;
    let channels = state.store.subscribed_channels(&subscriber_id).await?;
    Ok(ApiResponse::ok(
        channels,
        "Subscribed channels fetched successfully",
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::super::test_support::*;

    #[tokio::test]
    async fn subscribe_list_and_unsubscribe() {
        let app = TestApp::new().await;
        let quinn = app.user("quinn").await;
        let rosa = app.user("rosa").await;
        let video = app.video(&quinn, "welcome").await;
        let token = app.token(&rosa);
        let toggle = format!("/api/v1/subscriptions/c/{}", quinn.id);

        let (status, body) = app.call(Method::POST, &toggle, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["subscribed"], true);

        let (status, body) = app.get(&toggle, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["username"], "rosa");
        assert!(body["data"][0]["subscribedAt"].is_string());

        let (status, body) = app
            .get(&format!("/api/v1/subscriptions/u/{}", rosa.id), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["username"], "quinn");
        assert_eq!(body["data"][0]["latestVideo"]["id"], video.id.as_str());

        let (_, body) = app
            .get(&format!("/api/v1/users/channel/{}", quinn.username), Some(&token))
            .await;
        assert_eq!(body["data"]["subscribersCount"], 1);
        assert_eq!(body["data"]["isSubscribed"], true);

        let (_, body) = app.call(Method::POST, &toggle, Some(&token), None).await;
        assert_eq!(body["data"]["subscribed"], false);
        let (_, body) = app.get(&toggle, Some(&token)).await;
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn rejects_self_and_unknown_channels() {
        let app = TestApp::new().await;
        let quinn = app.user("quinn").await;
        let token = app.token(&quinn);

        let (status, _) = app
            .call(Method::POST, &format!("/api/v1/subscriptions/c/{}", quinn.id), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = format!("/api/v1/subscriptions/c/{}", crate::store::new_id());
        let (status, _) = app.call(Method::POST, &missing, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.get(&missing, Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .call(Method::POST, "/api/v1/subscriptions/c/zzz", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
