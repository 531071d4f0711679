//! Account, session and channel-profile endpoints under `/api/v1/users`.

use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Multipart, Path, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::{HeaderMap, HeaderName, header},
    response::AppendHeaders,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use super::{
    ApiError, ApiResponse, ApiResult, AppState, empty, non_blank, required,
    upload::{MultipartForm, store_upload},
};
use crate::{
    auth::{
        ACCESS_COOKIE, AuthUser, REFRESH_COOKIE, TokenPair, cookie_value, expired_cookie,
        fingerprint, hash_password, session_cookie, verify_password,
    },
    media::{MediaKind, discard},
    models::{ChannelProfile, NewUser, PublicUser, UserRecord, WatchedVideo},
    store::{DUPLICATE_EMAIL, DUPLICATE_USER},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_access_token))
        .route("/current-user", get(current_user))
        .route("/change-password", post(change_password))
        .route("/update-profile", patch(update_profile))
        .route("/update-avatar", patch(update_avatar))
        .route("/update-cover", patch(update_cover_image))
        .route("/channel/{username}", get(channel_profile))
        .route("/history", get(watch_history))
}

type SessionCookies = AppendHeaders<[(HeaderName, String); 2]>;

fn session_cookies(state: &AppState, pair: &TokenPair) -> SessionCookies {
    AppendHeaders([
        (
            header::SET_COOKIE,
            session_cookie(
                ACCESS_COOKIE,
                &pair.access_token,
                state.tokens.access_ttl(),
                state.cookie_secure,
            ),
        ),
        (
            header::SET_COOKIE,
            session_cookie(
                REFRESH_COOKIE,
                &pair.refresh_token,
                state.tokens.refresh_ttl(),
                state.cookie_secure,
            ),
        ),
    ])
}

fn cleared_cookies(state: &AppState) -> SessionCookies {
    AppendHeaders([
        (header::SET_COOKIE, expired_cookie(ACCESS_COOKIE, state.cookie_secure)),
        (header::SET_COOKIE, expired_cookie(REFRESH_COOKIE, state.cookie_secure)),
    ])
}

async fn hash_in_background(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task")?
}

async fn verify_in_background(password: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task")
}

/// Issues a fresh token pair and makes its refresh token the only live one.
async fn start_session(state: &AppState, user: &UserRecord) -> ApiResult<TokenPair> {
    let pair = state.tokens.issue_pair(user)?;
    state
        .store
        .set_refresh_token_hash(&user.id, Some(&fingerprint(&pair.refresh_token)))
        .await?;
    Ok(pair)
}

async fn register(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let mut form = MultipartForm::read(multipart?).await?;
    let full_name = form.required("fullName")?;
    let username = form.required("username")?.to_lowercase();
    let email = form.required("email")?.to_lowercase();
    let password = form.required("password")?;
    if username.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ApiError::bad_request("username must not contain spaces or slashes"));
    }
    if !email.contains('@') {
        return Err(ApiError::bad_request("email is invalid"));
    }
    let avatar = form.require_file("avatar")?;
    let cover = form.take_file("coverImage");

    if state.store.username_or_email_taken(&username, &email).await? {
        return Err(ApiError::conflict(DUPLICATE_USER));
    }
    let password_hash = hash_in_background(password).await?;

    let avatar = store_upload(state.media.as_ref(), MediaKind::Avatar, "avatar", &avatar).await?;
    let cover = match cover {
        Some(cover) => {
            match store_upload(state.media.as_ref(), MediaKind::CoverImage, "coverImage", &cover)
                .await
            {
                Ok(stored) => Some(stored),
                Err(err) => {
                    discard(state.media.as_ref(), Some(&avatar.key)).await;
                    return Err(err);
                }
            }
        }
        None => None,
    };

    let new_user = NewUser {
        username,
        email,
        full_name,
        avatar: avatar.url.clone(),
        avatar_key: Some(avatar.key.clone()),
        cover_image: cover.as_ref().map(|cover| cover.url.clone()),
        cover_image_key: cover.as_ref().map(|cover| cover.key.clone()),
        password_hash,
    };
    let user = match state.store.create_user(&new_user).await {
        Ok(user) => user,
        Err(err) => {
            discard(state.media.as_ref(), Some(&avatar.key)).await;
            discard(state.media.as_ref(), cover.as_ref().map(|cover| cover.key.as_str())).await;
            return Err(err.into());
        }
    };

    tracing::info!(user_id = %user.id, username = %user.username, "registered user");
    Ok(ApiResponse::created(
        PublicUser::from(&user),
        "User registered successfully",
    ))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    user: PublicUser,
    access_token: String,
    refresh_token: String,
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<(SessionCookies, ApiResponse<LoginPayload>)> {
    let Json(request) = payload?;
    let password = required(request.password.as_deref(), "password")?;

    let user = if let Some(username) = non_blank(request.username.as_deref()) {
        state.store.find_user_by_username(&username).await?
    } else if let Some(email) = non_blank(request.email.as_deref()) {
        state.store.find_user_by_email(&email).await?
    } else {
        return Err(ApiError::bad_request("username or email is required"));
    };
    let user = user.ok_or_else(|| ApiError::not_found("User does not exist"))?;

    if !verify_in_background(password, user.password_hash.clone()).await? {
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let pair = start_session(&state, &user).await?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok((
        session_cookies(&state, &pair),
        ApiResponse::ok(
            LoginPayload {
                user: PublicUser::from(&user),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<(SessionCookies, ApiResponse<serde_json::Value>)> {
    state.store.set_refresh_token_hash(&user.id, None).await?;
    tracing::info!(user_id = %user.id, "user logged out");
    Ok((
        cleared_cookies(&state),
        ApiResponse::ok(empty(), "User logged out successfully"),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

/// Trades a refresh token for a new pair. The presented token stops working
/// as soon as this succeeds.
async fn refresh_access_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(SessionCookies, ApiResponse<TokenPair>)> {
    let from_body = || {
        serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|request| non_blank(request.refresh_token.as_deref()))
    };
    let token = cookie_value(&headers, REFRESH_COOKIE)
        .or_else(from_body)
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let claims = state
        .tokens
        .verify_refresh_token(&token)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;
    let user = state
        .store
        .find_user_by_id(&claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    let presented = fingerprint(&token);
    if user.refresh_token_hash.as_deref() != Some(presented.as_str()) {
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    let pair = state.tokens.issue_pair(&user)?;
    let rotated = state
        .store
        .rotate_refresh_token_hash(&user.id, &presented, &fingerprint(&pair.refresh_token))
        .await?;
    if !rotated {
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    tracing::debug!(user_id = %user.id, "rotated refresh token");
    Ok((
        session_cookies(&state, &pair),
        ApiResponse::ok(pair, "Access token refreshed"),
    ))
}

async fn current_user(AuthUser(user): AuthUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(PublicUser::from(&user), "Current user fetched successfully")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    old_password: Option<String>,
    new_password: Option<String>,
}

async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let Json(request) = payload?;
    let old_password = required(request.old_password.as_deref(), "oldPassword")?;
    let new_password = required(request.new_password.as_deref(), "newPassword")?;

    if !verify_in_background(old_password, user.password_hash.clone()).await? {
        return Err(ApiError::bad_request("Invalid old password"));
    }

    let hash = hash_in_background(new_password).await?;
    state.store.update_password_hash(&user.id, &hash).await?;
    tracing::info!(user_id = %user.id, "password changed");
    Ok(ApiResponse::ok(empty(), "Password changed successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    full_name: Option<String>,
    email: Option<String>,
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let Json(request) = payload?;
    let full_name = non_blank(request.full_name.as_deref());
    let email = non_blank(request.email.as_deref()).map(|email| email.to_lowercase());
    if full_name.is_none() && email.is_none() {
        return Err(ApiError::bad_request("fullName or email is required"));
    }
    if let Some(email) = &email {
        if !email.contains('@') {
            return Err(ApiError::bad_request("email is invalid"));
        }
        if state.store.email_taken_by_other(email, &user.id).await? {
            return Err(ApiError::conflict(DUPLICATE_EMAIL));
        }
    }

    let updated = state
        .store
        .update_profile(&user.id, full_name.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;
    Ok(ApiResponse::ok(
        PublicUser::from(&updated),
        "Account details updated successfully",
    ))
}

/// Shared body of the avatar and cover-image endpoints.
async fn replace_image(
    state: &AppState,
    user: &UserRecord,
    multipart: Multipart,
    field: &str,
    kind: MediaKind,
) -> ApiResult<PublicUser> {
    let mut form = MultipartForm::read(multipart).await?;
    let file = form.require_file(field)?;
    let stored = store_upload(state.media.as_ref(), kind, field, &file).await?;

    let replaced = match kind {
        MediaKind::CoverImage => {
            state
                .store
                .replace_cover_image(&user.id, &stored.url, &stored.key)
                .await
        }
        _ => state.store.replace_avatar(&user.id, &stored.url, &stored.key).await,
    };
    let previous = match replaced {
        Ok(previous) => previous,
        Err(err) => {
            discard(state.media.as_ref(), Some(&stored.key)).await;
            return Err(err.into());
        }
    };
    discard(state.media.as_ref(), previous.as_deref()).await;

    let updated = state
        .store
        .find_user_by_id(&user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;
    Ok(PublicUser::from(&updated))
}

async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let updated = replace_image(&state, &user, multipart?, "avatar", MediaKind::Avatar).await?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let updated =
        replace_image(&state, &user, multipart?, "coverImage", MediaKind::CoverImage).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

async fn channel_profile(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<ChannelProfile>> {
    let username = required(Some(username.as_str()), "username")?;
    let profile = state
        .store
        .channel_profile(&username, Some(&viewer.id))
        .await?
        .ok_or_else(|| ApiError::not_found("Channel does not exist"))?;
    Ok(ApiResponse::ok(profile, "User channel fetched successfully"))
}

async fn watch_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<ApiResponse<Vec<WatchedVideo>>> {
    let history = state.store.watch_history(&user.id).await?;
    Ok(ApiResponse::ok(history, "Watch history fetched successfully"))
}
