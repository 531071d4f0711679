use axum::{
    Json, Router,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    routing::{get, patch, post},
};
use serde::Deserialize;

use super::{
    ApiError, ApiResponse, ApiResult, AppState, empty, ensure_owner, ensure_valid_id, required,
    videos::visible_video,
};
use crate::{
    auth::AuthUser,
    models::{PlaylistDetails, PlaylistRecord, PlaylistSummary, UserRecord},
    store::DUPLICATE_PLAYLIST,
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_playlist))
        .route("/user/{user_id}", get(user_playlists))
        .route("/add/{video_id}/{playlist_id}", patch(add_video))
        .route("/remove/{video_id}/{playlist_id}", patch(remove_video))
        .route(
            "/{playlist_id}",
            get(get_playlist).patch(update_playlist).delete(delete_playlist),
        )
}

#[derive(Debug, Deserialize)]
struct PlaylistBody {
    name: Option<String>,
    description: Option<String>,
}

async fn create_playlist(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<PlaylistBody>, JsonRejection>,
) -> ApiResult<ApiResponse<PlaylistRecord>> {
    let Json(body) = payload?;
    let name = required(body.name.as_deref(), "name")?;
    let description = body.description.as_deref().map(str::trim).unwrap_or_default();

    if state.store.playlist_name_taken(&user.id, &name, None).await? {
        return Err(ApiError::conflict(DUPLICATE_PLAYLIST));
    }
    let playlist = state
        .store
        .create_playlist(&user.id, &name, description)
        .await?;
    tracing::info!(playlist_id = %playlist.id, user = %user.username, "created playlist");
    Ok(ApiResponse::created(playlist, "Playlist created successfully"))
}

async fn user_playlists(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<PlaylistSummary>>> {
    ensure_valid_id(&user_id, "user")?;
    if !state.store.user_exists(&user_id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    let playlists = state.store.user_playlists(&user_id).await?;
    Ok(ApiResponse::ok(playlists, "Playlists fetched successfully"))
}

async fn get_playlist(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<PlaylistDetails>> {
    ensure_valid_id(&playlist_id, "playlist")?;
    let playlist = state
        .store
        .playlist_details(&playlist_id, Some(&user.id))
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    Ok(ApiResponse::ok(playlist, "Playlist fetched successfully"))
}

async fn owned_playlist(
    state: &AppState,
    playlist_id: &str,
    user: &UserRecord,
) -> ApiResult<PlaylistRecord> {
    ensure_valid_id(playlist_id, "playlist")?;
    let playlist = state
        .store
        .find_playlist(playlist_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    ensure_owner(&playlist.owner_id, user, "playlist")?;
    Ok(playlist)
}

async fn add_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let Path((video_id, playlist_id)) = path?;
    let playlist = owned_playlist(&state, &playlist_id, &user).await?;
    let video = visible_video(&state, &video_id, Some(&user.id)).await?;

    if !state
        .store
        .add_video_to_playlist(&playlist.id, &video.id)
        .await?
    {
        return Err(ApiError::conflict("Video is already in the playlist"));
    }
    Ok(ApiResponse::ok(empty(), "Video added to playlist"))
}

async fn remove_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let Path((video_id, playlist_id)) = path?;
    let playlist = owned_playlist(&state, &playlist_id, &user).await?;
    ensure_valid_id(&video_id, "video")?;

    if !state
        .store
        .remove_video_from_playlist(&playlist.id, &video_id)
        .await?
    {
        return Err(ApiError::not_found("Video is not in the playlist"));
    }
    Ok(ApiResponse::ok(empty(), "Video removed from playlist"))
}

async fn update_playlist(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(playlist_id): Path<String>,
    payload: Result<Json<PlaylistBody>, JsonRejection>,
) -> ApiResult<ApiResponse<PlaylistRecord>> {
    let Json(body) = payload?;
    let name = match body.name.as_deref() {
        Some(name) => Some(required(Some(name), "name")?),
        None => None,
    };
    let description = body.description.as_deref().map(str::trim);
    if name.is_none() && description.is_none() {
        return Err(ApiError::bad_request("name or description is required"));
    }

    let playlist = owned_playlist(&state, &playlist_id, &user).await?;
    if let Some(name) = name.as_deref()
        && state
            .store
            .playlist_name_taken(&user.id, name, Some(&playlist.id))
            .await?
    {
        return Err(ApiError::conflict(DUPLICATE_PLAYLIST));
    }

    let updated = state
        .store
        .update_playlist(&playlist.id, name.as_deref(), description)
        .await?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    Ok(ApiResponse::ok(updated, "Playlist updated successfully"))
}

async fn delete_playlist(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let playlist = owned_playlist(&state, &playlist_id, &user).await?;
    state.store.delete_playlist(&playlist.id).await?;
    tracing::info!(playlist_id = %playlist.id, "deleted playlist");
    Ok(ApiResponse::ok(empty(), "Playlist deleted successfully"))
}
