use axum::{
    Router,
    extract::{
        Multipart, Path, Query, State,
        multipart::MultipartRejection,
        rejection::{PathRejection, QueryRejection},
    },
    routing::{get, patch},
};
use serde::Deserialize;

use super::{
    ApiError, ApiResponse, ApiResult, AppState, empty, ensure_valid_id,
    upload::{MultipartForm, store_upload},
};
use crate::{
    auth::{AuthUser, Viewer},
    media::{MediaKind, discard},
    models::{NewVideo, Page, Paginated, VideoRecord, VideoView},
    store::{VideoQuery, VideoSort},
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_videos).post(publish_video))
        .route(
            "/{video_id}",
            get(get_video).patch(update_video).delete(delete_video),
        )
        .route("/toggle/publish/{video_id}", patch(toggle_publish))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVideosQuery {
    page: Option<u32>,
    limit: Option<u32>,
    query: Option<String>,
    sort_by: Option<String>,
    sort_type: Option<String>,
    user_id: Option<String>,
}

impl ListVideosQuery {
    fn into_video_query(self, viewer_id: Option<&str>) -> ApiResult<VideoQuery> {
        let sort = match self.sort_by.as_deref().map(str::trim) {
            None | Some("") => VideoSort::default(),
            Some(value) => VideoSort::parse(value)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid sortBy {value:?}")))?,
        };
        let ascending = match self.sort_type.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(value) if value.eq_ignore_ascii_case("asc") => true,
            Some(value) if value.eq_ignore_ascii_case("desc") => false,
            Some(value) => {
                return Err(ApiError::bad_request(format!("Invalid sortType {value:?}")));
            }
        };
        let owner_id = match self.user_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(id) => {
                ensure_valid_id(id, "user")?;
                Some(id.to_string())
            }
        };
        // Owners browsing their own channel also see their drafts.
        let include_unpublished_of = owner_id
            .as_deref()
            .filter(|owner| Some(*owner) == viewer_id)
            .map(str::to_string);

        Ok(VideoQuery {
            page: Page::new(self.page, self.limit),
            search: self.query,
            owner_id,
            sort,
            ascending,
            include_unpublished_of,
        })
    }
}

async fn list_videos(
    State(state): State<AppState>,
    viewer: Viewer,
    query: Result<Query<ListVideosQuery>, QueryRejection>,
) -> ApiResult<ApiResponse<Paginated<VideoView>>> {
    let Query(query) = query?;
    let query = query.into_video_query(viewer.id())?;
    let (videos, total) = state.store.list_videos(&query, viewer.id()).await?;
    Ok(ApiResponse::ok(
        Paginated::new(videos, total, query.page),
        "Videos fetched successfully",
    ))
}

async fn publish_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let mut form = MultipartForm::read(multipart?).await?;
    let title = form.required("title")?;
    let description = form.required("description")?;
    let video_file = form.require_file("videoFile")?;
    let thumbnail = form.require_file("thumbnail")?;

    let media = state.media.as_ref();
    let stored_video = store_upload(media, MediaKind::Video, "videoFile", &video_file).await?;
    let stored_thumbnail =
        match store_upload(media, MediaKind::Thumbnail, "thumbnail", &thumbnail).await {
            Ok(stored) => stored,
            Err(err) => {
                discard(media, Some(&stored_video.key)).await;
                return Err(err);
            }
        };
    let duration = media.probe_duration(&stored_video.key).await.unwrap_or(0.0);

    let new_video = NewVideo {
        owner_id: user.id.clone(),
        title,
        description,
        video_file: stored_video.url.clone(),
        video_key: Some(stored_video.key.clone()),
        thumbnail: stored_thumbnail.url.clone(),
        thumbnail_key: Some(stored_thumbnail.key.clone()),
        duration,
    };
    let video = match state.store.create_video(&new_video).await {
        Ok(video) => video,
        Err(err) => {
            discard(media, Some(&stored_video.key)).await;
            discard(media, Some(&stored_thumbnail.key)).await;
            return Err(err.into());
        }
    };

    tracing::info!(video_id = %video.id, owner_id = %user.id, duration, "published video");
    Ok(ApiResponse::created(video, "Video uploaded successfully"))
}

/// Loads a video the caller may see: published, or owned by the caller.
pub(super) async fn visible_video(
    state: &AppState,
    video_id: &str,
    viewer_id: Option<&str>,
) -> ApiResult<VideoRecord> {
    ensure_valid_id(video_id, "video")?;
    match state.store.find_video(video_id).await? {
        Some(video) if video.is_published || Some(video.owner_id.as_str()) == viewer_id => {
            Ok(video)
        }
        _ => Err(ApiError::not_found("Video not found")),
    }
}

/// Loads a video and checks that `user` owns it.
async fn owned_video(state: &AppState, video_id: &str, user_id: &str) -> ApiResult<VideoRecord> {
    ensure_valid_id(video_id, "video")?;
    let video = state
        .store
        .find_video(video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    if video.owner_id != user_id {
        return Err(ApiError::forbidden("You are not allowed to modify this video"));
    }
    Ok(video)
}

async fn get_video(
    State(state): State<AppState>,
    viewer: Viewer,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<ApiResponse<VideoView>> {
    let Path(video_id) = path?;
    visible_video(&state, &video_id, viewer.id()).await?;
    let mut view = state
        .store
        .video_view(&video_id, viewer.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;

    state.store.increment_views(&video_id).await?;
    view.video.views += 1;
    if let Some(viewer_id) = viewer.id() {
        state.store.record_watch(viewer_id, &video_id).await?;
    }
    Ok(ApiResponse::ok(view, "Video fetched successfully"))
}

async fn update_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(video_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video = owned_video(&state, &video_id, &user.id).await?;
    let mut form = MultipartForm::read(multipart?).await?;
    let title = form.text("title");
    let description = form.text("description");
    let thumbnail = form.take_file("thumbnail");
    if title.is_none() && description.is_none() && thumbnail.is_none() {
        return Err(ApiError::bad_request(
            "title, description or thumbnail is required",
        ));
    }

    let media = state.media.as_ref();
    let stored_thumbnail = match &thumbnail {
        Some(file) => Some(store_upload(media, MediaKind::Thumbnail, "thumbnail", file).await?),
        None => None,
    };
    let updated = state
        .store
        .update_video(
            &video.id,
            title.as_deref(),
            description.as_deref(),
            stored_thumbnail
                .as_ref()
                .map(|stored| (stored.url.as_str(), stored.key.as_str())),
        )
        .await;
    let updated = match updated {
        Ok(Some(updated)) => updated,
        Ok(None) => return Err(ApiError::not_found("Video not found")),
        Err(err) => {
            discard(media, stored_thumbnail.as_ref().map(|s| s.key.as_str())).await;
            return Err(err.into());
        }
    };
    if stored_thumbnail.is_some() {
        discard(media, video.thumbnail_key.as_deref()).await;
    }

    tracing::info!(video_id = %video.id, "updated video");
    Ok(ApiResponse::ok(updated, "Video updated successfully"))
}

async fn delete_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let video = owned_video(&state, &video_id, &user.id).await?;
    if !state.store.delete_video(&video.id).await? {
        return Err(ApiError::not_found("Video not found"));
    }
    discard(state.media.as_ref(), video.video_key.as_deref()).await;
    discard(state.media.as_ref(), video.thumbnail_key.as_deref()).await;

    tracing::info!(video_id = %video.id, "deleted video");
    Ok(ApiResponse::ok(empty(), "Video deleted successfully"))
}

async fn toggle_publish(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video = owned_video(&state, &video_id, &user.id).await?;
    let toggled = state
        .store
        .toggle_publish(&video.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    tracing::info!(video_id = %video.id, published = toggled.is_published, "toggled publish status");
    Ok(ApiResponse::ok(toggled, "Publish status toggled successfully"))
}
