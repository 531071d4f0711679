//! HTTP surface: shared state, the response envelopes and the router.

mod comments;
mod dashboard;
mod likes;
mod media;
mod playlists;
mod subscriptions;
mod tweets;
mod upload;
mod users;
mod videos;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::TokenKeys,
    media::MediaStorage,
    models::{Page, UserRecord},
    store::{Conflict, Store, is_valid_id},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub media: Arc<dyn MediaStorage>,
    pub tokens: Arc<TokenKeys>,
    /// Adds `Secure` to the session cookies.
    pub cookie_secure: bool,
    /// Largest accepted request body, in bytes.
    pub upload_limit: usize,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// Creates a 404 error with the provided message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Creates a 500 error with the provided message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "statusCode": self.status.as_u16(),
            "message": self.message,
            "success": false,
            "errors": [],
            "data": null,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(Conflict(message)) = err.downcast_ref::<Conflict>() {
            tracing::debug!(error = format!("{err:#}"), "write hit a unique constraint");
            return Self::conflict(*message);
        }
        tracing::error!(error = format!("{err:#}"), "request failed");
        Self::internal("Something went wrong while processing the request")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Success envelope shared by every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    #[serde(skip)]
    pub status: StatusCode,
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn with_status(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status,
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: true,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CREATED, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// `page`/`limit` query parameters shared by the paginated listings.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit)
    }
}

/// Body of the endpoints that only carry text content.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentBody {
    pub content: Option<String>,
}

/// Trimmed, non-blank value of a required field.
pub(crate) fn required(value: Option<&str>, field: &str) -> ApiResult<String> {
    non_blank(value).ok_or_else(|| ApiError::bad_request(format!("{field} is required")))
}

/// `None` for missing and blank values alike.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn ensure_valid_id(value: &str, what: &str) -> ApiResult<()> {
    if is_valid_id(value) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("Invalid {what} id")))
    }
}

pub(crate) fn ensure_owner(owner_id: &str, user: &UserRecord, what: &str) -> ApiResult<()> {
    if owner_id == user.id {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "You are not allowed to modify this {what}"
        )))
    }
}

/// Empty JSON object used as `data` by endpoints without a payload.
pub(crate) fn empty() -> serde_json::Value {
    json!({})
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/healthcheck", get(healthcheck))
        .nest("/users", users::routes())
        .nest("/videos", videos::routes())
        .nest("/comments", comments::routes())
        .nest("/likes", likes::routes())
        .nest("/tweets", tweets::routes())
        .nest("/playlist", playlists::routes())
        .nest("/subscriptions", subscriptions::routes())
        .nest("/dashboard", dashboard::routes());

    Router::new()
        .nest("/api/v1", api)
        .route("/media/{*key}", get(media::serve_media))
        .fallback(endpoint_not_found)
        .layer(DefaultBodyLimit::max(state.upload_limit))
        .with_state(state)
}

async fn healthcheck(State(state): State<AppState>) -> ApiResult<ApiResponse<serde_json::Value>> {
    state.store.ping().await?;
    Ok(ApiResponse::ok(json!({ "status": "OK" }), "Health check passed"))
}

async fn endpoint_not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{sync::OnceLock, time::Duration};

    use axum::{
        body::{Body, to_bytes},
        http::{HeaderMap, Method, Request, header},
    };
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::hash_password,
        media::LocalMediaStorage,
        models::{NewUser, VideoRecord},
        store::test_support::{sample_user, sample_video},
    };

    pub(crate) const PASSWORD: &str = "correct horse battery";
    const BOUNDARY: &str = "vidtube-test-boundary";

    /// Hashing is slow in debug builds, so every fixture user shares one hash.
    fn password_hash() -> String {
        static HASH: OnceLock<String> = OnceLock::new();
        HASH.get_or_init(|| hash_password(PASSWORD).unwrap()).clone()
    }

    pub(crate) struct TestApp {
        pub dir: TempDir,
        pub state: AppState,
    }

    impl TestApp {
        pub(crate) async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::open(&dir.path().join("vidtube.db")).await.unwrap();
            let media = LocalMediaStorage::new(dir.path().join("media")).unwrap();
            let state = AppState {
                store,
                media: Arc::new(media),
                tokens: Arc::new(TokenKeys::new(
                    "test-access-secret",
                    Duration::from_secs(3600),
                    "test-refresh-secret",
                    Duration::from_secs(86_400),
                )),
                cookie_secure: false,
                upload_limit: 8 * 1024 * 1024,
            };
            Self { dir, state }
        }

        pub(crate) async fn user(&self, username: &str) -> UserRecord {
            let user = NewUser {
                password_hash: password_hash(),
                ..sample_user(username)
            };
            self.state.store.create_user(&user).await.unwrap()
        }

        pub(crate) async fn video(&self, owner: &UserRecord, title: &str) -> VideoRecord {
            self.state
                .store
                .create_video(&sample_video(&owner.id, title))
                .await
                .unwrap()
        }

        pub(crate) fn token(&self, user: &UserRecord) -> String {
            self.state.tokens.issue_access_token(user).unwrap()
        }

        /// Sends `request` through the full router and decodes the JSON body
        /// (`Value::Null` for an empty one).
        pub(crate) async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
            let response = router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&body).unwrap_or(Value::Null)
            };
            (status, headers, json)
        }

        pub(crate) async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
            let (status, _, body) = self.send(request(Method::GET, uri, token, None)).await;
            (status, body)
        }

        pub(crate) async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let (status, _, body) = self.send(request(method, uri, token, body)).await;
            (status, body)
        }
    }

    pub(crate) fn request(
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub(crate) struct FilePart<'a> {
        pub field: &'a str,
        pub file_name: &'a str,
        pub content_type: &'a str,
        pub bytes: &'a [u8],
    }

    pub(crate) fn image(field: &str) -> FilePart<'_> {
        FilePart {
            field,
            file_name: "picture.png",
            content_type: "image/png",
            bytes: b"\x89PNG fake image",
        }
    }

    pub(crate) fn multipart_request(
        method: Method,
        uri: &str,
        token: Option<&str>,
        fields: &[(&str, &str)],
        files: &[FilePart<'_>],
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for file in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    file.field, file.file_name, file.content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(file.bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }
}
