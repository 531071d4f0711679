use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use mime_guess::MimeGuess;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

use super::{ApiError, ApiResult, AppState};

/// `GET /media/{*key}`: streams a stored object with byte-range support.
pub(super) async fn serve_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = state
        .media
        .locate(&key)
        .await
        .ok_or_else(|| ApiError::not_found("media not found"))?;
    stream_file(path, &headers).await
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|_| ApiError::internal("invalid response header"))
}

async fn stream_file(path: PathBuf, headers: &HeaderMap) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("media not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("media not found"))?
        .len();

    let range = headers
        .get(header::RANGE)
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("media not found"))?;
            let mut response = Body::from_stream(ReaderStream::new(file.take(length))).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{size}"))?,
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

/// Parses a single `bytes=` range. Returns `None` for anything we do not
/// serve partially (other units, multiple ranges, malformed input).
fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let (unit, range) = value.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    let range = range.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // "-N" is the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        if suffix_len >= size {
            return Some((0, size.saturating_sub(1)));
        }
        return Some((size - suffix_len, size - 1));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::{Method, Request};

    use std::sync::Arc;

    use super::super::test_support::TestApp;
    use super::*;
    use crate::media::{LocalMediaStorage, MediaKind};

    fn range(value: &'static str) -> HeaderValue {
        HeaderValue::from_static(value)
    }

    #[test]
    fn parses_supported_ranges() {
        assert_eq!(parse_range_header(&range("bytes=0-9"), 100), Some((0, 9)));
        assert_eq!(parse_range_header(&range("bytes=90-"), 100), Some((90, 99)));
        assert_eq!(parse_range_header(&range("bytes=-10"), 100), Some((90, 99)));
        assert_eq!(parse_range_header(&range("bytes=-500"), 100), Some((0, 99)));
        assert_eq!(parse_range_header(&range("bytes=9-0"), 100), None);
        assert_eq!(parse_range_header(&range("items=0-9"), 100), None);
        assert_eq!(parse_range_header(&range("bytes=0-1,5-6"), 100), None);
        assert_eq!(parse_range_header(&range("bytes=-0"), 100), None);
    }

    async fn stored_clip(app: &TestApp) -> String {
        app.state
            .media
            .put(MediaKind::Video, "clip.mp4", b"0123456789")
            .await
            .unwrap()
            .key
    }

    #[tokio::test]
    async fn serves_whole_file_with_mime_type() {
        let app = TestApp::new().await;
        let key = stored_clip(&app).await;

        let response = serve_media(State(app.state.clone()), Path(key), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"0123456789");
    }

    #[tokio::test]
    async fn serves_partial_content() {
        let app = TestApp::new().await;
        let key = stored_clip(&app).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, range("bytes=2-5"));

        let response = serve_media(State(app.state.clone()), Path(key), headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"2345");
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_416() {
        let app = TestApp::new().await;
        let key = stored_clip(&app).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, range("bytes=50-"));

        let response = serve_media(State(app.state.clone()), Path(key), headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
    }

    #[tokio::test]
    async fn missing_and_traversal_keys_are_404() {
        let app = TestApp::new().await;
        let err = serve_media(
            State(app.state.clone()),
            Path("videos/missing.mp4".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = serve_media(
            State(app.state.clone()),
            Path("../vidtube.db".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn database_next_to_media_is_not_served() {
        // Default layout: the database file sits directly in MEDIA_ROOT.
        let mut app = TestApp::new().await;
        app.state.media = Arc::new(LocalMediaStorage::new(app.dir.path()).unwrap());
        assert!(app.dir.path().join("vidtube.db").is_file());

        for uri in ["/media/vidtube.db", "/media/vidtube.db-wal"] {
            let request = Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let (status, _, body) = app.send(request).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["success"], false);
        }

        let key = stored_clip(&app).await;
        let (status, _) = app.get(&format!("/media/{key}"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn media_route_is_mounted() {
        let app = TestApp::new().await;
        let key = stored_clip(&app).await;
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("/media/{key}"))
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
    }
}
