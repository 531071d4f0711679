use std::collections::HashMap;

use axum::{body::Bytes, extract::Multipart};

use super::{ApiError, ApiResult, non_blank};
use crate::media::{MediaKind, MediaStorage, StoredMedia};

pub(super) struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// A multipart body split into text fields and file parts. Empty file parts
/// (an untouched file input) are dropped.
#[derive(Default)]
pub(super) struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await?;
                    if !bytes.is_empty() {
                        form.files.insert(
                            name,
                            UploadedFile {
                                file_name,
                                content_type,
                                bytes,
                            },
                        );
                    }
                }
                None => {
                    let text = field.text().await?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    /// Trimmed value of a text field; blank counts as missing.
    pub fn text(&self, name: &str) -> Option<String> {
        non_blank(self.fields.get(name).map(String::as_str))
    }

    pub fn required(&self, name: &str) -> ApiResult<String> {
        self.text(name)
            .ok_or_else(|| ApiError::bad_request(format!("{name} is required")))
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }

    pub fn require_file(&mut self, name: &str) -> ApiResult<UploadedFile> {
        self.take_file(name)
            .ok_or_else(|| ApiError::bad_request(format!("{name} file is required")))
    }
}

/// Validates the declared content type and hands the bytes to storage.
pub(super) async fn store_upload(
    media: &dyn MediaStorage,
    kind: MediaKind,
    field: &str,
    file: &UploadedFile,
) -> ApiResult<StoredMedia> {
    if !kind.accepts(&file.content_type) {
        let expected = match kind {
            MediaKind::Video => "a video",
            _ => "an image",
        };
        return Err(ApiError::bad_request(format!("{field} must be {expected}")));
    }
    let stored = media.put(kind, &file.file_name, &file.bytes).await?;
    tracing::debug!(key = %stored.key, size = stored.size, "stored upload");
    Ok(stored)
}
