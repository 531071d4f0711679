use anyhow::{Context, Result};
use libsql::params;

use super::{
    Store, VIDEO_COLUMNS, new_id, now, row_to_video, row_to_video_view, video_view_select,
};
use crate::models::{NewVideo, Page, VideoRecord, VideoView};

/// Columns the public listing may be sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoSort {
    #[default]
    CreatedAt,
    Views,
    Duration,
    Title,
}

impl VideoSort {
    /// Accepts the camelCase field names clients send in `sortBy`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "createdAt" | "created_at" => Some(Self::CreatedAt),
            "views" => Some(Self::Views),
            "duration" => Some(Self::Duration),
            "title" => Some(Self::Title),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "v.created_at",
            Self::Views => "v.views",
            Self::Duration => "v.duration",
            Self::Title => "v.title COLLATE NOCASE",
        }
    }
}

/// Filters for the public video listing.
#[derive(Debug, Clone, Default)]
pub struct VideoQuery {
    pub page: Page,
    /// Case-insensitive substring matched against title and description.
    pub search: Option<String>,
    pub owner_id: Option<String>,
    pub sort: VideoSort,
    pub ascending: bool,
    /// Owner whose unpublished videos may be included (the viewer browsing
    /// their own channel).
    pub include_unpublished_of: Option<String>,
}

const LIST_FILTER: &str = r#"
    WHERE (?1 IS NULL OR v.owner_id = ?1)
      AND (
        ?2 IS NULL
        OR instr(lower(v.title), lower(?2)) > 0
        OR instr(lower(v.description), lower(?2)) > 0
      )
      AND (v.is_published = 1 OR v.owner_id = ?3)
"#;

impl Store {
    pub async fn create_video(&self, video: &NewVideo) -> Result<VideoRecord> {
        let id = new_id();
        let created_at = now();
        self.conn
            .execute(
                r#"
                INSERT INTO videos (
                    id, owner_id, title, description, video_file, video_key,
                    thumbnail, thumbnail_key, duration, views, is_published,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 1, ?10, ?10)
                "#,
                params![
                    id.as_str(),
                    video.owner_id.as_str(),
                    video.title.as_str(),
                    video.description.as_str(),
                    video.video_file.as_str(),
                    video.video_key.as_deref(),
                    video.thumbnail.as_str(),
                    video.thumbnail_key.as_deref(),
                    video.duration,
                    created_at.as_str(),
                ],
            )
            .await
            .with_context(|| format!("inserting video {}", video.title))?;

        self.find_video(&id)
            .await?
            .context("video vanished right after insert")
    }

    pub async fn find_video(&self, id: &str) -> Result<Option<VideoRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos v WHERE v.id = ?1"),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row, 0)?)),
            None => Ok(None),
        }
    }

    /// Single video with owner details and like state for `viewer_id`.
    pub async fn video_view(&self, id: &str, viewer_id: Option<&str>) -> Result<Option<VideoView>> {
        let sql = format!("{} WHERE v.id = ?1", video_view_select("?2", ""));
        let mut rows = self.conn.query(&sql, params![id, viewer_id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video_view(&row)?)),
            None => Ok(None),
        }
    }

    /// One page of the listing plus the total number of matching videos.
    pub async fn list_videos(
        &self,
        query: &VideoQuery,
        viewer_id: Option<&str>,
    ) -> Result<(Vec<VideoView>, i64)> {
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let owner = query.owner_id.as_deref();
        let unpublished_of = query.include_unpublished_of.as_deref();

        let mut rows = self
            .conn
            .query(
                &format!("SELECT COUNT(*) FROM videos v {LIST_FILTER}"),
                params![owner, search, unpublished_of],
            )
            .await?;
        let total: i64 = rows
            .next()
            .await?
            .context("missing count row")?
            .get(0)?;

        let direction = if query.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "{} {LIST_FILTER} ORDER BY {} {direction}, v.rowid {direction} LIMIT ?4 OFFSET ?5",
            video_view_select("?6", ""),
            query.sort.column(),
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![
                    owner,
                    search,
                    unpublished_of,
                    i64::from(query.page.limit),
                    query.page.offset(),
                    viewer_id,
                ],
            )
            .await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video_view(&row)?);
        }
        Ok((videos, total))
    }

    pub async fn increment_views(&self, id: &str) -> Result<()> {
        self.conn
            .execute("UPDATE videos SET views = views + 1 WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }

    /// Applies the provided changes; `None` keeps the stored value.
    pub async fn update_video(
        &self,
        id: &str,
        title: Option<&str>,
        description: Option<&str>,
        thumbnail: Option<(&str, &str)>,
    ) -> Result<Option<VideoRecord>> {
        let (thumbnail_url, thumbnail_key) = match thumbnail {
            Some((url, key)) => (Some(url), Some(key)),
            None => (None, None),
        };
        self.conn
            .execute(
                r#"
                UPDATE videos SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    thumbnail = COALESCE(?4, thumbnail),
                    thumbnail_key = CASE WHEN ?4 IS NULL THEN thumbnail_key ELSE ?5 END,
                    updated_at = ?6
                WHERE id = ?1
                "#,
                params![id, title, description, thumbnail_url, thumbnail_key, now()],
            )
            .await?;
        self.find_video(id).await
    }

    /// Deletes the row; comments, likes, playlist entries and history rows go
    /// with it through the foreign keys.
    pub async fn delete_video(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM videos WHERE id = ?1", params![id])
            .await?;
        Ok(deleted > 0)
    }

    pub async fn toggle_publish(&self, id: &str) -> Result<Option<VideoRecord>> {
        self.conn
            .execute(
                "UPDATE videos SET is_published = 1 - is_published, updated_at = ?2 WHERE id = ?1",
                params![id, now()],
            )
            .await?;
        self.find_video(id).await
    }
}
