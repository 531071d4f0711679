use anyhow::{Context, Result};
use libsql::{Row, params};

use super::{
    OWNER_COLUMNS, Store, conflict_on_duplicate, new_id, now, row_to_owner, row_to_video_view,
    video_view_select,
};
use crate::models::{PlaylistDetails, PlaylistRecord, PlaylistSummary};

pub(crate) const DUPLICATE_PLAYLIST: &str = "A playlist with this name already exists";

const PLAYLIST_COLUMNS: &str = "p.id, p.owner_id, p.name, p.description, p.created_at, p.updated_at";

fn row_to_playlist(row: &Row) -> Result<PlaylistRecord> {
    Ok(PlaylistRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Store {
    /// Playlist names are unique per owner. `except_id` skips the playlist
    /// being renamed.
    pub async fn playlist_name_taken(
        &self,
        owner_id: &str,
        name: &str,
        except_id: Option<&str>,
    ) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM playlists WHERE owner_id = ?1 AND name = ?2 AND (?3 IS NULL OR id <> ?3)",
                params![owner_id, name, except_id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn create_playlist(
        &self,
        owner_id: &str,
        name: &str,
        description: &str,
    ) -> Result<PlaylistRecord> {
        let id = new_id();
        self.conn
            .execute(
                r#"
                INSERT INTO playlists (id, owner_id, name, description, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                "#,
                params![id.as_str(), owner_id, name, description, now()],
            )
            .await
            .map_err(|err| conflict_on_duplicate(err, DUPLICATE_PLAYLIST))
            .with_context(|| format!("inserting playlist {name}"))?;
        self.find_playlist(&id)
            .await?
            .context("playlist vanished right after insert")
    }

    pub async fn find_playlist(&self, id: &str) -> Result<Option<PlaylistRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists p WHERE p.id = ?1"),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_playlist(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn user_playlists(&self, owner_id: &str) -> Result<Vec<PlaylistSummary>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    r#"
                    SELECT {PLAYLIST_COLUMNS},
                           (SELECT COUNT(*) FROM playlist_videos pv WHERE pv.playlist_id = p.id)
                    FROM playlists p
                    WHERE p.owner_id = ?1
                    ORDER BY p.created_at DESC, p.rowid DESC
                    "#
                ),
                params![owner_id],
            )
            .await?;
        let mut playlists = Vec::new();
        while let Some(row) = rows.next().await? {
            playlists.push(PlaylistSummary {
                playlist: row_to_playlist(&row)?,
                total_videos: row.get(6)?,
            });
        }
        Ok(playlists)
    }

    /// Playlist with its owner and videos in insertion order. Unpublished
    /// videos only show up for their own owner.
    pub async fn playlist_details(
        &self,
        id: &str,
        viewer_id: Option<&str>,
    ) -> Result<Option<PlaylistDetails>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PLAYLIST_COLUMNS}, {OWNER_COLUMNS} \
                     FROM playlists p JOIN users o ON o.id = p.owner_id WHERE p.id = ?1"
                ),
                params![id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let playlist = row_to_playlist(&row)?;
        let owner = row_to_owner(&row, 6)?;

        let sql = format!(
            "{} JOIN playlist_videos pv ON pv.video_id = v.id \
             WHERE pv.playlist_id = ?1 AND (v.is_published = 1 OR v.owner_id = ?2) \
             ORDER BY pv.added_at ASC, pv.rowid ASC",
            video_view_select("?2", ""),
        );
        let mut rows = self.conn.query(&sql, params![id, viewer_id]).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video_view(&row)?);
        }

        Ok(Some(PlaylistDetails {
            playlist,
            owner,
            videos,
        }))
    }

    /// Returns `false` when the video was already in the playlist.
    pub async fn add_video_to_playlist(&self, playlist_id: &str, video_id: &str) -> Result<bool> {
        let added = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO playlist_videos (playlist_id, video_id, added_at) VALUES (?1, ?2, ?3)",
                params![playlist_id, video_id, now()],
            )
            .await?;
        if added > 0 {
            self.touch_playlist(playlist_id).await?;
        }
        Ok(added > 0)
    }

    /// Returns `false` when the video was not in the playlist.
    pub async fn remove_video_from_playlist(
        &self,
        playlist_id: &str,
        video_id: &str,
    ) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
                params![playlist_id, video_id],
            )
            .await?;
        if removed > 0 {
            self.touch_playlist(playlist_id).await?;
        }
        Ok(removed > 0)
    }

    async fn touch_playlist(&self, id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE playlists SET updated_at = ?2 WHERE id = ?1",
                params![id, now()],
            )
            .await?;
        Ok(())
    }

    pub async fn update_playlist(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<PlaylistRecord>> {
        self.conn
            .execute(
                r#"
                UPDATE playlists SET
                    name = COALESCE(?2, name),
                    description = COALESCE(?3, description),
                    updated_at = ?4
                WHERE id = ?1
                "#,
                params![id, name, description, now()],
            )
            .await
            .map_err(|err| conflict_on_duplicate(err, DUPLICATE_PLAYLIST))?;
        self.find_playlist(id).await
    }

    pub async fn delete_playlist(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM playlists WHERE id = ?1", params![id])
            .await?;
        Ok(deleted > 0)
    }
}
