use anyhow::Result;
use libsql::params;

use super::{Store, VIDEO_VIEW_COLUMN_COUNT, new_id, now, row_to_video_view, video_view_select};
use crate::models::{LikeTarget, LikedVideo};

impl Store {
    pub async fn like_target_exists(&self, target: LikeTarget, id: &str) -> Result<bool> {
        self.exists(target.table(), id).await
    }

    /// Flips the like of `user_id` on the target. Returns `true` when the
    /// target is liked afterwards.
    pub async fn toggle_like(&self, target: LikeTarget, id: &str, user_id: &str) -> Result<bool> {
        let column = target.column();
        let removed = self
            .conn
            .execute(
                &format!("DELETE FROM likes WHERE {column} = ?1 AND liked_by = ?2"),
                params![id, user_id],
            )
            .await?;
        if removed > 0 {
            return Ok(false);
        }

        self.conn
            .execute(
                &format!(
                    "INSERT INTO likes (id, {column}, liked_by, created_at) VALUES (?1, ?2, ?3, ?4)"
                ),
                params![new_id(), id, user_id, now()],
            )
            .await?;
        Ok(true)
    }

    /// Videos the user liked, most recent like first.
    pub async fn liked_videos(&self, user_id: &str) -> Result<Vec<LikedVideo>> {
        let sql = format!(
            "{} JOIN likes lk ON lk.video_id = v.id \
             WHERE lk.liked_by = ?1 AND (v.is_published = 1 OR v.owner_id = ?1) \
             ORDER BY lk.created_at DESC, lk.rowid DESC",
            video_view_select("?1", ", lk.created_at"),
        );
        let mut rows = self.conn.query(&sql, params![user_id]).await?;
        let mut liked = Vec::new();
        while let Some(row) = rows.next().await? {
            liked.push(LikedVideo {
                view: row_to_video_view(&row)?,
                liked_at: row.get(VIDEO_VIEW_COLUMN_COUNT)?,
            });
        }
        Ok(liked)
    }
}
