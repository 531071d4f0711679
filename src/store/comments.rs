use anyhow::{Context, Result};
use libsql::{Row, params};

use super::{OWNER_COLUMNS, Store, new_id, now, row_to_owner};
use crate::models::{CommentRecord, CommentView, Page};

const COMMENT_COLUMNS: &str = "c.id, c.video_id, c.owner_id, c.content, c.created_at, c.updated_at";

fn row_to_comment(row: &Row) -> Result<CommentRecord> {
    Ok(CommentRecord {
        id: row.get(0)?,
        video_id: row.get(1)?,
        owner_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Store {
    pub async fn create_comment(
        &self,
        video_id: &str,
        owner_id: &str,
        content: &str,
    ) -> Result<CommentRecord> {
        let id = new_id();
        self.conn
            .execute(
                r#"
                INSERT INTO comments (id, video_id, owner_id, content, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                "#,
                params![id.as_str(), video_id, owner_id, content, now()],
            )
            .await
            .with_context(|| format!("inserting comment on video {video_id}"))?;
        self.find_comment(&id)
            .await?
            .context("comment vanished right after insert")
    }

    pub async fn find_comment(&self, id: &str) -> Result<Option<CommentRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = ?1"),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_comment(&row)?)),
            None => Ok(None),
        }
    }

    /// Comments on a video, oldest first, with author and like details.
    pub async fn video_comments(
        &self,
        video_id: &str,
        viewer_id: Option<&str>,
        page: Page,
    ) -> Result<(Vec<CommentView>, i64)> {
        let total = self
            .count("SELECT COUNT(*) FROM comments WHERE video_id = ?1", video_id)
            .await?;

        let mut rows = self
            .conn
            .query(
                &format!(
                    r#"
                    SELECT {COMMENT_COLUMNS}, {OWNER_COLUMNS},
                           (SELECT COUNT(*) FROM likes l WHERE l.comment_id = c.id),
                           EXISTS (
                               SELECT 1 FROM likes l
                               WHERE l.comment_id = c.id AND l.liked_by = ?2
                           )
                    FROM comments c JOIN users o ON o.id = c.owner_id
                    WHERE c.video_id = ?1
                    ORDER BY c.created_at ASC, c.rowid ASC
                    LIMIT ?3 OFFSET ?4
                    "#
                ),
                params![video_id, viewer_id, i64::from(page.limit), page.offset()],
            )
            .await?;

        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(CommentView {
                comment: row_to_comment(&row)?,
                owner: row_to_owner(&row, 6)?,
                total_likes: row.get(10)?,
                is_liked: row.get::<i64>(11)? != 0,
            });
        }
        Ok((comments, total))
    }

    pub async fn update_comment(&self, id: &str, content: &str) -> Result<Option<CommentRecord>> {
        self.conn
            .execute(
                "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, content, now()],
            )
            .await?;
        self.find_comment(id).await
    }

    pub async fn delete_comment(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])
            .await?;
        Ok(deleted > 0)
    }
}
