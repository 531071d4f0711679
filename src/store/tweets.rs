use anyhow::{Context, Result};
use libsql::{Row, params};

use super::{OWNER_COLUMNS, Store, new_id, now, row_to_owner};
use crate::models::{TweetRecord, TweetView};

const TWEET_COLUMNS: &str = "t.id, t.owner_id, t.content, t.created_at, t.updated_at";

fn row_to_tweet(row: &Row) -> Result<TweetRecord> {
    Ok(TweetRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl Store {
    pub async fn create_tweet(&self, owner_id: &str, content: &str) -> Result<TweetRecord> {
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO tweets (id, owner_id, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.as_str(), owner_id, content, now()],
            )
            .await
            .context("inserting tweet")?;
        self.find_tweet(&id)
            .await?
            .context("tweet vanished right after insert")
    }

    pub async fn find_tweet(&self, id: &str) -> Result<Option<TweetRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TWEET_COLUMNS} FROM tweets t WHERE t.id = ?1"),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_tweet(&row)?)),
            None => Ok(None),
        }
    }

    /// All tweets of `owner_id`, newest first.
    pub async fn user_tweets(
        &self,
        owner_id: &str,
        viewer_id: Option<&str>,
    ) -> Result<Vec<TweetView>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    r#"
                    SELECT {TWEET_COLUMNS}, {OWNER_COLUMNS},
                           (SELECT COUNT(*) FROM likes l WHERE l.tweet_id = t.id),
                           EXISTS (
                               SELECT 1 FROM likes l
                               WHERE l.tweet_id = t.id AND l.liked_by = ?2
                           )
                    FROM tweets t JOIN users o ON o.id = t.owner_id
                    WHERE t.owner_id = ?1
                    ORDER BY t.created_at DESC, t.rowid DESC
                    "#
                ),
                params![owner_id, viewer_id],
            )
            .await?;

        let mut tweets = Vec::new();
        while let Some(row) = rows.next().await? {
            tweets.push(TweetView {
                tweet: row_to_tweet(&row)?,
                owner: row_to_owner(&row, 5)?,
                total_likes: row.get(9)?,
                is_liked: row.get::<i64>(10)? != 0,
            });
        }
        Ok(tweets)
    }

    pub async fn update_tweet(&self, id: &str, content: &str) -> Result<Option<TweetRecord>> {
        self.conn
            .execute(
                "UPDATE tweets SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, content, now()],
            )
            .await?;
        self.find_tweet(id).await
    }

    pub async fn delete_tweet(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM tweets WHERE id = ?1", params![id])
            .await?;
        Ok(deleted > 0)
    }
}
