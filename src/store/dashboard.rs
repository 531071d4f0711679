use anyhow::{Context, Result};
use libsql::params;

use super::{Store, row_to_video_view, video_view_select};
use crate::models::{ChannelStats, VideoView};

impl Store {
    /// Totals for the owner's dashboard. `total_likes` counts likes on the
    /// channel's videos only.
    pub async fn channel_stats(&self, owner_id: &str) -> Result<ChannelStats> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM subscriptions WHERE channel_id = ?1),
                    (SELECT COUNT(*) FROM videos WHERE owner_id = ?1),
                    (SELECT COALESCE(SUM(views), 0) FROM videos WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM likes l JOIN videos v ON v.id = l.video_id
                     WHERE v.owner_id = ?1),
                    (SELECT COUNT(*) FROM tweets WHERE owner_id = ?1)
                "#,
                params![owner_id],
            )
            .await?;
        let row = rows.next().await?.context("missing stats row")?;
        Ok(ChannelStats {
            total_subscribers: row.get(0)?,
            total_videos: row.get(1)?,
            total_views: row.get(2)?,
            total_likes: row.get(3)?,
            total_tweets: row.get(4)?,
        })
    }

    /// Every video of the channel, drafts included, newest first.
    pub async fn channel_videos(&self, owner_id: &str) -> Result<Vec<VideoView>> {
        let sql = format!(
            "{} WHERE v.owner_id = ?1 ORDER BY v.created_at DESC, v.rowid DESC",
            video_view_select("?1", ""),
        );
        let mut rows = self.conn.query(&sql, params![owner_id]).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video_view(&row)?);
        }
        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::LikeTarget;

    #[tokio::test]
    async fn new_channel_has_zero_stats() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let alice = insert_user(&store, "alice").await;
        assert_eq!(store.channel_stats(&alice.id).await?, ChannelStats::default());
        assert!(store.channel_videos(&alice.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn stats_aggregate_channel_activity() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let alice = insert_user(&store, "alice").await;
        let bob = insert_user(&store, "bob").await;
        let first = insert_video(&store, &alice.id, "first").await;
        let draft = insert_video(&store, &alice.id, "draft").await;
        store.toggle_publish(&draft.id).await?;
        let other = insert_video(&store, &bob.id, "bobs").await;

        store.increment_views(&first.id).await?;
        store.increment_views(&first.id).await?;
        store.increment_views(&draft.id).await?;
        store.increment_views(&other.id).await?;
        store.toggle_like(LikeTarget::Video, &first.id, &bob.id).await?;
        store.toggle_like(LikeTarget::Video, &other.id, &alice.id).await?;
        let tweet = store.create_tweet(&alice.id, "hello").await?;
        store.toggle_like(LikeTarget::Tweet, &tweet.id, &bob.id).await?;
        store.toggle_subscription(&bob.id, &alice.id).await?;

        let stats = store.channel_stats(&alice.id).await?;
        assert_eq!(
            stats,
            ChannelStats {
                total_subscribers: 1,
                total_videos: 2,
                total_views: 3,
                total_likes: 1,
                total_tweets: 1,
            }
        );

        let videos = store.channel_videos(&alice.id).await?;
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].video.id, draft.id);
        assert!(!videos[0].video.is_published);
        Ok(())
    }
}
