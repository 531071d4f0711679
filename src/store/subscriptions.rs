use anyhow::Result;
use libsql::params;

use super::{OWNER_COLUMNS, Store, VIDEO_COLUMNS, new_id, now, row_to_owner, row_to_video};
use crate::models::{SubscribedChannel, Subscriber};

impl Store {
    /// Subscribes or unsubscribes. Returns `true` when subscribed afterwards.
    pub async fn toggle_subscription(&self, subscriber_id: &str, channel_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND channel_id = ?2",
                params![subscriber_id, channel_id],
            )
            .await?;
        if removed > 0 {
            return Ok(false);
        }

        self.conn
            .execute(
                r#"
                INSERT INTO subscriptions (id, subscriber_id, channel_id, created_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![new_id(), subscriber_id, channel_id, now()],
            )
            .await?;
        Ok(true)
    }

    pub async fn channel_subscribers(&self, channel_id: &str) -> Result<Vec<Subscriber>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    r#"
                    SELECT {OWNER_COLUMNS}, s.created_at
                    FROM subscriptions s JOIN users o ON o.id = s.subscriber_id
                    WHERE s.channel_id = ?1
                    ORDER BY s.created_at DESC, s.rowid DESC
                    "#
                ),
                params![channel_id],
            )
            .await?;
        let mut subscribers = Vec::new();
        while let Some(row) = rows.next().await? {
            subscribers.push(Subscriber {
                user: row_to_owner(&row, 0)?,
                subscribed_at: row.get(4)?,
            });
        }
        Ok(subscribers)
    }

    /// Channels `subscriber_id` follows, each with its newest published video.
    pub async fn subscribed_channels(&self, subscriber_id: &str) -> Result<Vec<SubscribedChannel>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    r#"
                    SELECT {OWNER_COLUMNS}, s.created_at, {VIDEO_COLUMNS}
                    FROM subscriptions s
                    JOIN users o ON o.id = s.channel_id
                    LEFT JOIN videos v ON v.id = (
                        SELECT latest.id FROM videos latest
                        WHERE latest.owner_id = o.id AND latest.is_published = 1
                        ORDER BY latest.created_at DESC, latest.rowid DESC
                        LIMIT 1
                    )
                    WHERE s.subscriber_id = ?1
                    ORDER BY s.created_at DESC, s.rowid DESC
                    "#
                ),
                params![subscriber_id],
            )
            .await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            let latest_video = match row.get::<Option<String>>(5)? {
                Some(_) => Some(row_to_video(&row, 5)?),
                None => None,
            };
            channels.push(SubscribedChannel {
                channel: row_to_owner(&row, 0)?,
                subscribed_at: row.get(4)?,
                latest_video,
            });
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn toggle_subscribes_then_unsubscribes() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let alice = insert_user(&store, "alice").await;
        let bob = insert_user(&store, "bob").await;

        assert!(store.toggle_subscription(&bob.id, &alice.id).await?);
        let subscribers = store.channel_subscribers(&alice.id).await?;
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].user.username, "bob");

        assert!(!store.toggle_subscription(&bob.id, &alice.id).await?);
        assert!(store.channel_subscribers(&alice.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn subscribed_channels_carry_latest_published_video() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let alice = insert_user(&store, "alice").await;
        let bob = insert_user(&store, "bob").await;
        let carol = insert_user(&store, "carol").await;
        insert_video(&store, &alice.id, "old").await;
        let newest = insert_video(&store, &alice.id, "new").await;
        let draft = insert_video(&store, &alice.id, "draft").await;
        store.toggle_publish(&draft.id).await?;

        store.toggle_subscription(&bob.id, &alice.id).await?;
        store.toggle_subscription(&bob.id, &carol.id).await?;

        let channels = store.subscribed_channels(&bob.id).await?;
        assert_eq!(channels.len(), 2);
        let alice_channel = channels
            .iter()
            .find(|c| c.channel.id == alice.id)
            .unwrap();
        assert_eq!(
            alice_channel.latest_video.as_ref().map(|v| v.id.as_str()),
            Some(newest.id.as_str())
        );
        let carol_channel = channels.iter().find(|c| c.channel.id == carol.id).unwrap();
        assert!(carol_channel.latest_video.is_none());

        assert!(store.subscribed_channels(&carol.id).await?.is_empty());
        Ok(())
    }
}
