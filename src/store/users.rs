use anyhow::{Context, Result};
use libsql::params;

use super::{
    Store, USER_COLUMNS, VIDEO_VIEW_COLUMN_COUNT, conflict_on_duplicate, new_id, now, row_to_user,
    row_to_video_view, video_view_select,
};

pub(crate) const DUPLICATE_USER: &str = "User with email or username already exists";
pub(crate) const DUPLICATE_EMAIL: &str = "Email is already in use";
use crate::models::{ChannelProfile, NewUser, UserRecord, WatchedVideo};

impl Store {
    /// Inserts a user and returns the stored row. Username and email are
    /// expected to be normalized (lower-case) by the caller.
    pub async fn create_user(&self, user: &NewUser) -> Result<UserRecord> {
        let id = new_id();
        let created_at = now();
        self.conn
            .execute(
                r#"
                INSERT INTO users (
                    id, username, email, full_name, avatar, avatar_key,
                    cover_image, cover_image_key, password_hash, refresh_token_hash,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)
                "#,
                params![
                    id.as_str(),
                    user.username.as_str(),
                    user.email.as_str(),
                    user.full_name.as_str(),
                    user.avatar.as_str(),
                    user.avatar_key.as_deref(),
                    user.cover_image.as_deref(),
                    user.cover_image_key.as_deref(),
                    user.password_hash.as_str(),
                    created_at.as_str(),
                ],
            )
            .await
            .map_err(|err| conflict_on_duplicate(err, DUPLICATE_USER))
            .with_context(|| format!("inserting user {}", user.username))?;

        self.find_user_by_id(&id)
            .await?
            .context("user vanished right after insert")
    }

    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        self.find_user_where("u.id = ?1", id).await
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.find_user_where("u.username = lower(?1)", username).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.find_user_where("u.email = lower(?1)", email).await
    }

    async fn find_user_where(&self, condition: &str, value: &str) -> Result<Option<UserRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users u WHERE {condition}"),
                params![value],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// Whether either the username or the email is already registered.
    pub async fn username_or_email_taken(&self, username: &str, email: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM users WHERE username = lower(?1) OR email = lower(?2)",
                params![username, email],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Stores (or clears, with `None`) the fingerprint of the live refresh token.
    pub async fn set_refresh_token_hash(&self, user_id: &str, hash: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET refresh_token_hash = ?2 WHERE id = ?1",
                params![user_id, hash],
            )
            .await?;
        Ok(())
    }

    /// Swaps the refresh fingerprint only if it still equals `expected`.
    ///
    /// Returns `false` when another refresh (or a logout) already replaced it,
    /// which makes each refresh token usable exactly once.
    pub async fn rotate_refresh_token_hash(
        &self,
        user_id: &str,
        expected: &str,
        replacement: &str,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET refresh_token_hash = ?3 WHERE id = ?1 AND refresh_token_hash = ?2",
                params![user_id, expected, replacement],
            )
            .await?;
        Ok(changed == 1)
    }

    pub async fn update_password_hash(&self, user_id: &str, hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                params![user_id, hash, now()],
            )
            .await?;
        Ok(())
    }

    /// Whether `email` belongs to a different account than `user_id`.
    pub async fn email_taken_by_other(&self, email: &str, user_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM users WHERE email = lower(?1) AND id <> ?2",
                params![email, user_id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Updates whichever profile fields are provided and returns the new row.
    pub async fn update_profile(
        &self,
        user_id: &str,
        full_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserRecord>> {
        self.conn
            .execute(
                r#"
                UPDATE users SET
                    full_name = COALESCE(?2, full_name),
                    email = COALESCE(lower(?3), email),
                    updated_at = ?4
                WHERE id = ?1
                "#,
                params![user_id, full_name, email, now()],
            )
            .await
            .map_err(|err| conflict_on_duplicate(err, DUPLICATE_EMAIL))?;
        self.find_user_by_id(user_id).await
    }

    /// Points the avatar at a new media object. Returns the previous storage
    /// key so the caller can delete the old object.
    pub async fn replace_avatar(
        &self,
        user_id: &str,
        url: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let previous = self
            .find_user_by_id(user_id)
            .await?
            .and_then(|user| user.avatar_key);
        self.conn
            .execute(
                "UPDATE users SET avatar = ?2, avatar_key = ?3, updated_at = ?4 WHERE id = ?1",
                params![user_id, url, key, now()],
            )
            .await?;
        Ok(previous)
    }

    /// Same as [`Store::replace_avatar`] for the cover image.
    pub async fn replace_cover_image(
        &self,
        user_id: &str,
        url: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let previous = self
            .find_user_by_id(user_id)
            .await?
            .and_then(|user| user.cover_image_key);
        self.conn
            .execute(
                "UPDATE users SET cover_image = ?2, cover_image_key = ?3, updated_at = ?4 WHERE id = ?1",
                params![user_id, url, key, now()],
            )
            .await?;
        Ok(previous)
    }

    /// Public channel page for `username` as seen by `viewer_id`.
    pub async fn channel_profile(
        &self,
        username: &str,
        viewer_id: Option<&str>,
    ) -> Result<Option<ChannelProfile>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT u.id, u.username, u.full_name, u.email, u.avatar, u.cover_image,
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id),
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id),
                       EXISTS (
                           SELECT 1 FROM subscriptions s
                           WHERE s.channel_id = u.id AND s.subscriber_id = ?2
                       )
                FROM users u
                WHERE u.username = lower(?1)
                "#,
                params![username, viewer_id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(ChannelProfile {
            id: row.get(0)?,
            username: row.get(1)?,
            full_name: row.get(2)?,
            email: row.get(3)?,
            avatar: row.get(4)?,
            cover_image: row.get(5)?,
            subscribers_count: row.get(6)?,
            channels_subscribed_to_count: row.get(7)?,
            is_subscribed: row.get::<i64>(8)? != 0,
        }))
    }

    /// Moves `video_id` to the top of the user's watch history.
    pub async fn record_watch(&self, user_id: &str, video_id: &str) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO watch_history (user_id, video_id, watched_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id, video_id) DO UPDATE SET watched_at = excluded.watched_at
                "#,
                params![user_id, video_id, now()],
            )
            .await?;
        Ok(())
    }

    /// Watch history, most recent first. Videos the owner has since
    /// unpublished are hidden from everybody but the owner.
    pub async fn watch_history(&self, user_id: &str) -> Result<Vec<WatchedVideo>> {
        let sql = format!(
            "{} JOIN watch_history h ON h.video_id = v.id \
             WHERE h.user_id = ?1 AND (v.is_published = 1 OR v.owner_id = ?1) \
             ORDER BY h.watched_at DESC, h.rowid DESC",
            video_view_select("?1", ", h.watched_at"),
        );
        let mut rows = self.conn.query(&sql, params![user_id]).await?;
        let mut history = Vec::new();
        while let Some(row) = rows.next().await? {
            history.push(WatchedVideo {
                view: row_to_video_view(&row)?,
                watched_at: row.get(VIDEO_VIEW_COLUMN_COUNT)?,
            });
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Conflict;
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn create_and_find_user() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let created = insert_user(&store, "alice").await;

        let by_id = store.find_user_by_id(&created.id).await?.unwrap();
        assert_eq!(by_id.username, "alice");
        assert_eq!(by_id.email, "alice@example.test");
        assert!(by_id.refresh_token_hash.is_none());

        assert!(store.find_user_by_username("ALICE").await?.is_some());
        assert!(store.find_user_by_email("Alice@Example.test").await?.is_some());
        assert!(store.find_user_by_username("bob").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_username_or_email_is_detected() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        insert_user(&store, "alice").await;

        assert!(store.username_or_email_taken("alice", "x@y.z").await?);
        assert!(store.username_or_email_taken("other", "alice@example.test").await?);
        assert!(!store.username_or_email_taken("other", "x@y.z").await?);
        let err = store.create_user(&sample_user("alice")).await.unwrap_err();
        assert_eq!(err.downcast_ref::<Conflict>(), Some(&Conflict(DUPLICATE_USER)));
        Ok(())
    }

    #[tokio::test]
    async fn taking_another_users_email_is_a_conflict() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let alice = insert_user(&store, "alice").await;
        let bob = insert_user(&store, "bob").await;

        let err = store
            .update_profile(&bob.id, None, Some(&alice.email))
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Conflict>(), Some(&Conflict(DUPLICATE_EMAIL)));
        let bob = store.find_user_by_id(&bob.id).await?.unwrap();
        assert_eq!(bob.email, "bob@example.test");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_hash_rotates_only_once() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let user = insert_user(&store, "alice").await;

        store.set_refresh_token_hash(&user.id, Some("first")).await?;
        assert!(store.rotate_refresh_token_hash(&user.id, "first", "second").await?);
        assert!(!store.rotate_refresh_token_hash(&user.id, "first", "third").await?);

        let stored = store.find_user_by_id(&user.id).await?.unwrap();
        assert_eq!(stored.refresh_token_hash.as_deref(), Some("second"));

        store.set_refresh_token_hash(&user.id, None).await?;
        assert!(!store.rotate_refresh_token_hash(&user.id, "second", "x").await?);
        Ok(())
    }

    #[tokio::test]
    async fn update_profile_keeps_missing_fields() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let user = insert_user(&store, "alice").await;

        let updated = store
            .update_profile(&user.id, Some("Alice Liddell"), None)
            .await?
            .unwrap();
        assert_eq!(updated.full_name, "Alice Liddell");
        assert_eq!(updated.email, user.email);

        let updated = store
            .update_profile(&user.id, None, Some("NEW@Example.test"))
            .await?
            .unwrap();
        assert_eq!(updated.full_name, "Alice Liddell");
        assert_eq!(updated.email, "new@example.test");

        let bob = insert_user(&store, "bob").await;
        assert!(store.email_taken_by_other("new@example.test", &bob.id).await?);
        assert!(!store.email_taken_by_other("new@example.test", &user.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn replacing_images_returns_previous_keys() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let user = insert_user(&store, "alice").await;

        let old = store
            .replace_avatar(&user.id, "/media/avatars/new.png", "avatars/new.png")
            .await?;
        assert_eq!(old.as_deref(), Some("avatars/alice.png"));

        let old = store
            .replace_cover_image(&user.id, "/media/covers/c.png", "covers/c.png")
            .await?;
        assert!(old.is_none());

        let stored = store.find_user_by_id(&user.id).await?.unwrap();
        assert_eq!(stored.avatar, "/media/avatars/new.png");
        assert_eq!(stored.cover_image.as_deref(), Some("/media/covers/c.png"));
        assert_eq!(stored.cover_image_key.as_deref(), Some("covers/c.png"));
        Ok(())
    }

    #[tokio::test]
    async fn channel_profile_counts_subscriptions() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let alice = insert_user(&store, "alice").await;
        let bob = insert_user(&store, "bob").await;
        let carol = insert_user(&store, "carol").await;

        store.toggle_subscription(&bob.id, &alice.id).await?;
        store.toggle_subscription(&carol.id, &alice.id).await?;
        store.toggle_subscription(&alice.id, &carol.id).await?;

        let profile = store.channel_profile("alice", Some(&bob.id)).await?.unwrap();
        assert_eq!(profile.subscribers_count, 2);
        assert_eq!(profile.channels_subscribed_to_count, 1);
        assert!(profile.is_subscribed);

        let anonymous = store.channel_profile("alice", None).await?.unwrap();
        assert!(!anonymous.is_subscribed);
        assert!(store.channel_profile("nobody", None).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn watch_history_is_most_recent_first_without_duplicates() -> Result<()> {
        let (_dir, store) = open_temp_store().await;
        let alice = insert_user(&store, "alice").await;
        let bob = insert_user(&store, "bob").await;
        let first = insert_video(&store, &bob.id, "first").await;
        let second = insert_video(&store, &bob.id, "second").await;

        for video in [&first, &second, &first] {
            store.record_watch(&alice.id, &video.id).await?;
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let history = store.watch_history(&alice.id).await?;
        let ids: Vec<_> = history.iter().map(|entry| entry.view.video.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(history[0].view.owner.username, "bob");
        assert!(!history[0].watched_at.is_empty());

        store.toggle_publish(&second.id).await?;
        assert_eq!(store.watch_history(&alice.id).await?.len(), 1);
        Ok(())
    }
}
