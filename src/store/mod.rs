//! Persistence layer for VidTube, backed by a local libsql (SQLite) database.
//!
//! Every table lives in one file under `MEDIA_ROOT`. The read models that the
//! API exposes (videos with owner details and like counts, channel profiles,
//! dashboard totals) are plain SQL joins; the per-entity `impl Store` blocks
//! live in the submodules.

mod comments;
mod dashboard;
mod likes;
mod playlists;
mod subscriptions;
mod tweets;
mod users;
mod videos;

pub(crate) use playlists::DUPLICATE_PLAYLIST;
pub(crate) use users::{DUPLICATE_EMAIL, DUPLICATE_USER};
pub use videos::{VideoQuery, VideoSort};

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use libsql::{Builder, Connection, Row, params};
use uuid::Uuid;

use crate::models::{OwnerSummary, UserRecord, VideoRecord, VideoView};

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            avatar TEXT NOT NULL,
            avatar_key TEXT,
            cover_image TEXT,
            cover_image_key TEXT,
            password_hash TEXT NOT NULL,
            refresh_token_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            video_file TEXT NOT NULL,
            video_key TEXT,
            thumbnail TEXT NOT NULL,
            thumbnail_key TEXT,
            duration REAL NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS watch_history (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            video_id TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            watched_at TEXT NOT NULL,
            PRIMARY KEY (user_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            video_id TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tweets (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS likes (
            id TEXT PRIMARY KEY,
            video_id TEXT REFERENCES videos(id) ON DELETE CASCADE,
            comment_id TEXT REFERENCES comments(id) ON DELETE CASCADE,
            tweet_id TEXT REFERENCES tweets(id) ON DELETE CASCADE,
            liked_by TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            CHECK (
                (video_id IS NOT NULL) + (comment_id IS NOT NULL) + (tweet_id IS NOT NULL) = 1
            )
        );

        CREATE TABLE IF NOT EXISTS playlists (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (owner_id, name)
        );

        CREATE TABLE IF NOT EXISTS playlist_videos (
            playlist_id TEXT NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
            video_id TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            added_at TEXT NOT NULL,
            PRIMARY KEY (playlist_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            subscriber_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            channel_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            UNIQUE (subscriber_id, channel_id)
        );

        CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner_id);
        CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id);
        CREATE INDEX IF NOT EXISTS idx_tweets_owner ON tweets(owner_id);
        CREATE INDEX IF NOT EXISTS idx_history_user ON watch_history(user_id, watched_at);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_video
            ON likes(video_id, liked_by) WHERE video_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_comment
            ON likes(comment_id, liked_by) WHERE comment_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_tweet
            ON likes(tweet_id, liked_by) WHERE tweet_id IS NOT NULL;
        "#,
    )
    .await?;

    Ok(())
}

/// Handle to the platform database. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (and if necessary creates) the database and ensures the schema
    /// exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Cheap round trip used by the health check.
    pub async fn ping(&self) -> Result<()> {
        let mut rows = self.conn.query("SELECT 1", params![]).await?;
        rows.next().await?.context("database returned no row")?;
        Ok(())
    }

    /// Whether a row with `id` exists in one of our own tables.
    async fn exists(&self, table: &str, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                params![id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn user_exists(&self, id: &str) -> Result<bool> {
        self.exists("users", id).await
    }

    /// Runs a `SELECT COUNT(..)`-style query and returns the first column.
    async fn count(&self, sql: &str, id: &str) -> Result<i64> {
        let mut rows = self.conn.query(sql, params![id]).await?;
        let row = rows.next().await?.context("missing count row")?;
        Ok(row.get::<i64>(0)?)
    }
}

/// A write refused by one of the UNIQUE constraints. The message is meant
/// for clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict(pub &'static str);

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for Conflict {}

const SQLITE_CONSTRAINT: i32 = 19;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

pub(crate) fn is_unique_violation(err: &libsql::Error) -> bool {
    match err {
        libsql::Error::SqliteFailure(code, message) => {
            *code == SQLITE_CONSTRAINT_UNIQUE
                || *code == SQLITE_CONSTRAINT_PRIMARYKEY
                || (*code & 0xff == SQLITE_CONSTRAINT
                    && message.contains("UNIQUE constraint failed"))
        }
        _ => false,
    }
}

/// Maps a duplicate-key failure to [`Conflict`]; any other error passes
/// through untouched.
pub(crate) fn conflict_on_duplicate(err: libsql::Error, message: &'static str) -> anyhow::Error {
    if is_unique_violation(&err) {
        Conflict(message).into()
    } else {
        err.into()
    }
}

/// Ids are random UUIDs rendered in their hyphenated form.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Rejects path parameters that cannot possibly be an id we issued.
pub fn is_valid_id(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

/// RFC 3339 with fixed millisecond precision so the strings sort correctly.
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) const USER_COLUMNS: &str = "u.id, u.username, u.email, u.full_name, u.avatar, \
     u.avatar_key, u.cover_image, u.cover_image_key, u.password_hash, u.refresh_token_hash, \
     u.created_at, u.updated_at";

pub(crate) const VIDEO_COLUMNS: &str = "v.id, v.owner_id, v.title, v.description, \
     v.video_file, v.video_key, v.thumbnail, v.thumbnail_key, v.duration, v.views, \
     v.is_published, v.created_at, v.updated_at";
const VIDEO_COLUMN_COUNT: i32 = 13;

pub(crate) const OWNER_COLUMNS: &str = "o.id, o.username, o.full_name, o.avatar";
const OWNER_COLUMN_COUNT: i32 = 4;

/// SELECT list and FROM clause producing rows readable by
/// [`row_to_video_view`]. `viewer` is the SQL placeholder holding the viewer
/// id (or NULL) used for `is_liked`; `extra_columns` (empty or starting with
/// a comma) land at [`VIDEO_VIEW_COLUMN_COUNT`] and later.
pub(crate) fn video_view_select(viewer: &str, extra_columns: &str) -> String {
    format!(
        "SELECT {VIDEO_COLUMNS}, {OWNER_COLUMNS}, \
         (SELECT COUNT(*) FROM likes l WHERE l.video_id = v.id) AS total_likes, \
         EXISTS (SELECT 1 FROM likes l WHERE l.video_id = v.id AND l.liked_by = {viewer}) AS is_liked\
         {extra_columns} \
         FROM videos v JOIN users o ON o.id = v.owner_id"
    )
}

/// Index of the first column after a [`video_view_select`] row.
pub(crate) const VIDEO_VIEW_COLUMN_COUNT: i32 = VIDEO_COLUMN_COUNT + OWNER_COLUMN_COUNT + 2;

pub(crate) fn row_to_user(row: &Row) -> Result<UserRecord> {
    // Column order must match USER_COLUMNS.
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        avatar: row.get(4)?,
        avatar_key: row.get(5)?,
        cover_image: row.get(6)?,
        cover_image_key: row.get(7)?,
        password_hash: row.get(8)?,
        refresh_token_hash: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub(crate) fn row_to_video(row: &Row, start: i32) -> Result<VideoRecord> {
    // Column order must match VIDEO_COLUMNS.
    Ok(VideoRecord {
        id: row.get(start)?,
        owner_id: row.get(start + 1)?,
        title: row.get(start + 2)?,
        description: row.get(start + 3)?,
        video_file: row.get(start + 4)?,
        video_key: row.get(start + 5)?,
        thumbnail: row.get(start + 6)?,
        thumbnail_key: row.get(start + 7)?,
        duration: row.get(start + 8)?,
        views: row.get(start + 9)?,
        is_published: row.get::<i64>(start + 10)? != 0,
        created_at: row.get(start + 11)?,
        updated_at: row.get(start + 12)?,
    })
}

pub(crate) fn row_to_owner(row: &Row, start: i32) -> Result<OwnerSummary> {
    Ok(OwnerSummary {
        id: row.get(start)?,
        username: row.get(start + 1)?,
        full_name: row.get(start + 2)?,
        avatar: row.get(start + 3)?,
    })
}

pub(crate) fn row_to_video_view(row: &Row) -> Result<VideoView> {
    let video = row_to_video(row, 0)?;
    let owner = row_to_owner(row, VIDEO_COLUMN_COUNT)?;
    let likes_at = VIDEO_COLUMN_COUNT + OWNER_COLUMN_COUNT;
    Ok(VideoView {
        video,
        owner,
        total_likes: row.get(likes_at)?,
        is_liked: row.get::<i64>(likes_at + 1)? != 0,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn opens_store_and_creates_schema() -> Result<()> {
        let (dir, store) = open_temp_store().await;
        assert!(dir.path().join("db/vidtube.db").exists());
        store.ping().await?;

        let mut rows = store.conn.query("PRAGMA journal_mode", params![]).await?;
        let journal: String = rows.next().await?.context("missing row")?.get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");

        for table in [
            "users",
            "videos",
            "watch_history",
            "comments",
            "tweets",
            "likes",
            "playlists",
            "playlist_videos",
            "subscriptions",
        ] {
            let mut rows = store
                .conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                )
                .await?;
            assert!(rows.next().await?.is_some(), "missing table {table}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("vidtube.db");
        {
            let store = Store::open(&path).await?;
            insert_user(&store, "alice").await;
        }
        let store = Store::open(&path).await?;
        assert!(store.find_user_by_username("alice").await?.is_some());
        Ok(())
    }

    #[test]
    fn ids_are_uuids() {
        let id = new_id();
        assert!(is_valid_id(&id));
        assert!(!is_valid_id("not-an-id"));
        assert!(!is_valid_id(""));
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let first = now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = now();
        assert!(first < second);
        assert!(first.ends_with('Z'));
    }
}
