#![forbid(unsafe_code)]

//! VidTube: a video-sharing backend. Users publish videos, comment, like,
//! keep playlists, post short tweets and subscribe to channels. Metadata lives
//! in SQLite through libsql and uploaded media on the local disk.

pub mod api;
pub mod auth;
pub mod config;
pub mod media;
pub mod models;
pub mod security;
pub mod store;
