#![forbid(unsafe_code)]

//! HTTP entry point. Resolves settings, opens the store and serves the API
//! plus the uploaded media until Ctrl+C.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method, header};
use clap::Parser;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use vidtube::{
    api::{AppState, router},
    auth::TokenKeys,
    config::{Settings, SettingsOverrides, resolve_settings},
    media::LocalMediaStorage,
    security::ensure_not_root,
    store::Store,
};

#[derive(Debug, Parser)]
#[command(name = "backend", about = "VidTube API server")]
struct BackendArgs {
    /// Directory holding uploaded media and, by default, the database.
    #[arg(long)]
    media_root: Option<PathBuf>,
    /// Env file read for settings; generated secrets are written back here.
    #[arg(long)]
    env_file: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

impl From<BackendArgs> for SettingsOverrides {
    fn from(args: BackendArgs) -> Self {
        Self {
            media_root: args.media_root,
            host: args.host,
            port: args.port,
            env_path: args.env_file,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse();

    ensure_not_root("backend")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = resolve_settings(args.into())?;

    let store = Store::open(&settings.database_path)
        .await
        .with_context(|| format!("opening database {}", settings.database_path.display()))?;
    let media = LocalMediaStorage::new(&settings.media_root)
        .with_context(|| format!("preparing media root {}", settings.media_root.display()))?;

    let state = AppState {
        store,
        media: Arc::new(media),
        tokens: Arc::new(TokenKeys::from_settings(&settings)),
        cookie_secure: settings.cookie_secure,
        upload_limit: settings.max_upload_bytes,
    };

    let app = router(state)
        .layer(cors_layer(&settings)?)
        .layer(TraceLayer::new_for_http());

    let addr = (settings.host.as_str(), settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}:{}", settings.host, settings.port))?;
    tracing::info!(
        "API server listening on http://{}",
        listener.local_addr().context("reading bound address")?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

/// `*` allows any origin without credentials; a concrete origin also gets
/// credentialed requests so the session cookies flow.
fn cors_layer(settings: &Settings) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::RANGE]);

    let origin = settings.cors_origin.trim();
    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }
    let origin = HeaderValue::from_str(origin)
        .with_context(|| format!("invalid CORS_ORIGIN {origin}"))?;
    Ok(layer
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {err}");
    }
    tracing::info!("shutting down");
}
