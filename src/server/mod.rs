//! HTTP surface: login flow, upstream proxy routes, and read access to the
//! local vault.

mod auth;
mod error;
mod local;
mod proxy;

pub use error::AppError;

use crate::api::spotify::SpotifyClient;
use crate::api::LibrarySource;
use crate::collector::{self, CollectionReport};
use crate::config::Config;
use crate::db::{self, Pool};
use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// OAuth `state` values are accepted for this long after `/login`.
const STATE_TTL_SECS: i64 = 600;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub started_at: Option<i64>,
    pub last_report: Option<CollectionReport>,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Pool,
    pub client: Arc<SpotifyClient>,
    /// What proxy routes and background syncs read from; the client itself in production.
    pub source: Arc<dyn LibrarySource>,
    pending_states: Arc<Mutex<HashMap<String, i64>>>,
    sync: Arc<Mutex<SyncStatus>>,
}

impl AppState {
    pub fn new(config: Config, pool: Pool, client: SpotifyClient) -> Self {
        let client = Arc::new(client);
        let source: Arc<dyn LibrarySource> = client.clone();
        Self {
            config: Arc::new(config),
            pool,
            client,
            source,
            pending_states: Arc::new(Mutex::new(HashMap::new())),
            sync: Arc::new(Mutex::new(SyncStatus::default())),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn LibrarySource>) -> Self {
        self.source = source;
        self
    }

    /// Run a blocking closure against a pooled connection.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(AppError::Database)
    }

    pub(crate) async fn remember_state(&self, state: String) {
        let now = Utc::now().timestamp();
        let mut pending = self.pending_states.lock().await;
        pending.retain(|_, created| now - *created < STATE_TTL_SECS);
        pending.insert(state, now);
    }

    /// One-shot: a state is consumed whether or not it is still valid.
    pub(crate) async fn take_state(&self, state: &str) -> bool {
        let now = Utc::now().timestamp();
        match self.pending_states.lock().await.remove(state) {
            Some(created) => now - created < STATE_TTL_SECS,
            None => false,
        }
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.sync.lock().await.clone()
    }

    /// Start a background sync. Returns false when one is already running.
    pub async fn start_sync(&self) -> bool {
        {
            let mut st = self.sync.lock().await;
            if st.running {
                return false;
            }
            st.running = true;
            st.started_at = Some(Utc::now().timestamp());
        }
        let state = self.clone();
        let config = self.config.clone();
        let source = self.source.clone();
        let work = tokio::spawn(async move { collector::run_full_sync(&config, source).await });
        // the status is updated from the join result so a panicking run still clears `running`
        tokio::spawn(async move {
            let result = work.await;
            let mut st = state.sync.lock().await;
            st.running = false;
            match result {
                Ok(Ok(report)) => {
                    st.last_error = report.error.clone();
                    st.last_report = Some(report);
                }
                Ok(Err(e)) => {
                    error!("background sync failed: {:#}", e);
                    st.last_error = Some(e.to_string());
                }
                Err(e) => {
                    error!("background sync task died: {}", e);
                    st.last_error = Some(format!("sync task died: {}", e));
                }
            }
        });
        true
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(auth::index))
        .route("/login", get(auth::login))
        .route("/authorize", get(auth::authorize))
        // upstream proxy
        .route("/user", get(proxy::user))
        .route("/user/playlists", get(proxy::user_playlists))
        .route("/user/saved_tracks", get(proxy::saved_tracks))
        .route("/user/top/{kind}", get(proxy::top_items))
        .route("/user/followed_artists", get(proxy::followed_artists))
        .route("/playlist/{id}", get(proxy::playlist))
        .route("/playlist/{id}/items", get(proxy::playlist_items))
        .route("/playlist/{id}/cover", get(proxy::playlist_cover))
        .route("/track/{id}", get(proxy::track))
        .route("/track/{id}/audio_features", get(proxy::track_audio_features))
        .route("/track/{id}/audio_analysis", get(proxy::track_audio_analysis))
        .route("/tracks", get(proxy::several_tracks))
        .route("/audio_features", get(proxy::several_audio_features))
        // local vault
        .route("/health", get(local::health))
        .route("/db-test", get(local::db_test))
        .route("/db-stats", get(local::db_stats))
        .route("/sync", post(local::start_sync))
        .route("/sync/status", get(local::sync_status))
        .route("/library/user", get(local::library_user))
        .route("/library/playlists", get(local::library_playlists))
        .route("/library/playlists/{id}", get(local::library_playlist))
        .route("/library/saved_tracks", get(local::library_saved_tracks))
        .route("/library/top/{kind}", get(local::library_top))
        .route("/library/followed_artists", get(local::library_followed_artists))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
    }
    info!("Shutting down");
}

/// Bind `cfg.bind_addr` and serve until ctrl-c.
pub async fn serve(cfg: Config) -> Result<()> {
    cfg.validate_required()?;
    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr {}", cfg.bind_addr))?;
    let pool = db::create_pool(&cfg.db_path)?;
    let client = SpotifyClient::new(&cfg);
    let state = AppState::new(cfg, pool, client);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
