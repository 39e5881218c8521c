//! Full library sync.
//!
//! Steps run in a fixed order because later ones reference rows stored by
//! earlier ones: profile, playlists (with their tracks), saved tracks, top
//! items per time range, followed artists, audio features, and optionally
//! audio analysis. A failing profile fetch aborts the run; any other failure
//! is counted, logged and the run moves on.

use crate::api::LibrarySource;
use crate::config::Config;
use crate::db;
use crate::models::{Artist, PlaylistItem, SavedTrackItem, TimeRange, Track};
use crate::store::{self, DatabaseStats};
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

const FEATURE_BATCH: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub users: u64,
    pub artists: u64,
    pub albums: u64,
    pub tracks: u64,
    pub playlists: u64,
    pub playlist_tracks: u64,
    pub saved_tracks: u64,
    pub top_tracks: u64,
    pub top_artists: u64,
    pub followed_artists: u64,
    pub audio_features: u64,
    pub audio_analysis: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReport {
    pub run_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub user_id: Option<String>,
    pub elapsed_secs: f64,
    pub database_stats: Option<DatabaseStats>,
    pub collection_stats: CollectionStats,
    pub total_errors: u64,
}

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub pacing: Duration,
    pub enable_audio_analysis: bool,
    pub audio_analysis_limit: usize,
    pub audio_analysis_sleep: Duration,
}

impl From<&Config> for CollectorOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            pacing: Duration::from_millis(cfg.request_pacing_ms),
            enable_audio_analysis: cfg.enable_audio_analysis,
            audio_analysis_limit: cfg.audio_analysis_limit,
            audio_analysis_sleep: Duration::from_millis(cfg.audio_analysis_sleep_ms),
        }
    }
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            pacing: Duration::ZERO,
            enable_audio_analysis: false,
            audio_analysis_limit: 100,
            audio_analysis_sleep: Duration::ZERO,
        }
    }
}

pub struct Collector {
    source: Arc<dyn LibrarySource>,
    conn: Arc<Mutex<Connection>>,
    opts: CollectorOptions,
    stats: CollectionStats,
}

impl Collector {
    pub fn new(source: Arc<dyn LibrarySource>, conn: Connection, opts: CollectorOptions) -> Self {
        Self { source, conn: Arc::new(Mutex::new(conn)), opts, stats: CollectionStats::default() }
    }

    /// Run a blocking DB closure off the async executor.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| anyhow!("database connection lock poisoned"))?;
            f(&guard)
        })
        .await?
    }

    async fn pace(&self, d: Duration) {
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    fn count_error(&mut self, what: &str, e: &dyn std::fmt::Display) {
        warn!("{}: {}", what, e);
        self.stats.errors += 1;
    }

    pub async fn collect_all(mut self) -> CollectionReport {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(run_id = %run_id, "Starting library sync");

        let rid = run_id.clone();
        if let Err(e) = self.with_db(move |c| db::start_sync_run(c, &rid)).await {
            self.count_error("recording sync run", &e);
        }

        let outcome = self.run_steps().await;
        let elapsed_secs = started.elapsed().as_secs_f64();
        let database_stats = self.with_db(|c| store::database_stats(c)).await.ok();

        let (success, error, user_id) = match outcome {
            Ok(user_id) => (true, None, Some(user_id)),
            Err(e) => {
                error!("Library sync aborted: {:#}", e);
                (false, Some(e.to_string()), None)
            }
        };
        let report = CollectionReport {
            run_id: run_id.clone(),
            success,
            error,
            user_id: user_id.clone(),
            elapsed_secs,
            database_stats,
            total_errors: self.stats.errors,
            collection_stats: self.stats.clone(),
        };

        let status = if report.success { "success" } else { "failed" };
        let report_json = serde_json::to_string(&report).unwrap_or_default();
        let status_owned = status.to_string();
        if let Err(e) = self
            .with_db(move |c| db::finish_sync_run(c, &run_id, user_id.as_deref(), &status_owned, &report_json))
            .await
        {
            warn!("failed to record sync run result: {}", e);
        }
        info!(
            success = report.success,
            errors = report.total_errors,
            elapsed_secs = report.elapsed_secs,
            "Library sync finished"
        );
        report
    }

    async fn run_steps(&mut self) -> Result<String> {
        let user_id = self.collect_profile().await?;
        self.collect_playlists(&user_id).await;
        self.collect_saved_tracks(&user_id).await;
        self.collect_top_items(&user_id).await;
        self.collect_followed_artists(&user_id).await;
        self.collect_audio_features().await;
        if self.opts.enable_audio_analysis {
            self.collect_audio_analysis().await;
        }
        Ok(user_id)
    }

    async fn collect_profile(&mut self) -> Result<String> {
        let profile = match self.source.current_user().await {
            Ok(p) => p,
            Err(e) => {
                self.stats.errors += 1;
                return Err(anyhow!("No user profile: {}", e));
            }
        };
        let id = profile.id.clone();
        self.with_db(move |c| store::store_user(c, &profile)).await?;
        self.stats.users += 1;
        info!("Collecting data for user {}", id);
        Ok(id)
    }

    /// Store a track with its album, the album's artists and the track's artists,
    /// plus the link rows between them.
    async fn store_track_with_dependencies(&mut self, track: &Track) -> Result<()> {
        if track.id.is_none() {
            return Ok(());
        }
        let t = track.clone();
        let (albums, artists) = self
            .with_db(move |c| {
                let mut albums = 0u64;
                let mut artists = 0u64;
                let mut album_id = None;
                if let Some(album) = t.album.as_ref().filter(|a| a.id.is_some()) {
                    store::store_album(c, album)?;
                    albums += 1;
                    for a in album.artists.iter().filter(|a| a.id.is_some()) {
                        store::store_artist(c, a)?;
                        artists += 1;
                    }
                    album_id = album.id.clone();
                    if let Some(id) = album_id.as_deref() {
                        store::link_album_artists(c, id, &album.artists)?;
                    }
                }
                for a in t.artists.iter().filter(|a| a.id.is_some()) {
                    store::store_artist(c, a)?;
                    artists += 1;
                }
                store::store_track(c, &t, album_id.as_deref())?;
                if let Some(id) = t.id.as_deref() {
                    store::link_track_artists(c, id, &t.artists)?;
                }
                Ok((albums, artists))
            })
            .await?;
        self.stats.albums += albums;
        self.stats.artists += artists;
        self.stats.tracks += 1;
        Ok(())
    }

    async fn collect_playlists(&mut self, user_id: &str) {
        let playlists = match self.source.user_playlists().await {
            Ok(p) => p,
            Err(e) => return self.count_error("Error collecting playlists", &e),
        };
        info!("Found {} playlists", playlists.len());

        let total = playlists.len();
        for (i, playlist) in playlists.into_iter().enumerate() {
            info!("Processing playlist {}/{}: {}", i + 1, total, playlist.name);
            // playlists owned by other users still belong to this user's library
            let pl = playlist.clone();
            let owner = user_id.to_string();
            if let Err(e) = self.with_db(move |c| store::store_playlist(c, &pl, &owner)).await {
                self.count_error(&format!("Error storing playlist {}", playlist.name), &e);
                continue;
            }
            self.stats.playlists += 1;

            match self.source.playlist_items(&playlist.id).await {
                Ok(items) => {
                    let linked = self.process_playlist_items(&playlist.id, &items).await;
                    info!("Stored {} tracks for {}", linked, playlist.name);
                    self.stats.playlist_tracks += linked as u64;
                }
                Err(e) => self.count_error(&format!("Error processing playlist {}", playlist.name), &e),
            }
            self.pace(self.opts.pacing).await;
        }
    }

    async fn process_playlist_items(&mut self, playlist_id: &str, items: &[PlaylistItem]) -> usize {
        let mut usable: Vec<PlaylistItem> = Vec::with_capacity(items.len());
        for item in items {
            let Some(track) = item.track.as_ref().filter(|t| t.id.is_some()) else { continue };
            match self.store_track_with_dependencies(track).await {
                Ok(()) => usable.push(item.clone()),
                Err(e) => self.count_error("Error processing track", &e),
            }
        }
        // keep upstream positions: failed or id-less items leave their slot empty
        let stored: std::collections::HashSet<String> =
            usable.iter().filter_map(|i| i.track_id().map(str::to_string)).collect();
        let linkable: Vec<PlaylistItem> = items
            .iter()
            .map(|i| match i.track_id() {
                Some(id) if stored.contains(id) => i.clone(),
                _ => PlaylistItem { track: None, ..i.clone() },
            })
            .collect();
        let pid = playlist_id.to_string();
        match self.with_db(move |c| store::link_playlist_tracks(c, &pid, &linkable)).await {
            Ok(n) => n,
            Err(e) => {
                self.count_error("Error linking playlist tracks", &e);
                0
            }
        }
    }

    async fn collect_saved_tracks(&mut self, user_id: &str) {
        let saved: Vec<SavedTrackItem> = match self.source.saved_tracks().await {
            Ok(s) => s,
            Err(e) => return self.count_error("Error collecting saved tracks", &e),
        };
        info!("Found {} saved tracks", saved.len());
        let mut storable = Vec::with_capacity(saved.len());
        for item in saved {
            if item.track.id.is_none() {
                continue;
            }
            match self.store_track_with_dependencies(&item.track).await {
                Ok(()) => storable.push(item),
                Err(e) => self.count_error("Error storing saved track", &e),
            }
        }
        let uid = user_id.to_string();
        match self.with_db(move |c| store::store_saved_tracks(c, &uid, &storable)).await {
            Ok(n) => {
                info!("Stored {} new saved tracks", n);
                self.stats.saved_tracks += n as u64;
            }
            Err(e) => self.count_error("Error storing saved tracks", &e),
        }
    }

    async fn collect_top_items(&mut self, user_id: &str) {
        for range in TimeRange::ALL {
            match self.source.top_tracks(range).await {
                Ok(tracks) => {
                    let mut stored: Vec<Track> = Vec::with_capacity(tracks.len());
                    for t in tracks.into_iter().filter(|t| t.id.is_some()) {
                        match self.store_track_with_dependencies(&t).await {
                            Ok(()) => stored.push(t),
                            Err(e) => self.count_error("Error storing top track", &e),
                        }
                    }
                    let uid = user_id.to_string();
                    match self.with_db(move |c| store::store_top_tracks(c, &uid, &stored, range)).await {
                        Ok(n) => {
                            info!("[{}] Stored {} top tracks", range.as_str(), n);
                            self.stats.top_tracks += n as u64;
                        }
                        Err(e) => self.count_error("Error storing top tracks", &e),
                    }
                }
                Err(e) => self.count_error(&format!("Error collecting {} top tracks", range.as_str()), &e),
            }

            match self.source.top_artists(range).await {
                Ok(artists) => {
                    let artists: Vec<Artist> = artists.into_iter().filter(|a| a.id.is_some()).collect();
                    let uid = user_id.to_string();
                    let res = self
                        .with_db(move |c| {
                            for a in &artists {
                                store::store_artist(c, a)?;
                            }
                            let n = store::store_top_artists(c, &uid, &artists, range)?;
                            Ok((artists.len() as u64, n))
                        })
                        .await;
                    match res {
                        Ok((artists, n)) => {
                            info!("[{}] Stored {} top artists", range.as_str(), n);
                            self.stats.artists += artists;
                            self.stats.top_artists += n as u64;
                        }
                        Err(e) => self.count_error("Error storing top artists", &e),
                    }
                }
                Err(e) => self.count_error(&format!("Error collecting {} top artists", range.as_str()), &e),
            }
        }
    }

    async fn collect_followed_artists(&mut self, user_id: &str) {
        let artists = match self.source.followed_artists().await {
            Ok(a) => a,
            Err(e) => return self.count_error("Error collecting followed artists", &e),
        };
        if artists.is_empty() {
            info!("No followed artists found");
        }
        let artists: Vec<Artist> = artists.into_iter().filter(|a| a.id.is_some()).collect();
        let uid = user_id.to_string();
        let res = self
            .with_db(move |c| {
                for a in &artists {
                    store::store_artist(c, a)?;
                }
                let n = store::link_followed_artists(c, &uid, &artists)?;
                Ok((artists.len() as u64, n))
            })
            .await;
        match res {
            Ok((stored, linked)) => {
                info!("Stored {} followed artists", linked);
                self.stats.artists += stored;
                self.stats.followed_artists += linked as u64;
            }
            Err(e) => self.count_error("Error storing followed artists", &e),
        }
    }

    async fn collect_audio_features(&mut self) {
        let missing = match self.with_db(|c| store::tracks_missing_audio_features(c)).await {
            Ok(ids) => ids,
            Err(e) => return self.count_error("Error listing tracks without audio features", &e),
        };
        if missing.is_empty() {
            info!("No missing audio features; skipping");
            return;
        }
        info!("Missing audio features for {} tracks; fetching in batches", missing.len());

        let mut added = 0u64;
        for (n, batch) in missing.chunks(FEATURE_BATCH).enumerate() {
            match self.source.audio_features(batch).await {
                Ok(features) => {
                    let res = self
                        .with_db(move |c| {
                            let tx = c.unchecked_transaction()?;
                            for f in &features {
                                store::store_audio_features(&tx, f)?;
                            }
                            tx.commit()?;
                            Ok(features.len() as u64)
                        })
                        .await;
                    match res {
                        Ok(k) => added += k,
                        Err(e) => self.count_error(&format!("Batch {}: error storing audio features", n + 1), &e),
                    }
                }
                Err(e) => self.count_error(&format!("Batch {}: error fetching audio features", n + 1), &e),
            }
            self.pace(self.opts.pacing).await;
        }
        self.stats.audio_features += added;
        info!("Stored audio features for {} tracks", added);
    }

    async fn collect_audio_analysis(&mut self) {
        let limit = self.opts.audio_analysis_limit;
        let missing = match self.with_db(move |c| store::tracks_missing_audio_analysis(c, limit)).await {
            Ok(ids) => ids,
            Err(e) => return self.count_error("Error listing tracks without audio analysis", &e),
        };
        if missing.is_empty() {
            info!("No missing audio analysis; skipping");
            return;
        }
        info!("Fetching analysis for up to {} tracks (limit={})", missing.len(), limit);

        let mut added = 0u64;
        for track_id in missing {
            match self.source.audio_analysis(&track_id).await {
                Ok(analysis) => {
                    let tid = track_id.clone();
                    match self.with_db(move |c| store::store_audio_analysis(c, &analysis, &tid)).await {
                        Ok(()) => added += 1,
                        Err(e) => self.count_error(&format!("Error storing analysis for {}", track_id), &e),
                    }
                }
                Err(e) => self.count_error(&format!("Error fetching analysis for {}", track_id), &e),
            }
            self.pace(self.opts.audio_analysis_sleep).await;
        }
        self.stats.audio_analysis += added;
        info!("Stored audio analysis for {} tracks", added);
    }
}

/// Open the vault, run a full sync against `source`, then push a backup when
/// one is configured. Backup failures are logged and don't fail the sync.
pub async fn run_full_sync(cfg: &Config, source: Arc<dyn LibrarySource>) -> Result<CollectionReport> {
    let db_path = cfg.db_path.clone();
    let conn = tokio::task::spawn_blocking(move || db::open_or_create(&db_path)).await??;
    let report = Collector::new(source, conn, CollectorOptions::from(cfg)).collect_all().await;
    if report.success {
        if let Err(e) = crate::backup::run_configured(cfg).await {
            warn!("backup after sync failed: {:#}", e);
        }
    }
    Ok(report)
}
