use super::oauth::{OAuthApp, StoredToken};
use super::{LibrarySource, SpotifyError, SpotifyResult};
use crate::config::Config;
use crate::db;
use crate::models::{
    Artist, AudioAnalysis, AudioFeatures, CursorPage, Image, Paging, Playlist, PlaylistItem, SavedTrackItem,
    TimeRange, Track, UserProfile,
};
use crate::retry::{retry, RetryConfig};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;

/// Credentials row used for the upstream token.
pub const PROVIDER: &str = "spotify";

const TRACKS_PER_REQUEST: usize = 50;
const FEATURES_PER_REQUEST: usize = 100;

fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Client for the upstream Web API.
/// Token management reads token JSON from the DB and persists refreshed tokens.
/// Base URLs default to `Config::api_base()` / `Config::auth_base()` and can be
/// overridden per instance (tests point them at a mock server).
pub struct SpotifyClient {
    client: Client,
    oauth: OAuthApp,
    db_path: PathBuf,
    api_base: String,
    retry: RetryConfig,
    token: tokio::sync::Mutex<Option<StoredToken>>,
}

#[derive(Deserialize)]
struct SeveralTracks {
    #[serde(default)]
    tracks: Vec<Option<Track>>,
}

#[derive(Deserialize)]
struct SeveralFeatures {
    #[serde(default)]
    audio_features: Vec<Option<AudioFeatures>>,
}

impl SpotifyClient {
    pub fn new(cfg: &Config) -> Self {
        let mut oauth = OAuthApp::from_config(cfg);
        // If either client_id or client_secret is empty, try the values saved with the token
        if oauth.client_id.is_empty() || oauth.client_secret.is_empty() {
            if let Ok(conn) = rusqlite::Connection::open(&cfg.db_path) {
                if let Ok(Some((_token_json, db_client_id, db_client_secret))) =
                    db::load_credential_with_client(&conn, PROVIDER)
                {
                    if oauth.client_id.is_empty() {
                        oauth.client_id = db_client_id.unwrap_or_default();
                    }
                    if oauth.client_secret.is_empty() {
                        oauth.client_secret = db_client_secret.unwrap_or_default();
                    }
                }
            }
        }
        Self {
            client: Client::new(),
            oauth,
            db_path: cfg.db_path.clone(),
            api_base: Config::api_base(),
            retry: cfg.retry_config(),
            token: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_auth_base(mut self, base: impl Into<String>) -> Self {
        self.oauth = self.oauth.with_auth_base(base);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn oauth(&self) -> &OAuthApp {
        &self.oauth
    }

    async fn load_token_from_db(&self) -> SpotifyResult<Option<StoredToken>> {
        let db_path = self.db_path.clone();
        let json_opt = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<String>> {
            let conn = rusqlite::Connection::open(db_path)?;
            Ok(db::load_credential_with_client(&conn, PROVIDER)?.map(|(json, _, _)| json))
        })
        .await
        .map_err(|e| SpotifyError::Store(e.to_string()))?
        .map_err(|e| SpotifyError::Store(e.to_string()))?;

        match json_opt {
            Some(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| SpotifyError::Decode(format!("stored token: {}", e))),
            None => Ok(None),
        }
    }

    async fn persist_token_to_db(&self, st: &StoredToken) -> SpotifyResult<()> {
        let db_path = self.db_path.clone();
        let s = serde_json::to_string(st).map_err(|e| SpotifyError::Decode(e.to_string()))?;
        let client_id = self.oauth.client_id.clone();
        let client_secret = self.oauth.client_secret.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = rusqlite::Connection::open(db_path)?;
            let non_empty = |v: &str| if v.is_empty() { None } else { Some(v.to_string()) };
            db::save_credential_raw(
                &conn,
                PROVIDER,
                &s,
                non_empty(&client_id).as_deref(),
                non_empty(&client_secret).as_deref(),
            )
        })
        .await
        .map_err(|e| SpotifyError::Store(e.to_string()))?
        .map_err(|e| SpotifyError::Store(e.to_string()))
    }

    /// Persist a freshly exchanged token and make it the active one.
    pub async fn install_token(&self, st: StoredToken) -> SpotifyResult<()> {
        self.persist_token_to_db(&st).await?;
        *self.token.lock().await = Some(st);
        Ok(())
    }

    pub async fn has_token(&self) -> bool {
        if self.token.lock().await.is_some() {
            return true;
        }
        matches!(self.load_token_from_db().await, Ok(Some(_)))
    }

    async fn refresh_locked(&self, slot: &mut Option<StoredToken>) -> SpotifyResult<()> {
        let cur = slot.as_ref().ok_or(SpotifyError::NotAuthenticated)?;
        let refreshed = match self.oauth.refresh(cur).await {
            Ok(t) => t,
            // 400 invalid_grant / 401 invalid_client: the user has to log in again
            Err(SpotifyError::Status { status: 400 | 401, body }) => {
                warn!("token refresh rejected: {}", body);
                return Err(SpotifyError::Unauthorized);
            }
            Err(e) => return Err(e),
        };
        self.persist_token_to_db(&refreshed).await?;
        *slot = Some(refreshed);
        Ok(())
    }

    async fn ensure_token(&self) -> SpotifyResult<()> {
        let mut lock = self.token.lock().await;
        if lock.is_none() {
            *lock = self.load_token_from_db().await?;
        }
        let expiring = match lock.as_ref() {
            Some(st) => st.is_expiring(Utc::now().timestamp()),
            None => return Err(SpotifyError::NotAuthenticated),
        };
        if expiring {
            debug!("Spotify token is near expiry, refreshing");
            self.refresh_locked(&mut lock).await?;
        }
        Ok(())
    }

    /// Refresh regardless of expiry; used after the upstream rejects a token.
    async fn force_refresh(&self, rejected: &str) -> SpotifyResult<()> {
        let mut lock = self.token.lock().await;
        // another request may already have refreshed it
        if let Some(st) = lock.as_ref() {
            if st.access_token != rejected {
                return Ok(());
            }
        }
        self.refresh_locked(&mut lock).await
    }

    pub async fn get_bearer(&self) -> SpotifyResult<String> {
        self.ensure_token().await?;
        let lock = self.token.lock().await;
        let st = lock.as_ref().ok_or(SpotifyError::NotAuthenticated)?;
        Ok(format!("Bearer {}", st.access_token))
    }

    async fn send_get(&self, url: &str, bearer: &str) -> SpotifyResult<Response> {
        Ok(self
            .client
            .get(url)
            .header(AUTHORIZATION, bearer)
            .header(ACCEPT, "application/json")
            .send()
            .await?)
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> SpotifyResult<T> {
        let bearer = self.get_bearer().await?;
        let mut resp = self.send_get(url, &bearer).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("Got 401 for {}; attempting token refresh", url);
            let rejected = bearer.trim_start_matches("Bearer ").to_string();
            self.force_refresh(&rejected).await?;
            let bearer2 = self.get_bearer().await?;
            resp = self.send_get(url, &bearer2).await?;
        }
        decode_response(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> SpotifyResult<T> {
        retry(&self.retry, || self.get_once::<T>(url)).await
    }

    /// Follow `next` links until the last page.
    async fn get_all_pages<T: DeserializeOwned>(&self, first: String) -> SpotifyResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let page: Paging<T> = self.get_json(&url).await?;
            items.extend(page.items);
            next = page.next;
        }
        Ok(items)
    }
}

async fn decode_response<T: DeserializeOwned>(resp: Response) -> SpotifyResult<T> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(SpotifyError::Unauthorized);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return Err(SpotifyError::RateLimited { retry_after });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SpotifyError::Status { status: status.as_u16(), body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| SpotifyError::Decode(e.to_string()))
}

#[async_trait]
impl LibrarySource for SpotifyClient {
    async fn current_user(&self) -> SpotifyResult<UserProfile> {
        self.get_json(&format!("{}/me", self.api_base)).await
    }

    async fn user_playlists(&self) -> SpotifyResult<Vec<Playlist>> {
        self.get_all_pages(format!("{}/me/playlists?limit=50", self.api_base)).await
    }

    async fn playlist(&self, playlist_id: &str) -> SpotifyResult<Playlist> {
        self.get_json(&format!("{}/playlists/{}", self.api_base, encode(playlist_id))).await
    }

    async fn playlist_items(&self, playlist_id: &str) -> SpotifyResult<Vec<PlaylistItem>> {
        self.get_all_pages(format!(
            "{}/playlists/{}/tracks?limit=100&additional_types=track",
            self.api_base,
            encode(playlist_id)
        ))
        .await
    }

    async fn playlist_cover_image(&self, playlist_id: &str) -> SpotifyResult<Vec<Image>> {
        let images: Option<Vec<Image>> = self
            .get_json(&format!("{}/playlists/{}/images", self.api_base, encode(playlist_id)))
            .await?;
        Ok(images.unwrap_or_default())
    }

    async fn track(&self, track_id: &str) -> SpotifyResult<Track> {
        self.get_json(&format!("{}/tracks/{}", self.api_base, encode(track_id))).await
    }

    async fn several_tracks(&self, track_ids: &[String]) -> SpotifyResult<Vec<Track>> {
        let mut out = Vec::with_capacity(track_ids.len());
        for chunk in track_ids.chunks(TRACKS_PER_REQUEST) {
            let ids = chunk.iter().map(|i| encode(i)).collect::<Vec<_>>().join(",");
            let resp: SeveralTracks = self.get_json(&format!("{}/tracks?ids={}", self.api_base, ids)).await?;
            out.extend(resp.tracks.into_iter().flatten());
        }
        Ok(out)
    }

    async fn saved_tracks(&self) -> SpotifyResult<Vec<SavedTrackItem>> {
        self.get_all_pages(format!("{}/me/tracks?limit=50", self.api_base)).await
    }

    async fn audio_features(&self, track_ids: &[String]) -> SpotifyResult<Vec<AudioFeatures>> {
        let mut out = Vec::with_capacity(track_ids.len());
        for chunk in track_ids.chunks(FEATURES_PER_REQUEST) {
            let ids = chunk.iter().map(|i| encode(i)).collect::<Vec<_>>().join(",");
            let resp: SeveralFeatures = self.get_json(&format!("{}/audio-features?ids={}", self.api_base, ids)).await?;
            out.extend(resp.audio_features.into_iter().flatten());
        }
        Ok(out)
    }

    async fn audio_analysis(&self, track_id: &str) -> SpotifyResult<AudioAnalysis> {
        self.get_json(&format!("{}/audio-analysis/{}", self.api_base, encode(track_id))).await
    }

    async fn top_tracks(&self, range: TimeRange) -> SpotifyResult<Vec<Track>> {
        let page: Paging<Track> = self
            .get_json(&format!("{}/me/top/tracks?time_range={}&limit=50", self.api_base, range.as_str()))
            .await?;
        Ok(page.items)
    }

    async fn top_artists(&self, range: TimeRange) -> SpotifyResult<Vec<Artist>> {
        let page: Paging<Artist> = self
            .get_json(&format!("{}/me/top/artists?time_range={}&limit=50", self.api_base, range.as_str()))
            .await?;
        Ok(page.items)
    }

    async fn followed_artists(&self) -> SpotifyResult<Vec<Artist>> {
        // cursor paging: the page sits under "artists"
        let mut artists = Vec::new();
        let mut next = Some(format!("{}/me/following?type=artist&limit=50", self.api_base));
        while let Some(url) = next {
            let page: CursorPage<Artist> = self.get_json(&url).await?;
            artists.extend(page.artists.items);
            next = page.artists.next;
        }
        Ok(artists)
    }
}
