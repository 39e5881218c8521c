pub mod spotify;
pub mod mock;
pub mod oauth;
pub mod spotify_auth;

use crate::models::{
    Artist, AudioAnalysis, AudioFeatures, Image, Playlist, PlaylistItem, SavedTrackItem, TimeRange, Track, UserProfile,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("not authenticated: no stored token")]
    NotAuthenticated,
    #[error("unauthorized: token rejected by upstream")]
    Unauthorized,
    #[error("rate_limited: retry_after={retry_after:?}")]
    RateLimited { retry_after: Option<u64> },
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("token store: {0}")]
    Store(String),
}

impl SpotifyError {
    pub fn status(&self) -> Option<u16> {
        match self {
            SpotifyError::Unauthorized => Some(401),
            SpotifyError::RateLimited { .. } => Some(429),
            SpotifyError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the user has to go through the login flow again.
    pub fn needs_login(&self) -> bool {
        matches!(self, SpotifyError::NotAuthenticated | SpotifyError::Unauthorized)
    }
}

pub type SpotifyResult<T> = std::result::Result<T, SpotifyError>;

/// Read-only view of a user's upstream library: the operations the sync and
/// the HTTP proxy routes need. Paged endpoints return every page.
/// Implementations: spotify::SpotifyClient and mock::MockLibrary.
#[async_trait::async_trait]
pub trait LibrarySource: Send + Sync {
    async fn current_user(&self) -> SpotifyResult<UserProfile>;

    async fn user_playlists(&self) -> SpotifyResult<Vec<Playlist>>;

    async fn playlist(&self, playlist_id: &str) -> SpotifyResult<Playlist>;

    async fn playlist_items(&self, playlist_id: &str) -> SpotifyResult<Vec<PlaylistItem>>;

    async fn playlist_cover_image(&self, playlist_id: &str) -> SpotifyResult<Vec<Image>>;

    async fn track(&self, track_id: &str) -> SpotifyResult<Track>;

    /// Chunked by the implementation to the upstream's per-request limit.
    async fn several_tracks(&self, track_ids: &[String]) -> SpotifyResult<Vec<Track>>;

    async fn saved_tracks(&self) -> SpotifyResult<Vec<SavedTrackItem>>;

    /// Ids the upstream has no features for are dropped from the result.
    async fn audio_features(&self, track_ids: &[String]) -> SpotifyResult<Vec<AudioFeatures>>;

    async fn audio_analysis(&self, track_id: &str) -> SpotifyResult<AudioAnalysis>;

    async fn top_tracks(&self, range: TimeRange) -> SpotifyResult<Vec<Track>>;

    async fn top_artists(&self, range: TimeRange) -> SpotifyResult<Vec<Artist>>;

    async fn followed_artists(&self) -> SpotifyResult<Vec<Artist>>;
}
