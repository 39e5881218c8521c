use super::{LibrarySource, SpotifyError, SpotifyResult};
use crate::models::{
    Artist, AudioAnalysis, AudioFeatures, Image, Playlist, PlaylistItem, SavedTrackItem, TimeRange, Track, UserProfile,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// In-memory library used in tests and for dry runs.
/// It serves canned payloads and records every call by name.
#[derive(Default)]
pub struct MockLibrary {
    pub user: Option<UserProfile>,
    pub playlists: Vec<Playlist>,
    pub playlist_items: HashMap<String, Vec<PlaylistItem>>,
    pub saved: Vec<SavedTrackItem>,
    pub top_tracks: HashMap<&'static str, Vec<Track>>,
    pub top_artists: HashMap<&'static str, Vec<Artist>>,
    pub followed: Vec<Artist>,
    pub features: HashMap<String, AudioFeatures>,
    pub analysis: HashMap<String, AudioAnalysis>,
    /// Playlist ids whose item fetch fails with a 500.
    pub failing_playlists: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, name: &str) {
        info!("MockLibrary: {}", name);
        if let Ok(mut c) = self.calls.lock() {
            c.push(name.to_string());
        }
    }

    fn all_tracks(&self) -> impl Iterator<Item = &Track> {
        self.playlist_items
            .values()
            .flatten()
            .filter_map(|i| i.track.as_ref())
            .chain(self.saved.iter().map(|s| &s.track))
            .chain(self.top_tracks.values().flatten())
    }
}

fn not_found(what: &str, id: &str) -> SpotifyError {
    SpotifyError::Status { status: 404, body: format!("{} {} not found", what, id) }
}

#[async_trait]
impl LibrarySource for MockLibrary {
    async fn current_user(&self) -> SpotifyResult<UserProfile> {
        self.record("current_user");
        self.user.clone().ok_or(SpotifyError::Unauthorized)
    }

    async fn user_playlists(&self) -> SpotifyResult<Vec<Playlist>> {
        self.record("user_playlists");
        Ok(self.playlists.clone())
    }

    async fn playlist(&self, playlist_id: &str) -> SpotifyResult<Playlist> {
        self.record("playlist");
        self.playlists
            .iter()
            .find(|p| p.id == playlist_id)
            .cloned()
            .ok_or_else(|| not_found("playlist", playlist_id))
    }

    async fn playlist_items(&self, playlist_id: &str) -> SpotifyResult<Vec<PlaylistItem>> {
        self.record("playlist_items");
        if self.failing_playlists.iter().any(|p| p == playlist_id) {
            return Err(SpotifyError::Status { status: 500, body: "boom".into() });
        }
        Ok(self.playlist_items.get(playlist_id).cloned().unwrap_or_default())
    }

    async fn playlist_cover_image(&self, playlist_id: &str) -> SpotifyResult<Vec<Image>> {
        self.record("playlist_cover_image");
        Ok(self.playlist(playlist_id).await?.images)
    }

    async fn track(&self, track_id: &str) -> SpotifyResult<Track> {
        self.record("track");
        self.all_tracks()
            .find(|t| t.id.as_deref() == Some(track_id))
            .cloned()
            .ok_or_else(|| not_found("track", track_id))
    }

    async fn several_tracks(&self, track_ids: &[String]) -> SpotifyResult<Vec<Track>> {
        self.record("several_tracks");
        let mut out = Vec::new();
        for id in track_ids {
            if let Some(t) = self.all_tracks().find(|t| t.id.as_deref() == Some(id.as_str())) {
                out.push(t.clone());
            }
        }
        Ok(out)
    }

    async fn saved_tracks(&self) -> SpotifyResult<Vec<SavedTrackItem>> {
        self.record("saved_tracks");
        Ok(self.saved.clone())
    }

    async fn audio_features(&self, track_ids: &[String]) -> SpotifyResult<Vec<AudioFeatures>> {
        self.record("audio_features");
        Ok(track_ids.iter().filter_map(|id| self.features.get(id).cloned()).collect())
    }

    async fn audio_analysis(&self, track_id: &str) -> SpotifyResult<AudioAnalysis> {
        self.record("audio_analysis");
        self.analysis.get(track_id).cloned().ok_or_else(|| not_found("analysis", track_id))
    }

    async fn top_tracks(&self, range: TimeRange) -> SpotifyResult<Vec<Track>> {
        self.record("top_tracks");
        Ok(self.top_tracks.get(range.as_str()).cloned().unwrap_or_default())
    }

    async fn top_artists(&self, range: TimeRange) -> SpotifyResult<Vec<Artist>> {
        self.record("top_artists");
        Ok(self.top_artists.get(range.as_str()).cloned().unwrap_or_default())
    }

    async fn followed_artists(&self) -> SpotifyResult<Vec<Artist>> {
        self.record("followed_artists");
        Ok(self.followed.clone())
    }
}
