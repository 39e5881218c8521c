//! Write side of the vault: upserts of upstream entities and the link tables
//! between them.
//!
//! Entities are inserted on first sight and every mapped column is refreshed
//! on re-sync; `created_at` is never touched after the first insert. Link
//! tables are replaced wholesale for their parent row.

use crate::models::{
    spotify_url, Album, Artist, AudioAnalysis, AudioFeatures, Playlist, PlaylistItem, SavedTrackItem, TimeRange,
    Track, UserProfile,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn to_json<T: Serialize>(v: &T) -> Result<String> {
    Ok(serde_json::to_string(v)?)
}

/// RFC3339 upstream timestamps ("2021-03-01T10:00:00Z") to epoch seconds.
pub fn parse_added_at(s: Option<&str>) -> Option<i64> {
    s.and_then(|v| DateTime::parse_from_rfc3339(v).ok()).map(|d| d.timestamp())
}

fn followers_total(f: &Option<crate::models::Followers>) -> i64 {
    f.as_ref().and_then(|f| f.total).unwrap_or(0)
}

pub fn store_user(conn: &Connection, user: &UserProfile) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO users (id, display_name, email, country, followers_total, spotify_url, href, uri, product, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, email = excluded.email, country = excluded.country,
           followers_total = excluded.followers_total, spotify_url = excluded.spotify_url, href = excluded.href,
           uri = excluded.uri, product = excluded.product, updated_at = excluded.updated_at",
        params![
            user.id,
            user.display_name,
            user.email,
            user.country,
            followers_total(&user.followers),
            spotify_url(&user.external_urls),
            user.href,
            user.uri,
            user.product,
            ts
        ],
    )?;
    Ok(())
}

pub fn store_artist(conn: &Connection, artist: &Artist) -> Result<()> {
    let id = artist.id.as_deref().ok_or_else(|| anyhow!("artist without id: {}", artist.name))?;
    let ts = now();
    conn.execute(
        "INSERT INTO artists (id, name, genres, popularity, followers_total, spotify_url, href, uri, images, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name,
           genres = CASE WHEN excluded.genres = '[]' THEN artists.genres ELSE excluded.genres END,
           popularity = COALESCE(excluded.popularity, artists.popularity),
           followers_total = CASE WHEN excluded.followers_total = 0 THEN artists.followers_total ELSE excluded.followers_total END,
           spotify_url = excluded.spotify_url, href = excluded.href, uri = excluded.uri,
           images = CASE WHEN excluded.images = '[]' THEN artists.images ELSE excluded.images END,
           updated_at = excluded.updated_at",
        params![
            id,
            artist.name,
            to_json(&artist.genres)?,
            artist.popularity,
            followers_total(&artist.followers),
            spotify_url(&artist.external_urls),
            artist.href,
            artist.uri,
            to_json(&artist.images)?,
            ts
        ],
    )?;
    Ok(())
}

pub fn store_album(conn: &Connection, album: &Album) -> Result<()> {
    let id = album.id.as_deref().ok_or_else(|| anyhow!("album without id: {}", album.name))?;
    let ts = now();
    conn.execute(
        "INSERT INTO albums (id, name, album_type, total_tracks, release_date, release_date_precision, available_markets,
           spotify_url, href, uri, images, label, popularity, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, album_type = excluded.album_type,
           total_tracks = excluded.total_tracks, release_date = excluded.release_date,
           release_date_precision = excluded.release_date_precision, available_markets = excluded.available_markets,
           spotify_url = excluded.spotify_url, href = excluded.href, uri = excluded.uri, images = excluded.images,
           label = COALESCE(excluded.label, albums.label), popularity = COALESCE(excluded.popularity, albums.popularity),
           updated_at = excluded.updated_at",
        params![
            id,
            album.name,
            album.album_type,
            album.total_tracks,
            album.release_date,
            album.release_date_precision,
            to_json(&album.available_markets)?,
            spotify_url(&album.external_urls),
            album.href,
            album.uri,
            to_json(&album.images)?,
            album.label,
            album.popularity,
            ts
        ],
    )?;
    Ok(())
}

/// `album_id` overrides the embedded album's id when given.
pub fn store_track(conn: &Connection, track: &Track, album_id: Option<&str>) -> Result<()> {
    let id = track.id.as_deref().ok_or_else(|| anyhow!("track without id: {}", track.name))?;
    let album_id = album_id
        .map(str::to_string)
        .or_else(|| track.album.as_ref().and_then(|a| a.id.clone()));
    let ts = now();
    conn.execute(
        "INSERT INTO tracks (id, name, album_id, duration_ms, explicit, popularity, preview_url, track_number, disc_number,
           is_local, available_markets, spotify_url, href, uri, external_ids, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, album_id = COALESCE(excluded.album_id, tracks.album_id),
           duration_ms = excluded.duration_ms, explicit = excluded.explicit, popularity = excluded.popularity,
           preview_url = excluded.preview_url, track_number = excluded.track_number, disc_number = excluded.disc_number,
           is_local = excluded.is_local, available_markets = excluded.available_markets, spotify_url = excluded.spotify_url,
           href = excluded.href, uri = excluded.uri, external_ids = excluded.external_ids, updated_at = excluded.updated_at",
        params![
            id,
            track.name,
            album_id,
            track.duration_ms,
            track.explicit,
            track.popularity,
            track.preview_url,
            track.track_number,
            track.disc_number.unwrap_or(1),
            track.is_local,
            to_json(&track.available_markets)?,
            spotify_url(&track.external_urls),
            track.href,
            track.uri,
            to_json(&track.external_ids)?,
            ts
        ],
    )?;
    Ok(())
}

pub fn store_playlist(conn: &Connection, playlist: &Playlist, owner_id: &str) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO playlists (id, name, description, public, collaborative, followers_total, snapshot_id, spotify_url,
           href, uri, images, primary_color, owner_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, description = excluded.description, public = excluded.public,
           collaborative = excluded.collaborative, followers_total = excluded.followers_total,
           snapshot_id = excluded.snapshot_id, spotify_url = excluded.spotify_url, href = excluded.href,
           uri = excluded.uri, images = excluded.images, primary_color = excluded.primary_color,
           owner_id = excluded.owner_id, updated_at = excluded.updated_at",
        params![
            playlist.id,
            playlist.name,
            playlist.description,
            playlist.public,
            playlist.collaborative,
            followers_total(&playlist.followers),
            playlist.snapshot_id,
            spotify_url(&playlist.external_urls),
            playlist.href,
            playlist.uri,
            to_json(&playlist.images)?,
            playlist.primary_color,
            owner_id,
            ts
        ],
    )?;
    Ok(())
}

pub fn store_audio_features(conn: &Connection, f: &AudioFeatures) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO audio_features (track_id, danceability, energy, key, loudness, mode, speechiness, acousticness,
           instrumentalness, liveness, valence, tempo, time_signature, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
         ON CONFLICT(track_id) DO UPDATE SET danceability = excluded.danceability, energy = excluded.energy,
           key = excluded.key, loudness = excluded.loudness, mode = excluded.mode, speechiness = excluded.speechiness,
           acousticness = excluded.acousticness, instrumentalness = excluded.instrumentalness,
           liveness = excluded.liveness, valence = excluded.valence, tempo = excluded.tempo,
           time_signature = excluded.time_signature, updated_at = excluded.updated_at",
        params![
            f.id,
            f.danceability,
            f.energy,
            f.key,
            f.loudness,
            f.mode,
            f.speechiness,
            f.acousticness,
            f.instrumentalness,
            f.liveness,
            f.valence,
            f.tempo,
            f.time_signature,
            ts
        ],
    )?;
    Ok(())
}

fn json_or(v: &serde_json::Value, empty: &str) -> Result<String> {
    if v.is_null() {
        return Ok(empty.to_string());
    }
    to_json(v)
}

pub fn store_audio_analysis(conn: &Connection, a: &AudioAnalysis, track_id: &str) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO audio_analysis (track_id, bars, beats, sections, segments, tatums, track_analysis, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(track_id) DO UPDATE SET bars = excluded.bars, beats = excluded.beats, sections = excluded.sections,
           segments = excluded.segments, tatums = excluded.tatums, track_analysis = excluded.track_analysis,
           updated_at = excluded.updated_at",
        params![
            track_id,
            json_or(&a.bars, "[]")?,
            json_or(&a.beats, "[]")?,
            json_or(&a.sections, "[]")?,
            json_or(&a.segments, "[]")?,
            json_or(&a.tatums, "[]")?,
            json_or(&a.track, "{}")?,
            ts
        ],
    )?;
    Ok(())
}

pub fn link_track_artists(conn: &Connection, track_id: &str, artists: &[Artist]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM track_artists WHERE track_id = ?1", params![track_id])?;
    for artist_id in artists.iter().filter_map(|a| a.id.as_deref()) {
        tx.execute(
            "INSERT OR IGNORE INTO track_artists (track_id, artist_id) VALUES (?1, ?2)",
            params![track_id, artist_id],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn link_album_artists(conn: &Connection, album_id: &str, artists: &[Artist]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM album_artists WHERE album_id = ?1", params![album_id])?;
    for artist_id in artists.iter().filter_map(|a| a.id.as_deref()) {
        tx.execute(
            "INSERT OR IGNORE INTO album_artists (album_id, artist_id) VALUES (?1, ?2)",
            params![album_id, artist_id],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Replace the playlist's track list. Position is the item's index in the
/// upstream list; items without a track id keep their slot empty.
/// Returns the number of linked rows.
pub fn link_playlist_tracks(conn: &Connection, playlist_id: &str, items: &[PlaylistItem]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM playlist_tracks WHERE playlist_id = ?1", params![playlist_id])?;
    let mut linked = 0;
    for (position, item) in items.iter().enumerate() {
        let Some(track_id) = item.track_id() else { continue };
        tx.execute(
            "INSERT INTO playlist_tracks (playlist_id, position, track_id, added_at, added_by_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                playlist_id,
                position as i64,
                track_id,
                parse_added_at(item.added_at.as_deref()),
                item.added_by.as_ref().and_then(|a| a.id.clone())
            ],
        )?;
        linked += 1;
    }
    tx.commit()?;
    Ok(linked)
}

/// Replace the user's followed-artist set.
pub fn link_followed_artists(conn: &Connection, user_id: &str, artists: &[Artist]) -> Result<usize> {
    let ts = now();
    let tx = conn.unchecked_transaction()?;
    // keep original followed_at for artists that are still followed
    let mut keep: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    {
        let mut stmt = tx.prepare("SELECT artist_id, followed_at FROM user_followed_artists WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (id, at) = row?;
            keep.insert(id, at);
        }
    }
    tx.execute("DELETE FROM user_followed_artists WHERE user_id = ?1", params![user_id])?;
    let mut linked = 0;
    for artist_id in artists.iter().filter_map(|a| a.id.as_deref()) {
        let followed_at = keep.get(artist_id).copied().unwrap_or(ts);
        linked += tx.execute(
            "INSERT OR IGNORE INTO user_followed_artists (user_id, artist_id, followed_at) VALUES (?1, ?2, ?3)",
            params![user_id, artist_id, followed_at],
        )?;
    }
    tx.commit()?;
    Ok(linked)
}

/// Insert saved-track rows that are not stored yet. Returns how many were new.
pub fn store_saved_tracks(conn: &Connection, user_id: &str, items: &[SavedTrackItem]) -> Result<usize> {
    let ts = now();
    let tx = conn.unchecked_transaction()?;
    let mut stored = 0;
    for item in items {
        let Some(track_id) = item.track.id.as_deref() else { continue };
        let added_at = parse_added_at(item.added_at.as_deref()).unwrap_or(ts);
        stored += tx.execute(
            "INSERT OR IGNORE INTO saved_tracks (user_id, track_id, added_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, track_id, added_at, ts],
        )?;
    }
    tx.commit()?;
    Ok(stored)
}

/// Replace the user's top tracks for one range; ranks start at 1.
pub fn store_top_tracks(conn: &Connection, user_id: &str, tracks: &[Track], range: TimeRange) -> Result<usize> {
    let ts = now();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM user_top_tracks WHERE user_id = ?1 AND time_range = ?2",
        params![user_id, range.as_str()],
    )?;
    let mut stored = 0;
    for (idx, track_id) in tracks.iter().filter_map(|t| t.id.as_deref()).enumerate() {
        tx.execute(
            "INSERT INTO user_top_tracks (user_id, track_id, time_range, rank, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, track_id, range.as_str(), (idx + 1) as i64, ts],
        )?;
        stored += 1;
    }
    tx.commit()?;
    Ok(stored)
}

pub fn store_top_artists(conn: &Connection, user_id: &str, artists: &[Artist], range: TimeRange) -> Result<usize> {
    let ts = now();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM user_top_artists WHERE user_id = ?1 AND time_range = ?2",
        params![user_id, range.as_str()],
    )?;
    let mut stored = 0;
    for (idx, artist_id) in artists.iter().filter_map(|a| a.id.as_deref()).enumerate() {
        tx.execute(
            "INSERT INTO user_top_artists (user_id, artist_id, time_range, rank, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, artist_id, range.as_str(), (idx + 1) as i64, ts],
        )?;
        stored += 1;
    }
    tx.commit()?;
    Ok(stored)
}

fn collect_ids(conn: &Connection, sql: &str, limit: Option<usize>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let rows = stmt.query_map(params![limit], |r| r.get::<_, String>(0))?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Local tracks never get features upstream, so they are excluded.
pub fn tracks_missing_audio_features(conn: &Connection) -> Result<Vec<String>> {
    collect_ids(
        conn,
        "SELECT t.id FROM tracks t LEFT JOIN audio_features f ON f.track_id = t.id
         WHERE f.track_id IS NULL AND COALESCE(t.is_local, 0) = 0 ORDER BY t.id LIMIT ?1",
        None,
    )
}

pub fn tracks_missing_audio_analysis(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    collect_ids(
        conn,
        "SELECT t.id FROM tracks t LEFT JOIN audio_analysis a ON a.track_id = t.id
         WHERE a.track_id IS NULL AND COALESCE(t.is_local, 0) = 0 ORDER BY t.id LIMIT ?1",
        Some(limit),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct DatabaseStats {
    pub users: i64,
    pub artists: i64,
    pub albums: i64,
    pub tracks: i64,
    pub playlists: i64,
    pub playlist_tracks: i64,
    pub audio_features: i64,
    pub audio_analysis: i64,
    pub saved_tracks: i64,
    pub user_top_tracks: i64,
    pub user_top_artists: i64,
    pub followed_artists: i64,
}

pub fn database_stats(conn: &Connection) -> Result<DatabaseStats> {
    let count = |table: &str| -> Result<i64> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
    };
    Ok(DatabaseStats {
        users: count("users")?,
        artists: count("artists")?,
        albums: count("albums")?,
        tracks: count("tracks")?,
        playlists: count("playlists")?,
        playlist_tracks: count("playlist_tracks")?,
        audio_features: count("audio_features")?,
        audio_analysis: count("audio_analysis")?,
        saved_tracks: count("saved_tracks")?,
        user_top_tracks: count("user_top_tracks")?,
        user_top_artists: count("user_top_artists")?,
        followed_artists: count("user_followed_artists")?,
    })
}

/// Id of the most recently updated user, i.e. whoever synced last.
pub fn current_user_id(conn: &Connection) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT id FROM users ORDER BY updated_at DESC LIMIT 1", [], |r| r.get(0))
        .optional()?)
}
