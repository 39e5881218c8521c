//! Read side of the vault: stored rows rendered as JSON-ready views.
//! JSON text columns are decoded; a column that fails to decode falls back
//! to an empty list/object instead of failing the whole read.

use crate::models::TimeRange;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

fn decode(raw: Option<String>, default: Value) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or(default)
}

fn list() -> Value {
    Value::Array(Vec::new())
}

fn object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
    pub followers_total: Option<i64>,
    pub spotify_url: Option<String>,
    pub href: Option<String>,
    pub uri: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtistView {
    pub id: String,
    pub name: String,
    pub genres: Value,
    pub popularity: Option<i64>,
    pub followers_total: Option<i64>,
    pub spotify_url: Option<String>,
    pub href: Option<String>,
    pub uri: Option<String>,
    pub images: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlbumView {
    pub id: String,
    pub name: String,
    pub album_type: Option<String>,
    pub total_tracks: Option<i64>,
    pub release_date: Option<String>,
    pub release_date_precision: Option<String>,
    pub available_markets: Value,
    pub spotify_url: Option<String>,
    pub href: Option<String>,
    pub uri: Option<String>,
    pub images: Value,
    pub label: Option<String>,
    pub popularity: Option<i64>,
    pub artists: Vec<ArtistView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackView {
    pub id: String,
    pub name: String,
    pub duration_ms: Option<i64>,
    pub explicit: Option<bool>,
    pub popularity: Option<i64>,
    pub preview_url: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub is_local: Option<bool>,
    pub available_markets: Value,
    pub spotify_url: Option<String>,
    pub href: Option<String>,
    pub uri: Option<String>,
    pub external_ids: Value,
    pub album: Option<AlbumView>,
    pub artists: Vec<ArtistView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub public: Option<bool>,
    pub collaborative: Option<bool>,
    pub followers_total: Option<i64>,
    pub snapshot_id: Option<String>,
    pub spotify_url: Option<String>,
    pub href: Option<String>,
    pub uri: Option<String>,
    pub images: Value,
    pub primary_color: Option<String>,
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<TrackView>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedTrackView {
    pub id: i64,
    pub user_id: String,
    pub added_at: Option<String>,
    pub track: Option<TrackView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopTrackView {
    pub id: i64,
    pub user_id: String,
    pub time_range: String,
    pub rank: i64,
    pub track: Option<TrackView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopArtistView {
    pub id: i64,
    pub user_id: String,
    pub time_range: String,
    pub rank: i64,
    pub artist: Option<ArtistView>,
}

fn iso(ts: Option<i64>) -> Option<String> {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0)).map(|d| d.to_rfc3339())
}

const ARTIST_COLS: &str = "a.id, a.name, a.genres, a.popularity, a.followers_total, a.spotify_url, a.href, a.uri, a.images";

fn artist_from_row(r: &Row<'_>) -> rusqlite::Result<ArtistView> {
    Ok(ArtistView {
        id: r.get(0)?,
        name: r.get(1)?,
        genres: decode(r.get(2)?, list()),
        popularity: r.get(3)?,
        followers_total: r.get(4)?,
        spotify_url: r.get(5)?,
        href: r.get(6)?,
        uri: r.get(7)?,
        images: decode(r.get(8)?, list()),
    })
}

fn artists_where(conn: &Connection, join: &str, key: &str) -> Result<Vec<ArtistView>> {
    let sql = format!("SELECT {} FROM artists a {} ORDER BY a.name", ARTIST_COLS, join);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![key], artist_from_row)?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

pub fn get_artist(conn: &Connection, id: &str) -> Result<Option<ArtistView>> {
    let sql = format!("SELECT {} FROM artists a WHERE a.id = ?1", ARTIST_COLS);
    Ok(conn.query_row(&sql, params![id], artist_from_row).optional()?)
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<UserView>> {
    Ok(conn
        .query_row(
            "SELECT id, display_name, email, country, followers_total, spotify_url, href, uri, product FROM users WHERE id = ?1",
            params![id],
            |r| {
                Ok(UserView {
                    id: r.get(0)?,
                    display_name: r.get(1)?,
                    email: r.get(2)?,
                    country: r.get(3)?,
                    followers_total: r.get(4)?,
                    spotify_url: r.get(5)?,
                    href: r.get(6)?,
                    uri: r.get(7)?,
                    product: r.get(8)?,
                })
            },
        )
        .optional()?)
}

pub fn get_album(conn: &Connection, id: &str) -> Result<Option<AlbumView>> {
    let album = conn
        .query_row(
            "SELECT id, name, album_type, total_tracks, release_date, release_date_precision, available_markets,
               spotify_url, href, uri, images, label, popularity FROM albums WHERE id = ?1",
            params![id],
            |r| {
                Ok(AlbumView {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    album_type: r.get(2)?,
                    total_tracks: r.get(3)?,
                    release_date: r.get(4)?,
                    release_date_precision: r.get(5)?,
                    available_markets: decode(r.get(6)?, list()),
                    spotify_url: r.get(7)?,
                    href: r.get(8)?,
                    uri: r.get(9)?,
                    images: decode(r.get(10)?, list()),
                    label: r.get(11)?,
                    popularity: r.get(12)?,
                    artists: Vec::new(),
                })
            },
        )
        .optional()?;
    let Some(mut album) = album else { return Ok(None) };
    album.artists = artists_where(conn, "JOIN album_artists x ON x.artist_id = a.id WHERE x.album_id = ?1", id)?;
    Ok(Some(album))
}

pub fn get_track(conn: &Connection, id: &str) -> Result<Option<TrackView>> {
    let row = conn
        .query_row(
            "SELECT id, name, duration_ms, explicit, popularity, preview_url, track_number, disc_number, is_local,
               available_markets, spotify_url, href, uri, external_ids, album_id FROM tracks WHERE id = ?1",
            params![id],
            |r| {
                Ok((
                    TrackView {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        duration_ms: r.get(2)?,
                        explicit: r.get(3)?,
                        popularity: r.get(4)?,
                        preview_url: r.get(5)?,
                        track_number: r.get(6)?,
                        disc_number: r.get(7)?,
                        is_local: r.get(8)?,
                        available_markets: decode(r.get(9)?, list()),
                        spotify_url: r.get(10)?,
                        href: r.get(11)?,
                        uri: r.get(12)?,
                        external_ids: decode(r.get(13)?, object()),
                        album: None,
                        artists: Vec::new(),
                    },
                    r.get::<_, Option<String>>(14)?,
                ))
            },
        )
        .optional()?;
    let Some((mut track, album_id)) = row else { return Ok(None) };
    if let Some(album_id) = album_id {
        track.album = get_album(conn, &album_id)?;
    }
    track.artists = artists_where(conn, "JOIN track_artists x ON x.artist_id = a.id WHERE x.track_id = ?1", id)?;
    Ok(Some(track))
}

const PLAYLIST_COLS: &str = "id, name, description, public, collaborative, followers_total, snapshot_id, spotify_url, href, uri, images, primary_color, owner_id";

fn playlist_from_row(r: &Row<'_>) -> rusqlite::Result<PlaylistView> {
    Ok(PlaylistView {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        public: r.get(3)?,
        collaborative: r.get(4)?,
        followers_total: r.get(5)?,
        snapshot_id: r.get(6)?,
        spotify_url: r.get(7)?,
        href: r.get(8)?,
        uri: r.get(9)?,
        images: decode(r.get(10)?, list()),
        primary_color: r.get(11)?,
        owner_id: r.get(12)?,
        tracks: None,
    })
}

pub fn list_playlists(conn: &Connection, owner_id: &str) -> Result<Vec<PlaylistView>> {
    let sql = format!("SELECT {} FROM playlists WHERE owner_id = ?1 ORDER BY name", PLAYLIST_COLS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner_id], playlist_from_row)?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Tracks come back in playlist order.
pub fn get_playlist(conn: &Connection, id: &str, include_tracks: bool) -> Result<Option<PlaylistView>> {
    let sql = format!("SELECT {} FROM playlists WHERE id = ?1", PLAYLIST_COLS);
    let Some(mut playlist) = conn.query_row(&sql, params![id], playlist_from_row).optional()? else {
        return Ok(None);
    };
    if include_tracks {
        let ids = ids_in_order(conn, "SELECT track_id FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY position", id)?;
        let mut tracks = Vec::with_capacity(ids.len());
        for track_id in ids {
            if let Some(t) = get_track(conn, &track_id)? {
                tracks.push(t);
            }
        }
        playlist.tracks = Some(tracks);
    }
    Ok(Some(playlist))
}

fn ids_in_order(conn: &Connection, sql: &str, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![key], |r| r.get::<_, String>(0))?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Most recently saved first.
pub fn list_saved_tracks(conn: &Connection, user_id: &str) -> Result<Vec<SavedTrackView>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, track_id, added_at FROM saved_tracks WHERE user_id = ?1 ORDER BY added_at DESC, id",
    )?;
    let rows = stmt.query_map(params![user_id], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, Option<i64>>(3)?))
    })?;
    let mut v = Vec::new();
    for r in rows {
        let (id, user_id, track_id, added_at) = r?;
        v.push(SavedTrackView { id, user_id, added_at: iso(added_at), track: get_track(conn, &track_id)? });
    }
    Ok(v)
}

pub fn list_top_tracks(conn: &Connection, user_id: &str, range: TimeRange) -> Result<Vec<TopTrackView>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, track_id, time_range, rank FROM user_top_tracks WHERE user_id = ?1 AND time_range = ?2 ORDER BY rank",
    )?;
    let rows = stmt.query_map(params![user_id, range.as_str()], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, String>(3)?, r.get::<_, i64>(4)?))
    })?;
    let mut v = Vec::new();
    for r in rows {
        let (id, user_id, track_id, time_range, rank) = r?;
        v.push(TopTrackView { id, user_id, time_range, rank, track: get_track(conn, &track_id)? });
    }
    Ok(v)
}

pub fn list_top_artists(conn: &Connection, user_id: &str, range: TimeRange) -> Result<Vec<TopArtistView>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, artist_id, time_range, rank FROM user_top_artists WHERE user_id = ?1 AND time_range = ?2 ORDER BY rank",
    )?;
    let rows = stmt.query_map(params![user_id, range.as_str()], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, String>(3)?, r.get::<_, i64>(4)?))
    })?;
    let mut v = Vec::new();
    for r in rows {
        let (id, user_id, artist_id, time_range, rank) = r?;
        v.push(TopArtistView { id, user_id, time_range, rank, artist: get_artist(conn, &artist_id)? });
    }
    Ok(v)
}

pub fn list_followed_artists(conn: &Connection, user_id: &str) -> Result<Vec<ArtistView>> {
    artists_where(conn, "JOIN user_followed_artists x ON x.artist_id = a.id WHERE x.user_id = ?1", user_id)
}
