#![allow(dead_code)]

use musivault::api::mock::MockLibrary;
use musivault::models::{
    AddedBy, Album, Artist, AudioAnalysis, AudioFeatures, Followers, Playlist, PlaylistItem, PlaylistOwner,
    SavedTrackItem, Track, UserProfile,
};
use serde_json::json;

pub fn artist(id: &str, name: &str) -> Artist {
    Artist { id: Some(id.into()), name: name.into(), ..Default::default() }
}

pub fn full_artist(id: &str, name: &str, genres: &[&str], followers: i64) -> Artist {
    Artist {
        genres: genres.iter().map(|g| g.to_string()).collect(),
        followers: Some(Followers { total: Some(followers) }),
        popularity: Some(60),
        ..artist(id, name)
    }
}

pub fn album(id: &str, name: &str, artists: Vec<Artist>) -> Album {
    Album {
        id: Some(id.into()),
        name: name.into(),
        album_type: Some("album".into()),
        release_date: Some("2020-05-01".into()),
        release_date_precision: Some("day".into()),
        artists,
        ..Default::default()
    }
}

pub fn track(id: &str, name: &str, album: Option<Album>, artists: Vec<Artist>) -> Track {
    Track {
        id: Some(id.into()),
        name: name.into(),
        duration_ms: Some(200_000),
        track_number: Some(1),
        album,
        artists,
        ..Default::default()
    }
}

pub fn item(track: Track, added_at: &str) -> PlaylistItem {
    PlaylistItem {
        added_at: Some(added_at.into()),
        added_by: Some(AddedBy { id: Some("listener".into()) }),
        track: Some(track),
    }
}

pub fn playlist(id: &str, name: &str) -> Playlist {
    Playlist {
        id: id.into(),
        name: name.into(),
        owner: Some(PlaylistOwner { id: "listener".into(), display_name: None }),
        snapshot_id: Some(format!("{}-snap", id)),
        ..Default::default()
    }
}

pub fn user() -> UserProfile {
    UserProfile {
        id: "listener".into(),
        display_name: Some("Listener".into()),
        country: Some("NL".into()),
        product: Some("premium".into()),
        ..Default::default()
    }
}

pub fn features(id: &str, tempo: f64) -> AudioFeatures {
    AudioFeatures { id: id.into(), tempo: Some(tempo), energy: Some(0.5), key: Some(2), ..Default::default() }
}

pub fn analysis() -> AudioAnalysis {
    AudioAnalysis {
        bars: json!([{"start": 0.0, "duration": 2.0}]),
        track: json!({"tempo": 120.0, "key": 2}),
        ..Default::default()
    }
}

/// Two playlists (one sharing a track with saved tracks), saved tracks, top
/// items for medium_term, one followed artist and features for two tracks.
pub fn sample_library() -> MockLibrary {
    let band = full_artist("ar1", "The Band", &["indie"], 1000);
    let solo = artist("ar2", "Solo");
    let rec = album("al1", "Record", vec![artist("ar1", "The Band")]);

    let t1 = track("t1", "Opener", Some(rec.clone()), vec![artist("ar1", "The Band")]);
    let t2 = track("t2", "Second", Some(rec), vec![artist("ar1", "The Band"), solo.clone()]);
    let t3 = track("t3", "Loner", None, vec![solo.clone()]);
    let local = Track { id: None, name: "Local file".into(), is_local: true, ..Default::default() };

    let mut lib = MockLibrary::new();
    lib.user = Some(user());
    lib.playlists = vec![playlist("pl1", "Mix"), playlist("pl2", "Solo stuff")];
    lib.playlist_items.insert(
        "pl1".into(),
        vec![
            item(t1.clone(), "2021-03-01T10:00:00Z"),
            item(local, "2021-03-02T10:00:00Z"),
            item(t2.clone(), "2021-03-03T10:00:00Z"),
        ],
    );
    lib.playlist_items.insert("pl2".into(), vec![item(t3.clone(), "2022-01-01T00:00:00Z")]);
    lib.saved = vec![
        SavedTrackItem { added_at: Some("2023-01-01T00:00:00Z".into()), track: t2.clone() },
        SavedTrackItem { added_at: Some("2023-02-01T00:00:00Z".into()), track: t3.clone() },
    ];
    lib.top_tracks.insert("medium_term", vec![t3, t1]);
    lib.top_artists.insert("medium_term", vec![band.clone(), solo]);
    lib.followed = vec![band];
    lib.features.insert("t1".into(), features("t1", 121.0));
    lib.features.insert("t2".into(), features("t2", 95.5));
    lib.analysis.insert("t1".into(), analysis());
    lib
}
