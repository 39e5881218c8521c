use mockito::{Matcher, Server};
use musivault::api::spotify::SpotifyClient;
use musivault::api::LibrarySource;
use musivault::config::Config;
use musivault::db;
use musivault::retry::RetryConfig;
use serde_json::json;
use std::path::Path;

fn seeded_client(db_path: &Path, base: &str) -> SpotifyClient {
    let conn = db::open_or_create(db_path).unwrap();
    let token = json!({
        "access_token": "valid",
        "expires_at": chrono::Utc::now().timestamp() + 3600,
        "refresh_token": "r"
    })
    .to_string();
    db::save_credential_raw(&conn, "spotify", &token, Some("cid"), Some("secret")).unwrap();

    let mut cfg = Config::default();
    cfg.db_path = db_path.to_path_buf();
    SpotifyClient::new(&cfg).with_api_base(base).with_auth_base(base).with_retry(RetryConfig::none())
}

#[test]
fn playlists_follow_next_links_across_pages() {
    let mut server = Server::new();
    let base = server.url();

    let _p1 = server
        .mock("GET", Matcher::Regex(r"^/me/playlists".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "items": [{"id": "pl1", "name": "Morning", "images": null}],
                "next": format!("{}/playlists-page-2", base),
                "total": 2
            })
            .to_string(),
        )
        .create();
    let _p2 = server
        .mock("GET", "/playlists-page-2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"items": [{"id": "pl2", "name": "Evening"}], "next": null, "total": 2}).to_string())
        .create();

    let td = tempfile::tempdir().unwrap();
    let client = seeded_client(&td.path().join("vault.db"), &base);
    let rt = tokio::runtime::Runtime::new().unwrap();
    let playlists = rt.block_on(client.user_playlists()).expect("playlists");

    let ids: Vec<&str> = playlists.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["pl1", "pl2"]);
    assert!(playlists[0].images.is_empty());
}

#[test]
fn followed_artists_use_cursor_pages() {
    let mut server = Server::new();
    let base = server.url();

    let _f1 = server
        .mock("GET", Matcher::Regex(r"^/me/following".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"artists": {
                "items": [{"id": "ar1", "name": "First", "genres": ["ambient"]}],
                "next": format!("{}/following-after-ar1", base),
                "cursors": {"after": "ar1"}
            }})
            .to_string(),
        )
        .create();
    let _f2 = server
        .mock("GET", "/following-after-ar1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"artists": {"items": [{"id": "ar2", "name": "Second"}], "next": null}}).to_string())
        .create();

    let td = tempfile::tempdir().unwrap();
    let client = seeded_client(&td.path().join("vault.db"), &base);
    let rt = tokio::runtime::Runtime::new().unwrap();
    let artists = rt.block_on(client.followed_artists()).expect("followed");

    assert_eq!(artists.len(), 2);
    assert_eq!(artists[0].genres, vec!["ambient".to_string()]);
    assert_eq!(artists[1].id.as_deref(), Some("ar2"));
}

#[test]
fn audio_features_drop_null_entries() {
    let mut server = Server::new();
    let base = server.url();

    let _m = server
        .mock("GET", Matcher::Regex(r"^/audio-features".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"audio_features": [{"id": "t1", "tempo": 120.5, "key": 5}, null]}).to_string())
        .create();

    let td = tempfile::tempdir().unwrap();
    let client = seeded_client(&td.path().join("vault.db"), &base);
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ids = vec!["t1".to_string(), "gone".to_string()];
    let features = rt.block_on(client.audio_features(&ids)).expect("features");

    assert_eq!(features.len(), 1);
    assert_eq!(features[0].id, "t1");
    assert_eq!(features[0].key, Some(5));
}

fn ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("t{}", i)).collect()
}

#[test]
fn several_tracks_sends_at_most_fifty_ids_per_request() {
    let mut server = Server::new();
    let base = server.url();

    let full = server
        .mock("GET", Matcher::Regex(r"^/tracks\?ids=(t\d+,){49}t\d+$".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"tracks": [{"id": "t0", "name": "Zero"}, null]}).to_string())
        .expect(1)
        .create();
    let rest = server
        .mock("GET", "/tracks?ids=t50")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"tracks": [{"id": "t50", "name": "Fifty"}]}).to_string())
        .expect(1)
        .create();

    let td = tempfile::tempdir().unwrap();
    let client = seeded_client(&td.path().join("vault.db"), &base);
    let rt = tokio::runtime::Runtime::new().unwrap();
    let tracks = rt.block_on(client.several_tracks(&ids(51))).expect("tracks");

    full.assert();
    rest.assert();
    let got: Vec<_> = tracks.iter().map(|t| t.id.as_deref().unwrap()).collect();
    assert_eq!(got, vec!["t0", "t50"]);
}

#[test]
fn audio_features_send_at_most_one_hundred_ids_per_request() {
    let mut server = Server::new();
    let base = server.url();

    let full = server
        .mock("GET", Matcher::Regex(r"^/audio-features\?ids=(t\d+,){99}t\d+$".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"audio_features": [{"id": "t0", "tempo": 90.0}]}).to_string())
        .expect(1)
        .create();
    let rest = server
        .mock("GET", Matcher::Regex(r"^/audio-features\?ids=(t\d+,){49}t\d+$".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"audio_features": [{"id": "t149", "tempo": 150.0}]}).to_string())
        .expect(1)
        .create();

    let td = tempfile::tempdir().unwrap();
    let client = seeded_client(&td.path().join("vault.db"), &base);
    let rt = tokio::runtime::Runtime::new().unwrap();
    let features = rt.block_on(client.audio_features(&ids(150))).expect("features");

    full.assert();
    rest.assert();
    assert_eq!(features.len(), 2);
    assert_eq!(features[1].id, "t149");
}
