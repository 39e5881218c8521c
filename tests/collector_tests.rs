mod common;

use musivault::api::LibrarySource;
use musivault::collector::{Collector, CollectorOptions};
use musivault::db;
use musivault::library;
use musivault::models::TimeRange;
use musivault::store;
use std::path::Path;
use std::sync::Arc;

fn open(path: &Path) -> rusqlite::Connection {
    db::open_or_create(path).expect("open db")
}

#[tokio::test]
async fn full_sync_stores_every_step() {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    let source = Arc::new(common::sample_library());

    let report = Collector::new(source.clone(), open(&db_path), CollectorOptions::default())
        .collect_all()
        .await;

    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.total_errors, 0);
    assert_eq!(report.user_id.as_deref(), Some("listener"));

    let stats = report.database_stats.expect("stats");
    assert_eq!(stats.users, 1);
    assert_eq!(stats.artists, 2);
    assert_eq!(stats.albums, 1);
    assert_eq!(stats.tracks, 3);
    assert_eq!(stats.playlists, 2);
    assert_eq!(stats.playlist_tracks, 3);
    assert_eq!(stats.saved_tracks, 2);
    assert_eq!(stats.user_top_tracks, 2);
    assert_eq!(stats.user_top_artists, 2);
    assert_eq!(stats.followed_artists, 1);
    assert_eq!(stats.audio_features, 2);
    assert_eq!(stats.audio_analysis, 0);

    assert_eq!(report.collection_stats.playlist_tracks, 3);
    assert_eq!(report.collection_stats.audio_features, 2);

    // steps run in order: profile before playlists, audio features last
    let calls = source.calls();
    assert_eq!(calls.first().map(String::as_str), Some("current_user"));
    assert_eq!(calls.last().map(String::as_str), Some("audio_features"));
    assert!(!calls.iter().any(|c| c == "audio_analysis"));

    let conn = open(&db_path);
    // local track keeps its slot empty; positions follow the upstream order
    let pl = library::get_playlist(&conn, "pl1", true).unwrap().unwrap();
    let ids: Vec<&str> = pl.tracks.as_ref().unwrap().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
    let positions: Vec<i64> = conn
        .prepare("SELECT position FROM playlist_tracks WHERE playlist_id = 'pl1' ORDER BY position")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(positions, vec![0, 2]);

    let top = library::list_top_tracks(&conn, "listener", TimeRange::MediumTerm).unwrap();
    assert_eq!(top.iter().map(|t| t.rank).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(top[0].track.as_ref().unwrap().id, "t3");

    let run = db::latest_sync_run(&conn).unwrap().expect("run recorded");
    assert_eq!(run.status, "success");
    assert_eq!(run.id, report.run_id);
    assert_eq!(run.user_id.as_deref(), Some("listener"));
}

#[tokio::test]
async fn resync_is_idempotent_and_keeps_full_artist_data() {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    let source: Arc<dyn LibrarySource> = Arc::new(common::sample_library());

    let first = Collector::new(source.clone(), open(&db_path), CollectorOptions::default()).collect_all().await;
    let created_before: i64 = open(&db_path)
        .query_row("SELECT created_at FROM artists WHERE id = 'ar1'", [], |r| r.get(0))
        .unwrap();

    let second = Collector::new(source, open(&db_path), CollectorOptions::default()).collect_all().await;
    assert!(second.success);
    assert_eq!(first.database_stats, second.database_stats);
    // nothing new to save or analyse on the second pass
    assert_eq!(second.collection_stats.saved_tracks, 0);
    assert_eq!(second.collection_stats.audio_features, 0);

    let conn = open(&db_path);
    let created_after: i64 = conn
        .query_row("SELECT created_at FROM artists WHERE id = 'ar1'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(created_before, created_after);

    // simplified artist objects inside tracks must not wipe genres/followers
    let band = library::get_artist(&conn, "ar1").unwrap().unwrap();
    assert_eq!(band.genres, serde_json::json!(["indie"]));
    assert_eq!(band.followers_total, Some(1000));
}

#[tokio::test]
async fn failing_playlist_is_counted_and_skipped() {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    let mut lib = common::sample_library();
    lib.failing_playlists = vec!["pl2".into()];

    let report = Collector::new(Arc::new(lib), open(&db_path), CollectorOptions::default()).collect_all().await;

    assert!(report.success);
    assert_eq!(report.total_errors, 1);
    let stats = report.database_stats.unwrap();
    assert_eq!(stats.playlists, 2);
    assert_eq!(stats.playlist_tracks, 2);
    // t3 still arrives through saved tracks
    assert_eq!(stats.tracks, 3);
}

#[tokio::test]
async fn missing_profile_aborts_the_run() {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    let mut lib = common::sample_library();
    lib.user = None;
    let source = Arc::new(lib);

    let report = Collector::new(source.clone(), open(&db_path), CollectorOptions::default()).collect_all().await;

    assert!(!report.success);
    assert!(report.error.as_deref().unwrap_or_default().contains("No user profile"));
    assert_eq!(report.total_errors, 1);
    assert_eq!(report.collection_stats.errors, 1);
    assert_eq!(source.calls(), vec!["current_user".to_string()]);

    let conn = open(&db_path);
    assert_eq!(store::database_stats(&conn).unwrap().tracks, 0);
    assert_eq!(db::latest_sync_run(&conn).unwrap().unwrap().status, "failed");
}

#[tokio::test]
async fn audio_analysis_runs_when_enabled_and_respects_limit() {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    let source = Arc::new(common::sample_library());
    let opts = CollectorOptions { enable_audio_analysis: true, audio_analysis_limit: 2, ..Default::default() };

    let report = Collector::new(source.clone(), open(&db_path), opts).collect_all().await;

    assert!(report.success);
    // limit 2 picks t1 and t2 (ordered by id); only t1 has an analysis upstream
    assert_eq!(source.calls().iter().filter(|c| *c == "audio_analysis").count(), 2);
    assert_eq!(report.collection_stats.audio_analysis, 1);
    assert_eq!(report.total_errors, 1);

    let conn = open(&db_path);
    let track_json: String = conn
        .query_row("SELECT track_analysis FROM audio_analysis WHERE track_id = 't1'", [], |r| r.get(0))
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&track_json).unwrap();
    assert_eq!(v["tempo"], 120.0);
}
