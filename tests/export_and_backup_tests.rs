mod common;

use mockito::{Matcher, Server};
use musivault::backup;
use musivault::collector::{Collector, CollectorOptions};
use musivault::config::{BackupConfig, Config};
use musivault::db;
use musivault::export;
use musivault::retry::RetryConfig;
use std::path::Path;
use std::sync::Arc;

fn synced_vault(db_path: &Path) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let report = rt.block_on(
        Collector::new(
            Arc::new(common::sample_library()),
            db::open_or_create(db_path).unwrap(),
            CollectorOptions::default(),
        )
        .collect_all(),
    );
    assert!(report.success, "{:?}", report.error);
}

#[test]
fn export_writes_one_csv_per_populated_table() {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    synced_vault(&db_path);

    let out = td.path().join("csv");
    let conn = db::open_or_create(&db_path).unwrap();
    let files = export::export_all(&conn, &out).unwrap();

    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert!(names.contains(&"tracks.csv".to_string()));
    assert!(names.contains(&"playlist_tracks.csv".to_string()));
    assert!(names.contains(&"user_followed_artists.csv".to_string()));
    // analysis was disabled so that table stays empty
    assert!(!names.contains(&"audio_analysis.csv".to_string()));
    assert!(!out.join("audio_analysis.csv").exists());

    let mut rdr = csv::Reader::from_path(out.join("tracks.csv")).unwrap();
    let headers = rdr.headers().unwrap().clone();
    assert_eq!(headers.get(0), Some("id"));
    let ids: Vec<String> = rdr.records().map(|r| r.unwrap()[0].to_string()).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&"t3".to_string()));
}

#[test]
fn export_of_empty_vault_writes_nothing() {
    let td = tempfile::tempdir().unwrap();
    let conn = db::open_or_create(&td.path().join("vault.db")).unwrap();
    let out = td.path().join("csv");
    assert!(export::export_all(&conn, &out).unwrap().is_empty());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn snapshot_is_a_readable_copy() {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    synced_vault(&db_path);

    let conn = db::open_or_create(&db_path).unwrap();
    let dest = td.path().join("snaps").join("copy.db");
    backup::snapshot(&conn, &dest).unwrap();
    // a second snapshot to the same path replaces the first
    backup::snapshot(&conn, &dest).unwrap();

    let copy = rusqlite::Connection::open(&dest).unwrap();
    let tracks: i64 = copy.query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0)).unwrap();
    assert_eq!(tracks, 3);
}

#[test]
fn upload_puts_snapshot_with_bearer() {
    let mut server = Server::new();
    let m = server
        .mock("PUT", "/bucket/vault.db")
        .match_header("authorization", "Bearer t0k")
        .match_header("content-type", "application/vnd.sqlite3")
        .match_body(Matcher::Exact("snapshot-bytes".into()))
        .with_status(201)
        .create();

    let td = tempfile::tempdir().unwrap();
    let file = td.path().join("snap.db");
    std::fs::write(&file, b"snapshot-bytes").unwrap();
    let cfg = BackupConfig {
        url: format!("{}/bucket/vault.db", server.url()),
        bearer_token: Some("t0k".into()),
        keep_local_snapshot: false,
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(backup::upload(&cfg, &file, &RetryConfig::none())).unwrap();
    m.assert();
}

#[test]
fn upload_failure_is_reported() {
    let mut server = Server::new();
    let _m = server.mock("PUT", "/bucket/vault.db").with_status(403).with_body("denied").create();

    let td = tempfile::tempdir().unwrap();
    let file = td.path().join("snap.db");
    std::fs::write(&file, b"x").unwrap();
    let cfg = BackupConfig {
        url: format!("{}/bucket/vault.db", server.url()),
        bearer_token: None,
        keep_local_snapshot: false,
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    let err = rt.block_on(backup::upload(&cfg, &file, &RetryConfig::none())).unwrap_err();
    assert!(format!("{:#}", err).contains("403"));
}

#[test]
fn configured_backup_uploads_and_cleans_up() {
    let mut server = Server::new();
    let m = server.mock("PUT", "/vault.db").with_status(200).create();

    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("vault.db");
    synced_vault(&db_path);

    let mut cfg = Config::default();
    cfg.db_path = db_path.clone();
    cfg.max_retries = 0;
    cfg.backup = Some(BackupConfig {
        url: format!("{}/vault.db", server.url()),
        bearer_token: None,
        keep_local_snapshot: false,
    });

    let rt = tokio::runtime::Runtime::new().unwrap();
    assert!(rt.block_on(backup::run_configured(&cfg)).unwrap());
    m.assert();

    // only the database itself is left in the directory
    let left: Vec<String> = std::fs::read_dir(td.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".db"))
        .collect();
    assert_eq!(left, vec!["vault.db".to_string()]);

    cfg.backup = None;
    assert!(!rt.block_on(backup::run_configured(&cfg)).unwrap());
}
