mod common;

use musivault::db;
use musivault::library;
use musivault::models::{SavedTrackItem, TimeRange};
use musivault::store;
use rusqlite::Connection;

fn fresh() -> (tempfile::TempDir, Connection) {
    let td = tempfile::tempdir().unwrap();
    let conn = db::open_or_create(&td.path().join("vault.db")).unwrap();
    (td, conn)
}

#[test]
fn upsert_refreshes_columns_but_keeps_created_at() {
    let (_td, conn) = fresh();
    let mut u = common::user();
    store::store_user(&conn, &u).unwrap();
    conn.execute("UPDATE users SET created_at = 100, updated_at = 100 WHERE id = 'listener'", []).unwrap();

    u.display_name = Some("Renamed".into());
    store::store_user(&conn, &u).unwrap();

    let (name, created, updated): (String, i64, i64) = conn
        .query_row("SELECT display_name, created_at, updated_at FROM users WHERE id = 'listener'", [], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .unwrap();
    assert_eq!(name, "Renamed");
    assert_eq!(created, 100);
    assert!(updated > 100);
    assert_eq!(store::database_stats(&conn).unwrap().users, 1);
}

#[test]
fn entities_without_ids_are_rejected() {
    let (_td, conn) = fresh();
    let mut t = common::track("x", "No id", None, vec![]);
    t.id = None;
    assert!(store::store_track(&conn, &t, None).is_err());
    let mut a = common::artist("a", "No id");
    a.id = None;
    assert!(store::store_artist(&conn, &a).is_err());
}

#[test]
fn top_tracks_are_replaced_per_time_range() {
    let (_td, conn) = fresh();
    store::store_user(&conn, &common::user()).unwrap();
    let tracks: Vec<_> = ["a", "b", "c"].iter().map(|id| common::track(id, id, None, vec![])).collect();
    for t in &tracks {
        store::store_track(&conn, t, None).unwrap();
    }

    store::store_top_tracks(&conn, "listener", &tracks, TimeRange::ShortTerm).unwrap();
    store::store_top_tracks(&conn, "listener", &tracks[..1], TimeRange::LongTerm).unwrap();
    // new ranking for short_term replaces the old one entirely
    let n = store::store_top_tracks(&conn, "listener", &[tracks[2].clone(), tracks[0].clone()], TimeRange::ShortTerm).unwrap();
    assert_eq!(n, 2);

    let short = library::list_top_tracks(&conn, "listener", TimeRange::ShortTerm).unwrap();
    let order: Vec<(i64, String)> = short.iter().map(|t| (t.rank, t.track.as_ref().unwrap().id.clone())).collect();
    assert_eq!(order, vec![(1, "c".to_string()), (2, "a".to_string())]);
    assert_eq!(library::list_top_tracks(&conn, "listener", TimeRange::LongTerm).unwrap().len(), 1);
    assert!(library::list_top_tracks(&conn, "listener", TimeRange::MediumTerm).unwrap().is_empty());
}

#[test]
fn saved_tracks_insert_once_and_list_newest_first() {
    let (_td, conn) = fresh();
    store::store_user(&conn, &common::user()).unwrap();
    let old = common::track("old", "Old", None, vec![]);
    let new = common::track("new", "New", None, vec![]);
    store::store_track(&conn, &old, None).unwrap();
    store::store_track(&conn, &new, None).unwrap();
    let items = vec![
        SavedTrackItem { added_at: Some("2020-01-01T00:00:00Z".into()), track: old },
        SavedTrackItem { added_at: Some("2024-01-01T00:00:00Z".into()), track: new },
    ];

    assert_eq!(store::store_saved_tracks(&conn, "listener", &items).unwrap(), 2);
    assert_eq!(store::store_saved_tracks(&conn, "listener", &items).unwrap(), 0);

    let saved = library::list_saved_tracks(&conn, "listener").unwrap();
    assert_eq!(saved[0].track.as_ref().unwrap().id, "new");
    assert!(saved[0].added_at.as_deref().unwrap().starts_with("2024-01-01"));
}

#[test]
fn followed_artists_keep_original_follow_time() {
    let (_td, conn) = fresh();
    store::store_user(&conn, &common::user()).unwrap();
    let a = common::artist("a", "A");
    let b = common::artist("b", "B");
    store::store_artist(&conn, &a).unwrap();
    store::store_artist(&conn, &b).unwrap();

    store::link_followed_artists(&conn, "listener", &[a.clone()]).unwrap();
    conn.execute("UPDATE user_followed_artists SET followed_at = 42 WHERE artist_id = 'a'", []).unwrap();
    // unfollowed artists disappear, still-followed ones keep their timestamp
    let n = store::link_followed_artists(&conn, "listener", &[a, b]).unwrap();
    assert_eq!(n, 2);
    let at: i64 = conn
        .query_row("SELECT followed_at FROM user_followed_artists WHERE artist_id = 'a'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(at, 42);

    store::link_followed_artists(&conn, "listener", &[]).unwrap();
    assert!(library::list_followed_artists(&conn, "listener").unwrap().is_empty());
}

#[test]
fn track_view_nests_album_and_artists() {
    let (_td, conn) = fresh();
    let band = common::artist("ar1", "The Band");
    let rec = common::album("al1", "Record", vec![band.clone()]);
    let t = common::track("t1", "Opener", Some(rec.clone()), vec![band.clone()]);
    store::store_artist(&conn, &band).unwrap();
    store::store_album(&conn, &rec).unwrap();
    store::link_album_artists(&conn, "al1", &rec.artists).unwrap();
    store::store_track(&conn, &t, None).unwrap();
    store::link_track_artists(&conn, "t1", &t.artists).unwrap();

    let view = library::get_track(&conn, "t1").unwrap().unwrap();
    let album = view.album.expect("album joined through album_id");
    assert_eq!(album.id, "al1");
    assert_eq!(album.artists[0].name, "The Band");
    assert_eq!(view.artists.len(), 1);
    assert_eq!(view.disc_number, Some(1));
    assert!(library::get_track(&conn, "missing").unwrap().is_none());
}

#[test]
fn tracks_missing_features_skip_local_files() {
    let (_td, conn) = fresh();
    let mut local = common::track("local1", "Local", None, vec![]);
    local.is_local = true;
    store::store_track(&conn, &local, None).unwrap();
    store::store_track(&conn, &common::track("t1", "One", None, vec![]), None).unwrap();
    store::store_track(&conn, &common::track("t2", "Two", None, vec![]), None).unwrap();
    store::store_audio_features(&conn, &common::features("t2", 100.0)).unwrap();

    assert_eq!(store::tracks_missing_audio_features(&conn).unwrap(), vec!["t1".to_string()]);
    assert_eq!(store::tracks_missing_audio_analysis(&conn, 1).unwrap(), vec!["t1".to_string()]);
}

#[test]
fn current_user_is_most_recently_updated() {
    let (_td, conn) = fresh();
    assert!(store::current_user_id(&conn).unwrap().is_none());
    store::store_user(&conn, &common::user()).unwrap();
    let mut other = common::user();
    other.id = "second".into();
    store::store_user(&conn, &other).unwrap();
    conn.execute("UPDATE users SET updated_at = 1 WHERE id = 'listener'", []).unwrap();
    assert_eq!(store::current_user_id(&conn).unwrap().as_deref(), Some("second"));
}

#[test]
fn user_view_reads_stored_profile() {
    let (_td, conn) = fresh();
    assert!(library::get_user(&conn, "listener").unwrap().is_none());
    store::store_user(&conn, &common::user()).unwrap();

    let u = library::get_user(&conn, "listener").unwrap().expect("stored user");
    assert_eq!(u.display_name.as_deref(), Some("Listener"));
    assert_eq!(u.country.as_deref(), Some("NL"));
    assert_eq!(u.product.as_deref(), Some("premium"));
    assert_eq!(u.followers_total, Some(0));
}
