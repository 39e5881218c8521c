use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// (file stem, query). Audio analysis is exported at track level only; the
/// per-segment arrays stay in the database.
const EXPORTS: [(&str, &str); 14] = [
    ("users", "SELECT * FROM users ORDER BY id"),
    ("artists", "SELECT * FROM artists ORDER BY id"),
    ("albums", "SELECT * FROM albums ORDER BY id"),
    ("tracks", "SELECT * FROM tracks ORDER BY id"),
    ("playlists", "SELECT * FROM playlists ORDER BY id"),
    ("playlist_tracks", "SELECT * FROM playlist_tracks ORDER BY playlist_id, position"),
    ("track_artists", "SELECT * FROM track_artists ORDER BY track_id, artist_id"),
    ("album_artists", "SELECT * FROM album_artists ORDER BY album_id, artist_id"),
    ("audio_features", "SELECT * FROM audio_features ORDER BY track_id"),
    (
        "audio_analysis",
        "SELECT track_id, track_analysis, created_at, updated_at FROM audio_analysis ORDER BY track_id",
    ),
    ("saved_tracks", "SELECT user_id, track_id, added_at, created_at FROM saved_tracks ORDER BY user_id, added_at DESC"),
    ("user_top_tracks", "SELECT user_id, track_id, time_range, rank, created_at FROM user_top_tracks ORDER BY user_id, time_range, rank"),
    ("user_top_artists", "SELECT user_id, artist_id, time_range, rank, created_at FROM user_top_artists ORDER BY user_id, time_range, rank"),
    ("user_followed_artists", "SELECT * FROM user_followed_artists ORDER BY user_id, artist_id"),
];

fn cell(v: ValueRef<'_>) -> String {
    match v {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn export_query(conn: &Connection, sql: &str, dest: &Path) -> Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = headers.len();
    let mut rows = stmt.query([])?;

    let mut writer: Option<csv::Writer<std::fs::File>> = None;
    let mut written = 0usize;
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(width);
        for i in 0..width {
            record.push(cell(row.get_ref(i)?));
        }
        // file is only created once there is a row to write
        if writer.is_none() {
            let mut w = csv::Writer::from_path(dest).with_context(|| format!("creating {}", dest.display()))?;
            w.write_record(&headers)?;
            writer = Some(w);
        }
        if let Some(w) = writer.as_mut() {
            w.write_record(&record)?;
        }
        written += 1;
    }
    if let Some(mut w) = writer {
        w.flush()?;
    }
    Ok(written)
}

/// Write one CSV per non-empty table into `out_dir`. Returns the files written.
pub fn export_all(conn: &Connection, out_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let mut files = Vec::new();
    for (name, sql) in EXPORTS {
        let dest = out_dir.join(format!("{}.csv", name));
        let rows = export_query(conn, sql, &dest).with_context(|| format!("exporting {}", name))?;
        if rows == 0 {
            debug!("{} is empty; no file written", name);
            continue;
        }
        info!("Exported {} rows to {}", rows, dest.display());
        files.push(dest);
    }
    Ok(files)
}
