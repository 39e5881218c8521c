use anyhow::Result;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub type Pool = r2d2::Pool<SqliteConnectionManager>;

const SCHEMA: &str = include_str!("../db/schema.sql");

/// Tables in drop order (children before parents).
const TABLES: [&str; 17] = [
    "playlist_tracks",
    "track_artists",
    "album_artists",
    "user_followed_artists",
    "saved_tracks",
    "user_top_tracks",
    "user_top_artists",
    "audio_features",
    "audio_analysis",
    "playlists",
    "tracks",
    "albums",
    "artists",
    "users",
    "sync_runs",
    "credentials",
    "sqlite_sequence",
];

pub fn open_or_create(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Pool for the HTTP server; every pooled connection enforces foreign keys.
pub fn create_pool(path: &Path) -> Result<Pool> {
    // creates the file and schema before the pool hands out connections
    open_or_create(path)?;
    let manager = SqliteConnectionManager::file(path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;"));
    let pool = r2d2::Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}

/// Drop every table. `sqlite_sequence` is internal and only cleared.
pub fn drop_all(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
    for table in TABLES {
        if table == "sqlite_sequence" {
            let exists: Option<String> = tx
                .query_row("SELECT name FROM sqlite_master WHERE name = 'sqlite_sequence'", [], |r| r.get(0))
                .optional()?;
            if exists.is_some() {
                tx.execute("DELETE FROM sqlite_sequence", [])?;
            }
            continue;
        }
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))?;
    }
    tx.commit()?;
    Ok(())
}

/// Connectivity check used by `/db-test`: number of stored users.
pub fn ping(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?)
}

/// Save raw credential JSON for a provider, with optional client_id/client_secret.
/// Passing `None` for the client fields keeps whatever was stored before.
pub fn save_credential_raw(
    conn: &Connection,
    provider: &str,
    json_blob: &str,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO credentials (provider, token_json, client_id, client_secret, last_refreshed) VALUES (?1, ?2, ?3, ?4, strftime('%s','now')) ON CONFLICT(provider) DO UPDATE SET token_json = excluded.token_json, client_id = COALESCE(excluded.client_id, credentials.client_id), client_secret = COALESCE(excluded.client_secret, credentials.client_secret), last_refreshed = strftime('%s','now')",
        params![provider, json_blob, client_id, client_secret],
    )?;
    Ok(())
}

/// Load raw credential JSON and client_id/client_secret for a provider
pub fn load_credential_with_client(conn: &Connection, provider: &str) -> Result<Option<(String, Option<String>, Option<String>)>> {
    let mut stmt = conn.prepare("SELECT token_json, client_id, client_secret FROM credentials WHERE provider = ?1 LIMIT 1")?;
    let row = stmt
        .query_row(params![provider], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?, r.get::<_, Option<String>>(2)?))
        })
        .optional()?;
    Ok(row)
}

pub fn delete_credential(conn: &Connection, provider: &str) -> Result<()> {
    conn.execute("DELETE FROM credentials WHERE provider = ?1", params![provider])?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncRun {
    pub id: String,
    pub user_id: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub report: Option<serde_json::Value>,
}

pub fn start_sync_run(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_runs (id, started_at, status) VALUES (?1, strftime('%s','now'), 'running')",
        params![id],
    )?;
    Ok(())
}

pub fn finish_sync_run(conn: &Connection, id: &str, user_id: Option<&str>, status: &str, report_json: &str) -> Result<()> {
    conn.execute(
        "UPDATE sync_runs SET user_id = ?2, status = ?3, report_json = ?4, finished_at = strftime('%s','now') WHERE id = ?1",
        params![id, user_id, status, report_json],
    )?;
    Ok(())
}

pub fn latest_sync_run(conn: &Connection) -> Result<Option<SyncRun>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, started_at, finished_at, status, report_json FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT 1",
    )?;
    let row = stmt
        .query_row([], |r| {
            let report: Option<String> = r.get(5)?;
            Ok(SyncRun {
                id: r.get(0)?,
                user_id: r.get(1)?,
                started_at: r.get(2)?,
                finished_at: r.get(3)?,
                status: r.get(4)?,
                report: report.and_then(|s| serde_json::from_str(&s).ok()),
            })
        })
        .optional()?;
    Ok(row)
}
