use crate::api::SpotifyError;
use crate::config::{BackupConfig, Config};
use crate::retry::{retry, RetryConfig};
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Write a consistent copy of the open database to `dest` with `VACUUM INTO`.
/// An existing file at `dest` is replaced.
pub fn snapshot(conn: &Connection, dest: &Path) -> Result<()> {
    if dest.exists() {
        std::fs::remove_file(dest).with_context(|| format!("removing old snapshot {}", dest.display()))?;
    }
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let dest_str = dest.to_string_lossy().to_string();
    conn.execute("VACUUM INTO ?1", params![dest_str])
        .with_context(|| format!("snapshot to {}", dest.display()))?;
    Ok(())
}

/// Snapshot file name next to the database: `<stem>-<UTC timestamp>.db`.
pub fn snapshot_path(db_path: &Path) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "spotify_data".into());
    let name = format!("{}-{}.db", stem, Utc::now().format("%Y%m%dT%H%M%SZ"));
    db_path.with_file_name(name)
}

/// PUT the snapshot bytes to the configured destination.
pub async fn upload(backup: &BackupConfig, snapshot: &Path, policy: &RetryConfig) -> Result<()> {
    let bytes = tokio::fs::read(snapshot)
        .await
        .with_context(|| format!("reading snapshot {}", snapshot.display()))?;
    let http = Client::new();
    retry(policy, || {
        let mut req = http
            .put(&backup.url)
            .header(CONTENT_TYPE, "application/vnd.sqlite3")
            .body(bytes.clone());
        if let Some(token) = backup.bearer_token.as_deref() {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        async move {
            let resp = req.send().await?;
            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = resp.text().await.unwrap_or_default();
                Err(SpotifyError::Status { status: status.as_u16(), body })
            }
        }
    })
    .await
    .context("backup upload failed")?;
    info!("Uploaded {} bytes to backup destination", bytes.len());
    Ok(())
}

/// Snapshot and upload when a `[backup]` section is configured.
/// Returns false when backups are not configured.
pub async fn run_configured(cfg: &Config) -> Result<bool> {
    let Some(backup) = cfg.backup.clone() else {
        info!("No [backup] section configured; skipping backup");
        return Ok(false);
    };
    let db_path = cfg.db_path.clone();
    let dest = snapshot_path(&db_path);
    let dest_for_task = dest.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let conn = Connection::open(&db_path)?;
        snapshot(&conn, &dest_for_task)
    })
    .await??;
    info!("Wrote snapshot {}", dest.display());

    let result = upload(&backup, &dest, &cfg.retry_config()).await;
    if !backup.keep_local_snapshot {
        if let Err(e) = tokio::fs::remove_file(&dest).await {
            warn!("could not remove snapshot {}: {}", dest.display(), e);
        }
    }
    result.map(|_| true)
}
