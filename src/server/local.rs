use super::error::AppError;
use super::proxy::parse_range;
use super::AppState;
use crate::db;
use crate::library;
use crate::store;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

type JsonResult = Result<Json<Value>, AppError>;

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub(super) async fn db_test(State(state): State<AppState>) -> JsonResult {
    let user_count = state.with_conn(|c| db::ping(c)).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Database connection successful",
        "user_count": user_count,
    })))
}

pub(super) async fn db_stats(State(state): State<AppState>) -> JsonResult {
    let stats = state.with_conn(|c| store::database_stats(c)).await?;
    Ok(Json(json!({ "status": "success", "stats": stats })))
}

pub(super) async fn start_sync(State(state): State<AppState>) -> Result<Response, AppError> {
    // bounce to /login before spawning anything when the token is unusable
    state.source.current_user().await?;
    if !state.start_sync().await {
        return Err(AppError::Conflict("A sync is already running".into()));
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))).into_response())
}

pub(super) async fn sync_status(State(state): State<AppState>) -> JsonResult {
    let current = state.sync_status().await;
    let last_run = state.with_conn(|c| db::latest_sync_run(c)).await?;
    Ok(Json(json!({
        "status": "success",
        "sync": current,
        "last_run": last_run,
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct UserParams {
    user_id: Option<String>,
    time_range: Option<String>,
}

/// Explicit `user_id`, else whoever synced last.
async fn resolve_user(state: &AppState, explicit: Option<String>) -> Result<String, AppError> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    state
        .with_conn(|c| store::current_user_id(c))
        .await?
        .ok_or_else(|| AppError::NotFound("No synced user yet; log in and run a sync first".into()))
}

pub(super) async fn library_user(State(state): State<AppState>, Query(params): Query<UserParams>) -> JsonResult {
    let user_id = resolve_user(&state, params.user_id).await?;
    let uid = user_id.clone();
    match state.with_conn(move |c| library::get_user(c, &uid)).await? {
        Some(u) => Ok(Json(json!({ "user": u }))),
        None => Err(AppError::NotFound(format!("User {} is not in the vault", user_id))),
    }
}

pub(super) async fn library_playlists(State(state): State<AppState>, Query(params): Query<UserParams>) -> JsonResult {
    let user_id = resolve_user(&state, params.user_id).await?;
    let uid = user_id.clone();
    let playlists = state.with_conn(move |c| library::list_playlists(c, &uid)).await?;
    Ok(Json(json!({ "user_id": user_id, "playlists": playlists })))
}

pub(super) async fn library_playlist(State(state): State<AppState>, Path(id): Path<String>) -> JsonResult {
    let pid = id.clone();
    match state.with_conn(move |c| library::get_playlist(c, &pid, true)).await? {
        Some(p) => Ok(Json(json!({ "playlist": p }))),
        None => Err(AppError::NotFound(format!("Playlist {} is not in the vault", id))),
    }
}

pub(super) async fn library_saved_tracks(State(state): State<AppState>, Query(params): Query<UserParams>) -> JsonResult {
    let user_id = resolve_user(&state, params.user_id).await?;
    let uid = user_id.clone();
    let saved = state.with_conn(move |c| library::list_saved_tracks(c, &uid)).await?;
    Ok(Json(json!({ "user_id": user_id, "saved_tracks": saved })))
}

pub(super) async fn library_top(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<UserParams>,
) -> JsonResult {
    let range = parse_range(params.time_range.as_deref())?;
    let user_id = resolve_user(&state, params.user_id).await?;
    let uid = user_id.clone();
    let items = match kind.as_str() {
        "tracks" => state
            .with_conn(move |c| Ok(serde_json::to_value(library::list_top_tracks(c, &uid, range)?)?))
            .await?,
        "artists" => state
            .with_conn(move |c| Ok(serde_json::to_value(library::list_top_artists(c, &uid, range)?)?))
            .await?,
        other => return Err(AppError::BadRequest(format!("unknown top item type {}; use tracks or artists", other))),
    };
    Ok(Json(json!({ "user_id": user_id, "time_range": range.as_str(), "top_items": items })))
}

pub(super) async fn library_followed_artists(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> JsonResult {
    let user_id = resolve_user(&state, params.user_id).await?;
    let uid = user_id.clone();
    let artists = state.with_conn(move |c| library::list_followed_artists(c, &uid)).await?;
    Ok(Json(json!({ "user_id": user_id, "followed_artists": artists })))
}
