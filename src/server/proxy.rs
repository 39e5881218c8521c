// Thin pass-through of upstream resources. Every handler bounces to /login
// when no usable token is stored.
use super::error::AppError;
use super::AppState;
use crate::models::{AudioAnalysis, Playlist, TimeRange, Track, UserProfile};
use axum::extract::{Path, Query, RawQuery, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

type JsonResult = Result<Json<Value>, AppError>;

/// Collect `ids` from the query string, accepting both `ids=a,b` and repeated `ids=a&ids=b`.
pub(crate) fn ids_param(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else { return Vec::new() };
    url::form_urlencoded::parse(raw.as_bytes())
        .filter(|(k, _)| k == "ids")
        .flat_map(|(_, v)| v.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
pub(super) struct TopParams {
    time_range: Option<String>,
}

pub(crate) fn parse_range(raw: Option<&str>) -> Result<TimeRange, AppError> {
    match raw {
        None => Ok(TimeRange::default()),
        Some(s) => TimeRange::parse(s).ok_or_else(|| {
            AppError::BadRequest(format!("time_range must be short_term, medium_term or long_term, got {}", s))
        }),
    }
}

pub(super) async fn user(State(state): State<AppState>) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(state.source.current_user().await?))
}

pub(super) async fn user_playlists(State(state): State<AppState>) -> JsonResult {
    let playlists = state.source.user_playlists().await?;
    Ok(Json(json!({ "playlists": playlists })))
}

pub(super) async fn playlist(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Playlist>, AppError> {
    Ok(Json(state.source.playlist(&id).await?))
}

pub(super) async fn playlist_items(State(state): State<AppState>, Path(id): Path<String>) -> JsonResult {
    let items = state.source.playlist_items(&id).await?;
    Ok(Json(json!({ "items": items })))
}

pub(super) async fn playlist_cover(State(state): State<AppState>, Path(id): Path<String>) -> JsonResult {
    let images = state.source.playlist_cover_image(&id).await?;
    Ok(Json(json!({ "cover_image": images })))
}

pub(super) async fn track(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Track>, AppError> {
    Ok(Json(state.source.track(&id).await?))
}

pub(super) async fn several_tracks(State(state): State<AppState>, RawQuery(raw): RawQuery) -> JsonResult {
    let ids = ids_param(raw.as_deref());
    if ids.is_empty() {
        return Err(AppError::BadRequest("ids query parameter is required".into()));
    }
    let tracks = state.source.several_tracks(&ids).await?;
    Ok(Json(json!({ "tracks": tracks })))
}

pub(super) async fn saved_tracks(State(state): State<AppState>) -> JsonResult {
    let saved = state.source.saved_tracks().await?;
    Ok(Json(json!({ "saved_tracks": saved })))
}

pub(super) async fn several_audio_features(State(state): State<AppState>, RawQuery(raw): RawQuery) -> JsonResult {
    let ids = ids_param(raw.as_deref());
    if ids.is_empty() {
        return Err(AppError::BadRequest("ids query parameter is required".into()));
    }
    let features = state.source.audio_features(&ids).await?;
    Ok(Json(json!({ "audio_features": features })))
}

pub(super) async fn track_audio_features(State(state): State<AppState>, Path(id): Path<String>) -> JsonResult {
    let features = state.source.audio_features(std::slice::from_ref(&id)).await?;
    match features.into_iter().next() {
        Some(f) => Ok(Json(json!({ "audio_features": f }))),
        None => Err(AppError::NotFound(format!("No audio features for track {}", id))),
    }
}

pub(super) async fn track_audio_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AudioAnalysis>, AppError> {
    Ok(Json(state.source.audio_analysis(&id).await?))
}

pub(super) async fn top_items(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<TopParams>,
) -> JsonResult {
    let range = parse_range(params.time_range.as_deref())?;
    let items = match kind.as_str() {
        "tracks" => serde_json::to_value(state.source.top_tracks(range).await?),
        "artists" => serde_json::to_value(state.source.top_artists(range).await?),
        other => return Err(AppError::BadRequest(format!("unknown top item type {}; use tracks or artists", other))),
    }
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(Json(json!({ "top_items": items })))
}

pub(super) async fn followed_artists(State(state): State<AppState>) -> JsonResult {
    let artists = state.source.followed_artists().await?;
    Ok(Json(json!({ "followed_artists": artists })))
}
