use super::error::{found, AppError};
use super::AppState;
use crate::api::oauth::random_state;
use crate::api::LibrarySource;
use crate::store;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

pub(super) async fn index() -> Response {
    found("/login")
}

pub(super) async fn login(State(state): State<AppState>) -> Result<Response, AppError> {
    let st = random_state();
    let url = state
        .client
        .oauth()
        .authorize_url(&st)
        .map_err(|e| AppError::Internal(e.into()))?;
    state.remember_state(st).await;
    Ok(found(url.as_str()))
}

#[derive(Debug, Deserialize)]
pub(super) struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub(super) async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    if let Some(err) = params.error.as_deref() {
        warn!("authorization declined upstream: {}", err);
        return Ok(found("/login"));
    }
    let Some(code) = params.code else {
        return Ok(found("/login"));
    };
    let returned_state = params.state.unwrap_or_default();
    if !state.take_state(&returned_state).await {
        return Err(AppError::BadRequest("Invalid or expired OAuth state".into()));
    }

    let token = state.client.oauth().exchange_code(&code).await?;
    state.client.install_token(token).await?;

    let profile = state.client.current_user().await?;
    let user_id = profile.id.clone();
    state.with_conn(move |c| store::store_user(c, &profile)).await?;
    info!("Logged in as {}", user_id);

    if state.config.sync_on_login {
        if state.start_sync().await {
            info!("Started library sync for {}", user_id);
        } else {
            info!("Sync already running; not starting another");
        }
    }
    Ok(format!("Logged in as {}", user_id).into_response())
}
