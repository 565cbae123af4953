//! Bookmarks service routes

use std::{convert::Infallible, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post, put},
};
use backend::{OAuthCallback, OAuthProvider, SignIn};
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    error::ApiResult,
    state::AppState,
    view::{AddOutcome, ViewState},
};

/// How long a completed in-process sign-in waits for the view to catch up
const SIGN_IN_SETTLE: Duration = Duration::from_secs(5);

/// Draft fields; absent fields are left unchanged
#[derive(Debug, Default, Deserialize)]
pub struct DraftRequest {
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Create the router for the bookmarks service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/state", get(get_state))
        .route("/events", get(stream_state))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/logout", post(sign_out))
        .route("/auth/:provider", get(sign_in))
        .route("/draft", put(update_draft))
        .route("/bookmarks", post(add_bookmark))
        .route("/bookmarks/:id", delete(delete_bookmark))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "bookmarks-service"
    }))
}

/// Current view snapshot
pub async fn get_state(State(state): State<AppState>) -> Json<ViewState> {
    Json(state.view.state())
}

/// Stream every view snapshot as a server-sent `state` event
pub async fn stream_state(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.view.subscribe();
    let current = receiver.borrow().clone();

    let updates = stream::unfold(receiver, |mut receiver| async move {
        receiver.changed().await.ok()?;
        let snapshot = receiver.borrow_and_update().clone();
        Some((snapshot, receiver))
    });

    let events = stream::once(async move { current })
        .chain(updates)
        .filter_map(|snapshot| async move {
            match Event::default().event("state").json_data(&snapshot) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    warn!("Failed to encode view state: {}", e);
                    None
                }
            }
        });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Start signing in with a provider
pub async fn sign_in(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<Response> {
    let provider: OAuthProvider = provider.parse()?;

    match state.view.sign_in(provider).await? {
        SignIn::Redirect { url } => {
            info!("Redirecting to {} for sign-in", provider.as_str());
            Ok(Redirect::to(&url).into_response())
        }
        SignIn::Completed => {
            let mut receiver = state.view.subscribe();
            let settled = matches!(
                tokio::time::timeout(
                    SIGN_IN_SETTLE,
                    receiver.wait_for(|s| s.session.is_authenticated())
                )
                .await,
                Ok(Ok(_))
            );
            if !settled {
                warn!("View did not observe the new session in time");
            }
            Ok(Json(state.view.state()).into_response())
        }
    }
}

/// OAuth redirect landing
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(callback): Query<OAuthCallback>,
) -> ApiResult<Redirect> {
    let session = state.client.identity.complete_sign_in(callback).await?;
    if let Some(user) = session.principal() {
        info!("Signed in as {}", user.email);
    }
    Ok(Redirect::to("/state"))
}

/// Sign out
pub async fn sign_out(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.view.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Update the draft fields
pub async fn update_draft(
    State(state): State<AppState>,
    Json(payload): Json<DraftRequest>,
) -> ApiResult<StatusCode> {
    state.view.set_draft(payload.title, payload.url)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a bookmark; fields missing from the body come from the drafts
pub async fn add_bookmark(
    State(state): State<AppState>,
    payload: Option<Json<DraftRequest>>,
) -> ApiResult<impl IntoResponse> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();

    let outcome = state.view.submit_with(payload.title, payload.url).await?;
    let status = match outcome {
        AddOutcome::Inserted => StatusCode::ACCEPTED,
        AddOutcome::Skipped => StatusCode::OK,
    };
    Ok((status, Json(json!({ "outcome": outcome }))))
}

/// Delete a bookmark
pub async fn delete_bookmark(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.view.delete(id).await?;
    Ok(StatusCode::ACCEPTED)
}
