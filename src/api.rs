//! HTTP API handlers.

mod history;
mod query;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::PlacesError;
use crate::{db_call, AppState};

/// Request bodies are small JSON documents; URLs are capped at 64 KiB.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Auth middleware: checks the Bearer token if an API key is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, PlacesError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(PlacesError::Unauthorized)?;

    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(PlacesError::Unauthorized)
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        .route("/visits", post(history::add_visit))
        .route("/typed", post(history::mark_typed))
        .route("/bookmarked", post(history::mark_bookmarked))
        .route("/redirects", post(history::record_redirect))
        .route("/places", get(history::get_place).delete(history::remove_page))
        .route("/places/title", put(history::set_title))
        .route("/history", axum::routing::delete(history::clear_history))
        .route("/query", get(query::run_query))
        .route("/maintenance", post(query::run_maintenance))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, PlacesError> {
    let (places, visits) =
        db_call(&state.history, |h| Ok((h.place_total()?, h.visit_total()?))).await?;
    let schema = state.history.schema_status();
    Ok(Json(serde_json::json!({
        "name": "places",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "schema": schema,
        "places": places,
        "visits": visits,
        "private_browsing": state.history.private_browsing(),
    })))
}
