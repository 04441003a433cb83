//! Visit recording and page handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{AddUriRequest, Place, RemoveSummary, Visit};
use crate::error::PlacesError;
use crate::{db_call, AppState};

#[derive(Serialize)]
pub(super) struct VisitResponse {
    /// `None` when nothing was recorded.
    visit_id: Option<i64>,
}

pub(super) async fn add_visit(
    State(state): State<AppState>,
    Json(req): Json<AddUriRequest>,
) -> Result<(StatusCode, Json<VisitResponse>), PlacesError> {
    let visit_id = db_call(&state.history, move |h| h.record(&req)).await?;
    let status = if visit_id.is_some() { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(VisitResponse { visit_id })))
}

#[derive(Deserialize)]
pub(super) struct UrlBody {
    url: String,
}

pub(super) async fn mark_typed(
    State(state): State<AppState>,
    Json(body): Json<UrlBody>,
) -> Result<StatusCode, PlacesError> {
    db_call(&state.history, move |h| h.mark_page_as_typed(&body.url)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn mark_bookmarked(
    State(state): State<AppState>,
    Json(body): Json<UrlBody>,
) -> Result<StatusCode, PlacesError> {
    db_call(&state.history, move |h| h.mark_page_as_followed_bookmark(&body.url)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct RedirectBody {
    source: String,
    dest: String,
    #[serde(default)]
    temporary: bool,
}

pub(super) async fn record_redirect(
    State(state): State<AppState>,
    Json(body): Json<RedirectBody>,
) -> Result<StatusCode, PlacesError> {
    db_call(&state.history, move |h| {
        h.record_redirect(&body.source, &body.dest, body.temporary)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct UrlQuery {
    url: String,
}

#[derive(Serialize)]
pub(super) struct PlaceDetail {
    #[serde(flatten)]
    place: Place,
    visits: Vec<Visit>,
}

pub(super) async fn get_place(
    State(state): State<AppState>,
    Query(q): Query<UrlQuery>,
) -> Result<Json<PlaceDetail>, PlacesError> {
    let detail = db_call(&state.history, move |h| {
        let place = h.get_place(&q.url)?.ok_or(PlacesError::NotFound)?;
        let visits = h.get_visits(&q.url)?;
        Ok(PlaceDetail { place, visits })
    })
    .await?;
    Ok(Json(detail))
}

#[derive(Deserialize)]
pub(super) struct TitleBody {
    url: String,
    title: String,
}

pub(super) async fn set_title(
    State(state): State<AppState>,
    Json(body): Json<TitleBody>,
) -> Result<StatusCode, PlacesError> {
    db_call(&state.history, move |h| h.set_page_title(&body.url, &body.title)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn remove_page(
    State(state): State<AppState>,
    Query(q): Query<UrlQuery>,
) -> Result<Json<RemoveSummary>, PlacesError> {
    let summary = db_call(&state.history, move |h| h.remove_page(&q.url)).await?;
    Ok(Json(summary))
}

pub(super) async fn clear_history(
    State(state): State<AppState>,
) -> Result<Json<RemoveSummary>, PlacesError> {
    let summary = db_call(&state.history, |h| h.remove_all_pages()).await?;
    debug!(places = summary.places_removed, "history cleared over http");
    Ok(Json(summary))
}
