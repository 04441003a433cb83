//! Query and maintenance handlers.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::db::MaintenanceReport;
use crate::error::PlacesError;
use crate::results::ResultNode;
use crate::{db_call, AppState};

#[derive(Deserialize)]
pub(super) struct QueryParams {
    /// A serialized `place:` query.
    q: String,
}

pub(super) async fn run_query(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<ResultNode>>, PlacesError> {
    let nodes = db_call(&state.history, move |h| h.query_uri(&params.q)).await?;
    Ok(Json(nodes))
}

pub(super) async fn run_maintenance(
    State(state): State<AppState>,
) -> Result<Json<MaintenanceReport>, PlacesError> {
    let report = db_call(&state.history, |h| h.run_idle_maintenance(h.now())).await?;
    Ok(Json(report))
}
