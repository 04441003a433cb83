//! places: visit history with redirect attribution, frecency ranking and a
//! declarative query layer, plus the HTTP daemon in front of it.

pub mod api;
pub mod collation;
pub mod config;
pub mod db;
pub mod error;
pub mod observer;
pub mod query;
pub mod recent;
pub mod results;
pub mod time;
pub mod uri;

use std::sync::Arc;

pub type SharedHistory = Arc<db::HistoryDB>;

/// Run a blocking store operation on tokio's blocking thread pool.
///
/// Every synchronous `HistoryDB` call made from async code goes through
/// this so worker threads never wait on SQLite.
pub async fn db_call<F, T>(history: &SharedHistory, f: F) -> Result<T, error::PlacesError>
where
    F: FnOnce(&db::HistoryDB) -> Result<T, error::PlacesError> + Send + 'static,
    T: Send + 'static,
{
    let history = Arc::clone(history);
    tokio::task::spawn_blocking(move || f(&history))
        .await
        .map_err(|e| error::PlacesError::Internal(e.to_string()))?
}

#[derive(Clone)]
pub struct AppState {
    pub history: SharedHistory,
    /// Bearer token required on every route but `/health` when set.
    pub api_key: Option<String>,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(history: SharedHistory, api_key: Option<String>) -> Self {
        Self { history, api_key, started_at: std::time::Instant::now() }
    }
}
