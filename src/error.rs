use axum::http::StatusCode;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    #[error("uri exceeds maximum length")]
    UriTooLong,

    #[error("scheme is not recorded in history: {0}")]
    DisallowedScheme(String),

    #[error("query list must not be empty")]
    EmptyQueryList,

    #[error("malformed query: {0}")]
    QueryParse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("database is locked")]
    Locked,

    #[error("database is corrupt: {0}")]
    Corrupt(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("maintenance failed: {0}")]
    Maintenance(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlacesError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Locked => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_)
            | Self::Internal(_)
            | Self::Schema(_)
            | Self::Corrupt(_)
            | Self::Maintenance(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Classify an error raised while opening or first touching the store.
    /// Busy/locked and corrupt files get their own variants so callers can
    /// tell "try later" from "recreate".
    pub(crate) fn from_open(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::Locked,
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
                Self::Corrupt(e.to_string())
            }
            _ => Self::Database(e),
        }
    }
}

impl axum::response::IntoResponse for PlacesError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
