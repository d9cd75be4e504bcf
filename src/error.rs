use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// A similarity or neighbor lookup failed, timed out or returned malformed data
    #[error("Similarity oracle error: {0}")]
    Oracle(String),

    /// A rating store read or write failed or timed out
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Nothing is left to recommend after exclusion
    #[error("No candidates: {0}")]
    NoCandidates(String),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a database failure raised while answering a similarity lookup
    pub fn oracle(err: sqlx::Error) -> Self {
        AppError::Oracle(err.to_string())
    }

    /// Wraps a database failure raised while reading or writing ratings and profiles
    pub fn persistence(err: sqlx::Error) -> Self {
        AppError::Persistence(err.to_string())
    }

    /// Reports a similarity-cache failure as the oracle failure it is
    ///
    /// The Redis cache sits inside the oracle, so to callers a cache outage is
    /// just another failed similarity lookup. Other variants pass through.
    pub fn cache_as_oracle(self) -> Self {
        match self {
            AppError::Cache(err) => AppError::Oracle(format!("Similarity cache unavailable: {}", err)),
            other => other,
        }
    }

    /// Short, stable label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Oracle(_) => "oracle",
            AppError::Persistence(_) => "persistence",
            AppError::NoCandidates(_) => "no_candidates",
            AppError::Cache(_) => "cache",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NoCandidates(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Oracle(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Persistence(_) | AppError::Cache(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
