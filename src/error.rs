use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the booking/chat core.
///
/// `Conflict` is resolved inside the room directory and normally never
/// reaches a caller; the remaining variants map onto HTTP statuses in
/// [`IntoResponse`] and onto error frames on the room socket.
#[derive(Debug, Error)]
pub enum Error {
    /// The authorization policy denied the action.
    #[error("forbidden")]
    Forbidden,
    /// A booking, room, message or identity is absent.
    #[error("{0}_not_found")]
    NotFound(&'static str),
    /// A uniqueness constraint fired (lost creation race, duplicate review).
    #[error("conflict")]
    Conflict,
    /// Malformed input: empty body, inverted date range, unknown status.
    #[error("{0}")]
    Validation(String),
    /// Store failure. Retryable by the caller; never silently dropped.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    /// No connection available from the pool. Same retryable class as `Store`.
    #[error("store unavailable: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Stable machine-readable code, used for HTTP bodies and socket frames.
    pub fn code(&self) -> String {
        match self {
            Error::Store(_) | Error::Pool(_) => "store_error".into(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Store(e) => {
                tracing::error!(error = %e, "store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Pool(e) => {
                tracing::error!(error = %e, "connection pool exhausted");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResp { error: self.code() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Forbidden.code(), "forbidden");
        assert_eq!(Error::NotFound("room").code(), "room_not_found");
        assert_eq!(Error::validation("empty_message").code(), "empty_message");
        assert_eq!(
            Error::Store(rusqlite::Error::InvalidQuery).code(),
            "store_error"
        );
    }
}
