use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::JsonResponse;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    NotAuthorized(&'static str),
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("Internal Server Error")]
    ServerError,
    #[error("Internal Server Error")]
    DatabaseError(#[from] sqlx::Error),
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct RequestErrorJson {
    pub error: String,
}

impl RequestErrorJson {
    pub fn new(error: &str) -> RequestErrorJson {
        RequestErrorJson {
            error: error.to_string(),
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> axum::response::Response {
        self.to_json_response().into_response()
    }
}

impl From<RequestError> for JsonResponse<RequestErrorJson> {
    fn from(error: RequestError) -> Self {
        error.to_json_response()
    }
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
            RequestError::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
            RequestError::Forbidden => StatusCode::FORBIDDEN,
            RequestError::Conflict(_) => StatusCode::CONFLICT,
            RequestError::ServerError | RequestError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn to_json_response(&self) -> JsonResponse<RequestErrorJson> {
        if let RequestError::DatabaseError(e) = self {
            tracing::error!("Database error: {}", e);
        }
        (self.status_code(), Json(RequestErrorJson::new(&self.to_string())))
    }

    /// Maps a unique-constraint violation to `Conflict`, leaving every other
    /// error untouched.
    pub fn on_unique_violation(self, message: &'static str) -> Self {
        if let RequestError::DatabaseError(sqlx::Error::Database(e)) = &self {
            if e.message().contains("UNIQUE constraint failed") {
                return RequestError::Conflict(message);
            }
        }
        self
    }

    /// Maps a foreign key violation, raised when the referenced row vanished
    /// between a check and the write, to `NotFound`.
    pub fn on_foreign_key_violation(self, message: &'static str) -> Self {
        if let RequestError::DatabaseError(sqlx::Error::Database(e)) = &self {
            if e.message().contains("FOREIGN KEY constraint failed") {
                return RequestError::NotFound(message);
            }
        }
        self
    }
}

pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(e) if e.message().contains("UNIQUE constraint failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_do_not_leak_details() {
        let error = RequestError::DatabaseError(sqlx::Error::RowNotFound);
        let (status, Json(body)) = error.to_json_response();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Internal Server Error");
    }

    #[test]
    fn other_errors_keep_their_message() {
        let (status, Json(body)) = RequestError::Conflict("Slug already taken").to_json_response();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error, "Slug already taken");

        let error = RequestError::ServerError.on_unique_violation("ignored");
        assert!(matches!(error, RequestError::ServerError));
    }
}
