use salvo::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Credential vault error: {0}")]
    Crypto(String),

    #[error("Parse error: {0}")]
    ParseError(#[from] salvo::http::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("SQL error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("HTTP status error: {0}")]
    StatusError(#[from] salvo::http::StatusError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ParseError(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StatusError(status_error) => status_error.code,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the `error` field of the payload.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) | AppError::ParseError(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Crypto(_) => "credential_error",
            AppError::StatusError(_) => "http_error",
            _ => "internal_error",
        }
    }
}

#[async_trait]
impl Writer for AppError {
    async fn write(mut self, _req: &mut Request, _depot: &mut Depot, res: &mut Response) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self);
        }
        res.status_code(status);
        res.render(Json(serde_json::json!({
            "error": self.code(),
            "message": self.to_string()
        })));
    }
}
