use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::repository::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("URL provided was malformed")]
    MalformedURL,
    #[error("DNS lookup failed for {host}")]
    DnsLookup { host: String },
    #[error("{0}")]
    Validation(String),
    #[error("no short URL matches {0}")]
    UnknownShortURL(String),
    #[error("page not found")]
    PageNotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("could not mint an unused short URL")]
    CollidedURL,
    #[error(transparent)]
    Database(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::MalformedURL => (StatusCode::BAD_REQUEST, "Invalid URL".to_owned()),
            Self::DnsLookup { host } => {
                tracing::debug!(host = %host, "dns lookup failed");
                (StatusCode::BAD_REQUEST, "DNS lookup failed".to_owned())
            }
            Self::Validation(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            Self::UnknownShortURL(_) => (StatusCode::NOT_FOUND, "Invalid URL".to_owned()),
            Self::PageNotFound => (StatusCode::NOT_FOUND, "Page not found".to_owned()),
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed".to_owned(),
            ),
            Self::Database(err) => {
                tracing::error!(err = ?err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_owned())
            }
            Self::CollidedURL => {
                tracing::error!("short url minting kept colliding");
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_owned())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
