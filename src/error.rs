use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::config_cache::CacheError;
use crate::mail::MailError;
use crate::store::StoreError;

/// Failure to mirror the latest company config into the cache file.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Route-level failures and the JSON body each one answers with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A provider call failed. Only `message` reaches the client.
    #[error("{message}")]
    Upstream {
        message: &'static str,
        #[source]
        source: MailError,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn upstream(message: &'static str, source: MailError) -> Self {
        error!("{}: {}", message, source);
        Self::Upstream { message, source }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Store(StoreError::Invalid(_)) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Validation(_)
            | ApiError::Unauthorized(_)
            | ApiError::NotFound(_)
            | ApiError::Store(StoreError::Invalid(_)) => json!({ "message": self.to_string() }),
            ApiError::Store(e) => {
                error!("store failure: {}", e);
                json!({ "error": self.to_string() })
            }
            ApiError::Upstream { message, .. } => json!({ "error": message }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use serde_json::Value;

    async fn body_of(err: ApiError) -> (StatusCode, Value) {
        let res = err.error_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn client_errors_use_message_key() {
        let (status, body) = body_of(ApiError::not_found("Product not found")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"message": "Product not found"}));

        let (status, body) = body_of(ApiError::Store(StoreError::Invalid("missing field `name`".into()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"message": "missing field `name`"}));
    }

    #[actix_web::test]
    async fn server_errors_use_error_key() {
        let (status, body) = body_of(ApiError::Store(StoreError::Unavailable("down".into()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "database unavailable: down"}));

        let upstream = ApiError::upstream(
            "Failed to send email",
            MailError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: "secret provider detail".into(),
            },
        );
        let (status, body) = body_of(upstream).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Failed to send email"}));
    }
}
