use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::AUTHORIZATION;
use actix_web::middleware::Next;
use actix_web::{Error, web};
use log::{debug, error, warn};

use crate::AppState;

/// Stores the `Authorization` header of every request as the outbound mail token.
///
/// Runs for all routes, so the most recent caller's token becomes the one the
/// Zoho routes use.
pub async fn capture_token(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    debug!("{} {}", req.method(), req.uri());
    debug!("Request headers: {:?}", req.headers());

    if let Some(value) = req.headers().get(AUTHORIZATION) {
        let token = String::from_utf8_lossy(value.as_bytes());
        match req.app_data::<web::Data<AppState>>() {
            Some(state) => {
                if let Err(e) = state.cache.capture_token(&token).await {
                    error!("Failed to store authorization token: {}", e);
                }
            }
            None => warn!("No application state, authorization token not stored"),
        }
    }

    next.call(req).await
}
