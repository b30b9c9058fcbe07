use crate::AppState;
use crate::api::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Guards the operator endpoints with a shared key. Without a configured
/// key the endpoints stay open.
pub async fn admin_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match provided {
        Some(key) if key == expected => Ok(next.run(req).await),
        _ => {
            tracing::warn!("Rejected admin request to {}", req.uri().path());
            Err(AppError::Unauthorized("Invalid admin key".to_string()))
        }
    }
}
