use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::{AppState, IngestError};

/// Header carrying the shared secret.
pub(crate) const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `X-API-KEY` does not match the configured key.
pub(crate) async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, IngestError> {
    // ---
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if presented != Some(state.api_key()) {
        return Err(IngestError::Unauthorized);
    }

    Ok(next.run(req).await)
}
