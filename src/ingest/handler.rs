use axum::{
    body::{to_bytes, Body},
    extract::State,
};

use super::event::{format_membership_event, format_preference_event, parse_base, BaseEvent};
use super::{AppState, FormattedEvent, IngestError};
use crate::{log_debug, Message};

/// Largest accepted (decompressed) request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

type Formatter = fn(&BaseEvent) -> Result<Vec<FormattedEvent>, IngestError>;

pub(crate) async fn health() -> &'static str {
    "OK"
}

pub(crate) async fn user_preferences(
    State(state): State<AppState>,
    body: Body,
) -> Result<&'static str, IngestError> {
    ingest(&state, body, format_preference_event).await
}

pub(crate) async fn membership(
    State(state): State<AppState>,
    body: Body,
) -> Result<&'static str, IngestError> {
    ingest(&state, body, format_membership_event).await
}

/// Read, normalize and publish one webhook call.
///
/// Answers only after every resulting event has an outcome; a single
/// unconfirmed event fails the whole request so the producer retries it.
async fn ingest(state: &AppState, body: Body, format: Formatter) -> Result<&'static str, IngestError> {
    // ---
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| IngestError::UnreadableBody(e.to_string()))?;

    let base = parse_base(&bytes)?;
    let events = format(&base)?;

    if events.is_empty() {
        log_debug!("ignoring {} message {}", base.message_type, base.message_id);
    }

    for event in events {
        let payload = serde_json::to_vec(&event)
            .map_err(|e| IngestError::MalformedBody(format!("cannot serialize event: {e}")))?;
        let (message, outcome) = Message::new(payload);

        state
            .publisher()
            .send(message)
            .await
            .map_err(|_| IngestError::PublisherUnavailable)?;

        if !outcome.wait().await {
            return Err(IngestError::PublishFailed);
        }
    }

    Ok("OK")
}
