use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::log_warn;

/// Why an ingest request was refused.
#[derive(Debug)]
pub enum IngestError {
    /// `X-API-KEY` missing or wrong.
    Unauthorized,

    /// The body is not a usable event.
    MalformedBody(String),

    /// The body could not be read or decompressed.
    UnreadableBody(String),

    /// The broker did not confirm the event.
    PublishFailed,

    /// No publisher is running to take the event.
    PublisherUnavailable,
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        // ---
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MalformedBody(_) | Self::UnreadableBody(_) => StatusCode::BAD_REQUEST,
            Self::PublishFailed | Self::PublisherUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::MalformedBody(reason) => write!(f, "malformed body: {reason}"),
            Self::UnreadableBody(reason) => write!(f, "unreadable body: {reason}"),
            Self::PublishFailed => write!(f, "broker did not confirm the event"),
            Self::PublisherUnavailable => write!(f, "publisher is not running"),
        }
    }
}

impl std::error::Error for IngestError {}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // ---
        log_warn!("ingest request refused: {self}");

        let status = self.status();
        let message = match self {
            Self::Unauthorized => "Unauthorized",
            Self::MalformedBody(_) | Self::UnreadableBody(_) => "Bad Request",
            Self::PublishFailed | Self::PublisherUnavailable => "Service Unavailable",
        };

        (status, message).into_response()
    }
}
