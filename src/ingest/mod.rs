//! HTTP ingest boundary.
//!
//! Webhook producers POST events here. Each accepted event is normalized,
//! handed to the [`Publisher`](crate::Publisher) and the request is only
//! answered once the broker has confirmed (or refused) it.

mod auth;
mod error;
mod event;
mod handler;
mod server;

pub use error::IngestError;
pub use event::FormattedEvent;
pub use server::{create_router, start_server, AppState};
