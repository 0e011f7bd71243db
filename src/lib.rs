//! Resilient webhook relay over an AMQP broker
//!
//! Webhook events arrive over HTTP, are normalized and published to a
//! durable queue, then consumed and forwarded to downstream sinks. The core
//! is a small session layer that keeps working across broker restarts:
//!
//! - [`SessionSupply`] keeps a broker connection alive and hands out
//!   single-use sessions, redialing with backoff for as long as it takes.
//! - [`Publisher`] publishes one message at a time in confirm mode and
//!   reports each message's fate exactly once through its [`Outcome`].
//! - [`Consumer`] acknowledges a delivery only after the sink channel has
//!   taken it, so sink backpressure reaches the broker.
//!
//! Brokers plug in behind the [`Connector`] trait. [`MemoryBroker`] is the
//! in-process reference; `LapinConnector` (feature `transport_lapin`) talks
//! AMQP 0-9-1.

mod macros;

mod domain;
mod queue;
mod transport;

mod ingest;
mod relay_config;
mod retry;
mod sink;

mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use queue::{Consumer, Publisher, SessionSupply};

pub use relay_config::{Environment, RelayConfig, ENV_PREFIX};
pub use retry::{Backoff, BackoffConfig};

pub use error::{RelayError, Result};

pub use transport::MemoryBroker;

#[cfg(feature = "transport_lapin")]
pub use transport::LapinConnector;

pub use ingest::{create_router, start_server, AppState, FormattedEvent, IngestError};
pub use sink::{dispatch, sinks_for, Sink, WriterSink};

// --- public re-exports
pub use domain::{
    //
    Acknowledge,
    BrokerConnection,
    Completion,
    ConfirmFuture,
    Confirmation,
    ConnectionBox,
    Connector,
    ConnectorPtr,
    ConsumeHandle,
    Delivery,
    Message,
    Outcome,
    Session,
    SessionBox,
};
