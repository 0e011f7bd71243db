// src/domain/session.rs

//! Broker session abstractions.
//!
//! These traits are the seam between the relay core (session supply,
//! publisher, consumer) and a concrete broker client. They intentionally say
//! nothing about exchanges, channel numbers or client-library types.
//!
//! The contract is shaped around single-use sessions:
//!
//! - A [`Connector`] dials the broker and yields a [`BrokerConnection`].
//! - A connection mints any number of [`Session`]s, each bound to one queue.
//! - A session is valid until its first observed failure. After that the
//!   owner closes it and asks the supply for a new one; sessions are never
//!   repaired in place and never shared between loops.
//!
//! Concrete implementations live under `src/transport/`. The in-memory broker
//! is the reference implementation of these semantics.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// Broker verdict on one published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the message.
    Ack,

    /// The broker refused the message.
    Nack,

    /// The session is not in confirm mode, so no verdict exists.
    NotRequested,
}

/// Boxed future resolving to the confirmation of one publish.
///
/// Resolves to `Err` when the session dies before the broker answered; the
/// publisher treats that as "outcome unknown" and retries elsewhere.
pub type ConfirmFuture = Pin<Box<dyn Future<Output = Result<Confirmation>> + Send + 'static>>;

/// Acknowledgment capability carried by a [`Delivery`].
#[async_trait::async_trait]
pub trait Acknowledge: Send + Sync {
    // ---
    /// Tell the broker this delivery has been taken care of.
    async fn ack(&self) -> Result<()>;
}

/// A message handed to a consumer by the broker.
///
/// Dropping a delivery without acknowledging it leaves it unacknowledged on
/// the broker, which redelivers it once the session goes away.
pub struct Delivery {
    // ---
    /// Opaque payload bytes.
    pub body: Bytes,

    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(body: Bytes, acker: Box<dyn Acknowledge>) -> Self {
        Self { body, acker }
    }

    /// Acknowledge the delivery, consuming it.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Split into the payload and the acknowledgment capability.
    pub fn into_parts(self) -> (Bytes, Box<dyn Acknowledge>) {
        (self.body, self.acker)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Handle returned from [`Session::consume`].
///
/// The inbox closes when the session dies or is closed.
pub struct ConsumeHandle {
    // ---
    /// Deliveries in broker order.
    pub inbox: mpsc::Receiver<Delivery>,
}

/// One logical channel onto the broker, bound to a single queue.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Session: Send {
    // ---
    /// Identifier used in log lines.
    fn session_id(&self) -> &str;

    /// Name of the queue this session is bound to.
    fn queue_name(&self) -> &str;

    /// Put the session into confirm mode.
    ///
    /// Returns [`RelayError::ConfirmsUnsupported`](crate::RelayError::ConfirmsUnsupported)
    /// when the broker cannot do so; the session stays usable without
    /// confirms.
    async fn enable_confirms(&mut self) -> Result<()>;

    /// Publish `body` to the bound queue via the default exchange.
    ///
    /// `Ok` means the write reached the session; the returned future yields
    /// the broker's verdict. `Err` means the session is no longer usable.
    async fn publish(&mut self, body: Bytes) -> Result<ConfirmFuture>;

    /// Start consuming the bound queue.
    async fn consume(&mut self) -> Result<ConsumeHandle>;

    /// Close the session. Safe to call on an already-dead session.
    async fn close(&mut self);
}

/// Owned session trait object.
pub type SessionBox = Box<dyn Session>;

/// A live connection to the broker that can mint sessions.
#[async_trait::async_trait]
pub trait BrokerConnection: Send {
    // ---
    /// Open a session bound to `queue`, declaring the queue if needed.
    async fn open_session(&mut self, queue: &str) -> Result<SessionBox>;

    /// Whether the underlying connection still looks alive.
    fn is_connected(&self) -> bool;

    /// Close the connection and every session minted from it.
    async fn close(&mut self);
}

/// Owned connection trait object.
pub type ConnectionBox = Box<dyn BrokerConnection>;

/// Dials a broker.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    // ---
    /// Broker address safe to print (credentials masked).
    fn broker_label(&self) -> &str;

    /// Establish a new connection.
    async fn connect(&self) -> Result<ConnectionBox>;
}

/// Shared connector pointer.
pub type ConnectorPtr = Arc<dyn Connector>;
