//! Domain layer public interface.
//!
//! Broker-independent abstractions: the message envelope and the session
//! traits that concrete transports implement.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod message;
mod session;

pub use message::{
    //
    Completion,
    Message,
    Outcome,
};

pub use session::{
    //
    Acknowledge,
    BrokerConnection,
    ConfirmFuture,
    Confirmation,
    ConnectionBox,
    Connector,
    ConnectorPtr,
    ConsumeHandle,
    Delivery,
    Session,
    SessionBox,
};
