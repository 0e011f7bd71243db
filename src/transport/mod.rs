//! Broker implementations.
//!
//! Concrete implementations of the domain-level session traits. Real
//! brokers are hidden behind feature flags and exposed only through their
//! connector types.
//!
//! Core code must not depend on client-library types.

mod memory;

#[cfg(feature = "transport_lapin")]
mod amqp;

pub use memory::MemoryBroker;

#[cfg(feature = "transport_lapin")]
pub use amqp::LapinConnector;
