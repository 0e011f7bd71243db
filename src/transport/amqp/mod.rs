//! AMQP broker implementations.
//!
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)

mod lapin;

pub use lapin::LapinConnector;
