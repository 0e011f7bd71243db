// src/transport/memory/mod.rs

//! In-memory broker implementation.
//!
//! A pure in-process implementation of the session traits. It is intended
//! for tests and local runs, and it is the reference for session semantics.
//!
//! ## Reference Semantics
//!
//! Other broker implementations are expected to approximate this behavior
//! as closely as their client libraries allow:
//!
//! - A published message is either accepted onto its queue or the publish
//!   call fails; there is no silent drop.
//! - A consumer holds at most one unacknowledged delivery.
//! - Unacknowledged deliveries are requeued at the head of the queue when
//!   their session ends.
//! - Once a session dies, every call on it fails and its confirms resolve
//!   to errors.
//!
//! ## Non-Goals
//!
//! This broker does not attempt to emulate persistence across process
//! restarts or the exact redelivery flags of any real broker.

mod broker;

pub use broker::MemoryBroker;
