// src/transport/memory/broker.rs

//! In-memory broker.
//!
//! Concrete implementation of the session traits using in-process data
//! structures only. Queues are durable for the broker's lifetime, deliveries
//! are tracked until acknowledged, and unacknowledged deliveries go back to
//! the head of their queue when the session that held them goes away.
//!
//! Liveness is a tree of cancellation tokens:
//!
//! ```text
//! broker epoch ──► connection ──► session
//! ```
//!
//! [`MemoryBroker::sever`] cancels the epoch, which kills every connection
//! and session minted so far, exactly like a broker restart would.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    Acknowledge,
    BrokerConnection,
    ConfirmFuture,
    Confirmation,
    ConnectionBox,
    Connector,
    ConnectorPtr,
    ConsumeHandle,
    Delivery,
    RelayError,
    Result,
    Session,
    SessionBox,
};

type Unacked = Arc<Mutex<BTreeMap<u64, Bytes>>>;

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Bytes>,
    accepted: Vec<Bytes>,
    acked: u64,
}

struct BrokerState {
    // fault injection
    reachable: bool,
    refuse_dials: u32,
    fail_publishes: u32,
    nack_publishes: u32,
    fail_acks: u32,
    confirms_supported: bool,
    hold_confirms: bool,

    // observation
    dial_attempts: u64,

    epoch: CancellationToken,
    queues: HashMap<String, QueueState>,
}

impl Default for BrokerState {
    fn default() -> Self {
        // ---
        Self {
            reachable: true,
            refuse_dials: 0,
            fail_publishes: 0,
            nack_publishes: 0,
            fail_acks: 0,
            confirms_supported: true,
            hold_confirms: false,
            dial_attempts: 0,
            epoch: CancellationToken::new(),
            queues: HashMap::new(),
        }
    }
}

struct Shared {
    label: String,
    state: Mutex<BrokerState>,
    ready: Notify,
    next_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        lock_ignore_poison(&self.state)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// In-memory broker.
///
/// Cheap to clone; clones share the same queues. Implements [`Connector`]
/// so it can be handed straight to a
/// [`SessionSupply`](crate::queue::SessionSupply).
///
/// ## Fault injection
///
/// - [`set_reachable`](Self::set_reachable) / [`refuse_dials`](Self::refuse_dials): dial failures
/// - [`fail_publishes`](Self::fail_publishes): publish errors (the session dies)
/// - [`nack_publishes`](Self::nack_publishes): broker nacks
/// - [`fail_acks`](Self::fail_acks): ack errors (the session dies)
/// - [`set_confirms_supported`](Self::set_confirms_supported): no confirm mode
/// - [`hold_confirms`](Self::hold_confirms): confirms never arrive
/// - [`sever`](Self::sever): drop every connection and session
///
/// ## Non-Goals
///
/// - Exchanges, bindings, routing beyond "routing key = queue name"
/// - Exact emulation of AMQP prefetch or redelivery flags
#[derive(Clone)]
pub struct MemoryBroker {
    // ---
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Create an empty broker. `label` shows up in log lines.
    pub fn new(label: impl Into<String>) -> Self {
        // ---
        Self {
            shared: Arc::new(Shared {
                label: format!("memory://{}", label.into()),
                state: Mutex::new(BrokerState::default()),
                ready: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// This broker as a shared [`Connector`].
    pub fn connector(&self) -> ConnectorPtr {
        Arc::new(self.clone())
    }

    /// While unreachable every dial fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state().reachable = reachable;
    }

    /// Fail the next `n` dials.
    pub fn refuse_dials(&self, n: u32) {
        self.shared.state().refuse_dials = n;
    }

    /// Fail the next `n` publishes; each failure kills its session.
    pub fn fail_publishes(&self, n: u32) {
        self.shared.state().fail_publishes = n;
    }

    /// Nack the next `n` publishes made in confirm mode.
    pub fn nack_publishes(&self, n: u32) {
        self.shared.state().nack_publishes = n;
    }

    /// Fail the next `n` acks; each failure kills its session, so the
    /// delivery goes back to the queue.
    pub fn fail_acks(&self, n: u32) {
        self.shared.state().fail_acks = n;
    }

    /// Whether sessions may enter confirm mode.
    pub fn set_confirms_supported(&self, supported: bool) {
        self.shared.state().confirms_supported = supported;
    }

    /// While held, confirms for new publishes never arrive; they fail only
    /// when their session dies.
    pub fn hold_confirms(&self, hold: bool) {
        self.shared.state().hold_confirms = hold;
    }

    /// Drop every live connection and session.
    pub fn sever(&self) {
        // ---
        let old = {
            let mut state = self.shared.state();
            std::mem::replace(&mut state.epoch, CancellationToken::new())
        };
        old.cancel();
    }

    /// Put a message on `queue` without going through a session.
    pub fn inject(&self, queue: &str, body: impl Into<Bytes>) {
        // ---
        {
            let mut state = self.shared.state();
            let q = state.queues.entry(queue.to_string()).or_default();
            let body = body.into();
            q.accepted.push(body.clone());
            q.ready.push_back(body);
        }
        self.shared.ready.notify_waiters();
    }

    /// Every body the broker has taken onto `queue`, in arrival order.
    pub fn accepted(&self, queue: &str) -> Vec<Bytes> {
        // ---
        self.shared
            .state()
            .queues
            .get(queue)
            .map(|q| q.accepted.clone())
            .unwrap_or_default()
    }

    /// Number of deliveries from `queue` acknowledged by consumers.
    pub fn acked(&self, queue: &str) -> u64 {
        self.shared.state().queues.get(queue).map_or(0, |q| q.acked)
    }

    /// Messages waiting on `queue` (not delivered, or delivered and requeued).
    pub fn ready_len(&self, queue: &str) -> usize {
        self.shared.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Total dial attempts, successful or not.
    pub fn dial_attempts(&self) -> u64 {
        self.shared.state().dial_attempts
    }
}

#[async_trait::async_trait]
impl Connector for MemoryBroker {
    // ---
    fn broker_label(&self) -> &str {
        &self.shared.label
    }

    async fn connect(&self) -> Result<ConnectionBox> {
        // ---
        let mut state = self.shared.state();
        state.dial_attempts += 1;

        if !state.reachable {
            return Err(RelayError::Connect(format!("{} unreachable", self.shared.label)));
        }
        if state.refuse_dials > 0 {
            state.refuse_dials -= 1;
            return Err(RelayError::Connect(format!("{} refused dial", self.shared.label)));
        }

        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            alive: state.epoch.child_token(),
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    alive: CancellationToken,
}

#[async_trait::async_trait]
impl BrokerConnection for MemoryConnection {
    // ---
    async fn open_session(&mut self, queue: &str) -> Result<SessionBox> {
        // ---
        if self.alive.is_cancelled() {
            return Err(RelayError::Session("connection closed".into()));
        }

        self.shared
            .state()
            .queues
            .entry(queue.to_string())
            .or_default();

        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
            session_id: format!("mem-{}", self.shared.next_id()),
            queue: queue.to_string(),
            alive: self.alive.child_token(),
            confirms: false,
            pump: None,
        }))
    }

    fn is_connected(&self) -> bool {
        !self.alive.is_cancelled()
    }

    async fn close(&mut self) {
        self.alive.cancel();
    }
}

/// What the broker decided about one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Fail,
    Settled(Confirmation),
    Held,
}

struct MemorySession {
    shared: Arc<Shared>,
    session_id: String,
    queue: String,
    alive: CancellationToken,
    confirms: bool,
    pump: Option<JoinHandle<()>>,
}

impl MemorySession {
    fn enqueue(&self, body: Bytes) -> Verdict {
        // ---
        let mut state = self.shared.state();

        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Verdict::Fail;
        }
        if self.confirms && state.nack_publishes > 0 {
            state.nack_publishes -= 1;
            return Verdict::Settled(Confirmation::Nack);
        }

        let hold = state.hold_confirms;
        let q = state.queues.entry(self.queue.clone()).or_default();
        q.accepted.push(body.clone());
        q.ready.push_back(body);

        match (self.confirms, hold) {
            (false, _) => Verdict::Settled(Confirmation::NotRequested),
            (true, true) => Verdict::Held,
            (true, false) => Verdict::Settled(Confirmation::Ack),
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.alive.cancel();
    }
}

#[async_trait::async_trait]
impl Session for MemorySession {
    // ---
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn enable_confirms(&mut self) -> Result<()> {
        // ---
        if self.alive.is_cancelled() {
            return Err(RelayError::SessionClosed);
        }
        if !self.shared.state().confirms_supported {
            return Err(RelayError::ConfirmsUnsupported(format!(
                "{} has confirms disabled",
                self.shared.label
            )));
        }
        self.confirms = true;
        Ok(())
    }

    async fn publish(&mut self, body: Bytes) -> Result<ConfirmFuture> {
        // ---
        if self.alive.is_cancelled() {
            return Err(RelayError::SessionClosed);
        }

        let verdict = self.enqueue(body);
        if verdict == Verdict::Fail {
            self.alive.cancel();
            return Err(RelayError::Publish(format!(
                "{}: injected publish failure",
                self.session_id
            )));
        }
        self.shared.ready.notify_waiters();

        let alive = self.alive.clone();
        Ok(Box::pin(async move {
            match verdict {
                Verdict::Settled(confirmation) => Ok(confirmation),
                _ => {
                    alive.cancelled().await;
                    Err(RelayError::SessionClosed)
                }
            }
        }))
    }

    async fn consume(&mut self) -> Result<ConsumeHandle> {
        // ---
        if self.alive.is_cancelled() {
            return Err(RelayError::SessionClosed);
        }
        if self.pump.is_some() {
            return Err(RelayError::Consume("session is already consuming".into()));
        }

        // Capacity one: a single unacknowledged delivery in the inbox, the
        // in-memory take on a prefetch of one.
        let (tx, rx) = mpsc::channel(1);

        let pump = Pump {
            shared: Arc::clone(&self.shared),
            queue: self.queue.clone(),
            alive: self.alive.clone(),
            unacked: Arc::new(Mutex::new(BTreeMap::new())),
            tx,
        };
        self.pump = Some(tokio::spawn(pump.run()));

        Ok(ConsumeHandle { inbox: rx })
    }

    async fn close(&mut self) {
        // ---
        self.alive.cancel();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

/// Moves ready messages from the queue into one consumer's inbox.
///
/// At most one delivery is outstanding at a time; the next one is taken only
/// after the previous was acknowledged.
struct Pump {
    shared: Arc<Shared>,
    queue: String,
    alive: CancellationToken,
    unacked: Unacked,
    tx: mpsc::Sender<Delivery>,
}

impl Pump {
    async fn run(self) {
        // ---
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.take_next() {
                let sent = tokio::select! {
                    biased;
                    () = self.alive.cancelled() => break,
                    sent = self.tx.send(delivery) => sent,
                };
                if sent.is_err() {
                    break;
                }
                continue;
            }

            tokio::select! {
                biased;
                () = self.alive.cancelled() => break,
                () = &mut notified => {}
            }
        }

        self.requeue();
    }

    fn take_next(&self) -> Option<Delivery> {
        // ---
        let mut unacked = lock_ignore_poison(&self.unacked);
        if !unacked.is_empty() || self.alive.is_cancelled() {
            return None;
        }

        let body = self
            .shared
            .state()
            .queues
            .get_mut(&self.queue)?
            .ready
            .pop_front()?;

        let tag = self.shared.next_id();
        unacked.insert(tag, body.clone());

        let acker = MemoryAcker {
            shared: Arc::clone(&self.shared),
            queue: self.queue.clone(),
            alive: self.alive.clone(),
            unacked: Arc::clone(&self.unacked),
            tag,
        };
        Some(Delivery::new(body, Box::new(acker)))
    }

    /// Put everything still unacknowledged back at the head of the queue.
    fn requeue(&self) {
        // ---
        let mut unacked = lock_ignore_poison(&self.unacked);
        if unacked.is_empty() {
            return;
        }

        {
            let mut state = self.shared.state();
            let q = state.queues.entry(self.queue.clone()).or_default();
            while let Some((_, body)) = unacked.pop_last() {
                q.ready.push_front(body);
            }
        }
        self.shared.ready.notify_waiters();
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    alive: CancellationToken,
    unacked: Unacked,
    tag: u64,
}

#[async_trait::async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        // ---
        {
            let mut unacked = lock_ignore_poison(&self.unacked);
            if self.alive.is_cancelled() || !unacked.contains_key(&self.tag) {
                return Err(RelayError::Ack(format!(
                    "delivery {} no longer held by a live session",
                    self.tag
                )));
            }

            let mut state = self.shared.state();
            if state.fail_acks > 0 {
                state.fail_acks -= 1;
                drop(state);
                drop(unacked);

                // pump requeues the delivery on its way out
                self.alive.cancel();
                return Err(RelayError::Ack(format!(
                    "injected failure acking delivery {}",
                    self.tag
                )));
            }

            unacked.remove(&self.tag);
            state.queues.entry(self.queue.clone()).or_default().acked += 1;
        }

        self.shared.ready.notify_waiters();
        Ok(())
    }
}
