// tests/common/mod.rs

#![allow(dead_code)]

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hookrelay::{
    // ---
    Acknowledge,
    BackoffConfig,
    BrokerConnection,
    Confirmation,
    ConfirmFuture,
    ConnectionBox,
    Connector,
    ConnectorPtr,
    ConsumeHandle,
    Consumer,
    Delivery,
    MemoryBroker,
    Message,
    Publisher,
    Session,
    SessionBox,
    SessionSupply,
};

pub const QUEUE: &str = "ip-events";

/// Upper bound for anything a test waits on.
pub const WINDOW: Duration = Duration::from_secs(2);

pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_delay: Duration::from_millis(20),
    }
}

/// Session supply plus publisher over a memory broker.
pub struct PublishRig {
    pub broker: MemoryBroker,
    pub token: CancellationToken,
    pub inbound: mpsc::Sender<Message>,
    pub supply_task: JoinHandle<()>,
    pub publisher_task: JoinHandle<()>,
}

impl PublishRig {
    pub fn start(broker: &MemoryBroker) -> Self {
        // ---
        let token = CancellationToken::new();
        let (supply, supply_task) =
            SessionSupply::spawn(token.clone(), broker.connector(), QUEUE, fast_backoff());

        let (inbound, rx) = mpsc::channel(8);
        let publisher_task = Publisher::new(supply, rx, QUEUE, token.clone()).spawn();

        Self {
            broker: broker.clone(),
            token,
            inbound,
            supply_task,
            publisher_task,
        }
    }

    /// Submit `body` and wait for its outcome.
    pub async fn publish(&self, body: &'static str) -> bool {
        // ---
        let (message, outcome) = Message::new(body);
        self.inbound.send(message).await.expect("publisher gone");
        tokio::time::timeout(WINDOW, outcome.wait())
            .await
            .expect("outcome not resolved in time")
    }
}

/// Session supply plus consumer over a memory broker.
pub struct ConsumeRig {
    pub token: CancellationToken,
    pub sink: mpsc::Receiver<Bytes>,
    pub sink_tx: mpsc::Sender<Bytes>,
    pub supply_task: JoinHandle<()>,
    pub consumer_task: JoinHandle<()>,
}

impl ConsumeRig {
    /// `sink_capacity` is the room downstream before the consumer blocks.
    pub fn start(broker: &MemoryBroker, sink_capacity: usize) -> Self {
        // ---
        let token = CancellationToken::new();
        let (supply, supply_task) =
            SessionSupply::spawn(token.clone(), broker.connector(), QUEUE, fast_backoff());

        let (sink_tx, sink) = mpsc::channel(sink_capacity);
        let consumer_task = Consumer::new(supply, sink_tx.clone(), QUEUE, token.clone()).spawn();

        Self {
            token,
            sink,
            sink_tx,
            supply_task,
            consumer_task,
        }
    }

    pub async fn next_payload(&mut self) -> Bytes {
        tokio::time::timeout(WINDOW, self.sink.recv())
            .await
            .expect("no payload in time")
            .expect("sink channel closed")
    }
}

/// Poll `check` until it holds or the window runs out.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    // ---
    let deadline = tokio::time::Instant::now() + WINDOW;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn joins_in_time(what: &str, handle: JoinHandle<()>) {
    tokio::time::timeout(WINDOW, handle)
        .await
        .unwrap_or_else(|_| panic!("{what} did not stop in time"))
        .unwrap_or_else(|e| panic!("{what} panicked: {e}"));
}

// ---
// Stalled broker: a connector whose sessions hang forever at one call,
// like a broker that has stopped reading under a resource alarm.
// ---

/// Session call that never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    Confirms,
    Publish,
    Consume,
    Ack,
}

pub struct StalledBroker {
    label: String,
    stall: Stall,
}

impl StalledBroker {
    pub fn connector(stall: Stall) -> ConnectorPtr {
        Arc::new(Self {
            label: format!("stalled://{stall:?}"),
            stall,
        })
    }
}

#[async_trait::async_trait]
impl Connector for StalledBroker {
    fn broker_label(&self) -> &str {
        &self.label
    }

    async fn connect(&self) -> hookrelay::Result<ConnectionBox> {
        Ok(Box::new(StalledConnection { stall: self.stall }))
    }
}

struct StalledConnection {
    stall: Stall,
}

#[async_trait::async_trait]
impl BrokerConnection for StalledConnection {
    async fn open_session(&mut self, queue: &str) -> hookrelay::Result<SessionBox> {
        Ok(Box::new(StalledSession {
            stall: self.stall,
            queue: queue.to_string(),
            feed: None,
        }))
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&mut self) {}
}

struct StalledSession {
    stall: Stall,
    queue: String,

    // keeps the inbox open while the session lives
    feed: Option<mpsc::Sender<Delivery>>,
}

#[async_trait::async_trait]
impl Session for StalledSession {
    fn session_id(&self) -> &str {
        "stalled"
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn enable_confirms(&mut self) -> hookrelay::Result<()> {
        if self.stall == Stall::Confirms {
            return pending().await;
        }
        Ok(())
    }

    async fn publish(&mut self, _body: Bytes) -> hookrelay::Result<ConfirmFuture> {
        if self.stall == Stall::Publish {
            return pending().await;
        }
        Ok(Box::pin(async { Ok(Confirmation::Ack) }))
    }

    async fn consume(&mut self) -> hookrelay::Result<ConsumeHandle> {
        if self.stall == Stall::Consume {
            return pending().await;
        }

        let (tx, inbox) = mpsc::channel(1);
        let delivery = Delivery::new(Bytes::from_static(b"stalled"), Box::new(StalledAcker));
        let _ = tx.send(delivery).await;
        self.feed = Some(tx);
        Ok(ConsumeHandle { inbox })
    }

    async fn close(&mut self) {
        self.feed = None;
    }
}

struct StalledAcker;

#[async_trait::async_trait]
impl Acknowledge for StalledAcker {
    async fn ack(&self) -> hookrelay::Result<()> {
        pending().await
    }
}
