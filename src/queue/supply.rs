//! Session supply (redialer).
//!
//! A single background **actor task** owns the broker connection. Readers
//! never touch the connection: each call to [`SessionSupply::next`] sends a
//! request to the actor and waits for a freshly minted session that belongs
//! to that reader alone.
//!
//! ## Connection behavior
//!
//! - Dialing is lazy; nothing happens until the first reader asks.
//! - A connection is reused for as long as it can mint sessions.
//! - Dial or mint failures are logged, the connection is dropped, and the
//!   actor waits out a jittered exponential backoff before trying again.
//!   This repeats forever; connectivity errors are never handed to readers.
//! - The backoff resets after every successful mint.
//!
//! ## Shutdown
//!
//! Cancelling the token stops the actor wherever it is waiting (idle,
//! dialing, or mid-backoff). The request channel is closed, the connection
//! is closed, and every reader, including ones already blocked in `next()`,
//! observes `None`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::close_within_grace;
use crate::retry::{Backoff, BackoffConfig};
use crate::{
    //
    log_debug,
    log_info,
    log_warn,
    ConnectionBox,
    ConnectorPtr,
    RelayError,
    Result,
    SessionBox,
};

type SessionRequest = oneshot::Sender<SessionBox>;

/// Reader handle onto the session supply.
///
/// Cheap to clone; every clone is an independent reader and every session it
/// receives is exclusively its own.
#[derive(Clone)]
pub struct SessionSupply {
    // ---
    requests: mpsc::Sender<SessionRequest>,
    queue_name: Arc<str>,
}

impl SessionSupply {
    /// Start the redial actor.
    ///
    /// The actor lives until `token` is cancelled or every reader handle is
    /// dropped. The returned [`JoinHandle`] completes when it has closed the
    /// broker connection.
    pub fn spawn(
        token: CancellationToken,
        connector: ConnectorPtr,
        queue_name: impl Into<String>,
        backoff: BackoffConfig,
    ) -> (Self, JoinHandle<()>) {
        // ---
        let queue_name: Arc<str> = Arc::from(queue_name.into());
        let (tx, rx) = mpsc::channel(16);

        let actor = Redialer {
            token,
            connector,
            queue_name: Arc::clone(&queue_name),
            backoff: Backoff::new(backoff),
            requests: rx,
            connection: None,
        };

        let handle = tokio::spawn(actor.run());

        (
            Self {
                requests: tx,
                queue_name,
            },
            handle,
        )
    }

    /// Wait for the next session. `None` once the supply has shut down.
    pub async fn next(&self) -> Option<SessionBox> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.requests.send(tx).await.ok()?;
        rx.await.ok()
    }

    /// Queue every session from this supply is bound to.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Whether the supply has shut down.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Resolves once the supply has shut down.
    pub async fn closed(&self) {
        self.requests.closed().await
    }
}

/// Background actor that owns the broker connection.
struct Redialer {
    // ---
    token: CancellationToken,
    connector: ConnectorPtr,
    queue_name: Arc<str>,
    backoff: Backoff,
    requests: mpsc::Receiver<SessionRequest>,
    connection: Option<ConnectionBox>,
}

impl Redialer {
    async fn run(mut self) {
        // ---
        let token = self.token.clone();
        let broker = self.connector.broker_label().to_string();

        log_info!("session supply started for queue {} on {broker}", self.queue_name);

        loop {
            let reply = tokio::select! {
                biased;
                () = token.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(reply) => reply,
                    None => break,
                },
            };

            // The reader may have given up while waiting in the queue.
            if reply.is_closed() {
                continue;
            }

            let Some(session) = self.mint().await else {
                break;
            };

            if let Err(mut session) = reply.send(session) {
                let sid = session.session_id().to_string();
                log_debug!("reader left before session {sid} was handed over");
                close_within_grace(&sid, session.close()).await;
            }
        }

        self.requests.close();
        if let Some(mut connection) = self.connection.take() {
            close_within_grace("broker connection", connection.close()).await;
        }

        log_info!("session supply for queue {} stopped", self.queue_name);
    }

    /// Mint a session, redialing as often as it takes.
    ///
    /// Returns `None` only when cancelled.
    async fn mint(&mut self) -> Option<SessionBox> {
        // ---
        let token = self.token.clone();

        loop {
            let attempt = tokio::select! {
                biased;
                () = token.cancelled() => return None,
                attempt = self.try_mint() => attempt,
            };

            match attempt {
                Ok(session) => {
                    self.backoff.reset();
                    log_debug!("minted session {}", session.session_id());
                    return Some(session);
                }
                Err(err) => {
                    if let Some(mut connection) = self.connection.take() {
                        close_within_grace("broker connection", connection.close()).await;
                    }

                    let delay = self.backoff.next_delay();
                    log_warn!(
                        "broker {} unavailable ({err}), redialing in {delay:?}",
                        self.connector.broker_label()
                    );

                    tokio::select! {
                        biased;
                        () = token.cancelled() => return None,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn try_mint(&mut self) -> Result<SessionBox> {
        // ---
        let stale = self
            .connection
            .as_ref()
            .is_some_and(|connection| !connection.is_connected());
        if stale {
            log_info!("broker connection lost, redialing");
            if let Some(mut connection) = self.connection.take() {
                close_within_grace("broker connection", connection.close()).await;
            }
        }

        if self.connection.is_none() {
            let connection = self.connector.connect().await?;
            log_info!("connected to broker {}", self.connector.broker_label());
            self.connection = Some(connection);
        }

        match self.connection.as_mut() {
            Some(connection) => connection.open_session(&self.queue_name).await,
            None => Err(RelayError::SessionClosed),
        }
    }
}
