//! Queue consumer.
//!
//! Subscribes to the queue on every session it takes from the
//! [`SessionSupply`] and forwards each delivery's body onto the outbound
//! sink channel.
//!
//! A delivery is acknowledged to the broker only after the sink channel has
//! accepted it. Sending blocks while the channel is full, which is how sink
//! backpressure reaches the broker. A crash between receipt and forwarding
//! therefore means redelivery, never loss: delivery is at-least-once and
//! sinks may see duplicates.
//!
//! When the delivery channel closes (session lost) the consumer drops the
//! session and resubscribes on the next one.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{close_within_grace, SessionSupply};
use crate::{
    //
    log_debug,
    log_info,
    log_warn,
    SessionBox,
};

enum SessionExit {
    Redial,
    Finished,
}

/// Consumer task state.
pub struct Consumer {
    // ---
    supply: SessionSupply,
    outbound: mpsc::Sender<Bytes>,
    queue_name: String,
    token: CancellationToken,
}

impl Consumer {
    pub fn new(
        supply: SessionSupply,
        outbound: mpsc::Sender<Bytes>,
        queue_name: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        // ---
        Self {
            supply,
            outbound,
            queue_name: queue_name.into(),
            token,
        }
    }

    /// Run on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the supply shuts down, the sink side goes away, or the
    /// token is cancelled.
    pub async fn run(self) {
        // ---
        log_info!("consumer started for queue {}", self.queue_name);

        loop {
            let session = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                session = self.supply.next() => match session {
                    Some(session) => session,
                    None => break,
                },
            };

            match self.drive(session).await {
                SessionExit::Redial => continue,
                SessionExit::Finished => break,
            }
        }

        log_info!("consumer for queue {} stopped", self.queue_name);
    }

    async fn drive(&self, mut session: SessionBox) -> SessionExit {
        // ---
        let sid = session.session_id().to_string();

        let subscribed = tokio::select! {
            biased;
            () = self.token.cancelled() => {
                close_within_grace(&sid, session.close()).await;
                return SessionExit::Finished;
            }
            subscribed = session.consume() => subscribed,
        };

        let mut handle = match subscribed {
            Ok(handle) => handle,
            Err(err) => {
                log_warn!("[{sid}] cannot consume {}: {err}", self.queue_name);
                close_within_grace(&sid, session.close()).await;
                return SessionExit::Redial;
            }
        };

        log_debug!("[{sid}] consuming {}", self.queue_name);

        loop {
            let delivery = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    close_within_grace(&sid, session.close()).await;
                    return SessionExit::Finished;
                }
                delivery = handle.inbox.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        log_warn!("[{sid}] delivery channel closed, resubscribing");
                        close_within_grace(&sid, session.close()).await;
                        return SessionExit::Redial;
                    }
                },
            };

            let (body, acker) = delivery.into_parts();

            // Unacknowledged deliveries go back to the queue once the session
            // is closed, so bailing out here loses nothing.
            let forwarded = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    close_within_grace(&sid, session.close()).await;
                    return SessionExit::Finished;
                }
                sent = self.outbound.send(body) => sent,
            };

            if forwarded.is_err() {
                log_info!("[{sid}] sink channel closed, stopping consumer");
                close_within_grace(&sid, session.close()).await;
                return SessionExit::Finished;
            }

            let acked = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    close_within_grace(&sid, session.close()).await;
                    return SessionExit::Finished;
                }
                acked = acker.ack() => acked,
            };

            if let Err(err) = acked {
                log_warn!("[{sid}] ack failed, message will be redelivered: {err}");
                close_within_grace(&sid, session.close()).await;
                return SessionExit::Redial;
            }
        }
    }
}
