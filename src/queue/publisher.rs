//! Confirm-gated publisher.
//!
//! Drains an inbound channel of [`Message`]s onto sessions taken from the
//! [`SessionSupply`], one message in flight at a time.
//!
//! ## Per-session loop
//!
//! 1. **Arm**: put the session into confirm mode. If the broker refuses,
//!    the publisher keeps going in degraded mode where no publish is ever
//!    reported delivered, because nothing proves it was.
//! 2. A buffered message left over from a previous session is published
//!    first, before anything new is read.
//! 3. A single `select!` then waits on:
//!    - the confirm of the in-flight message
//!      (`Ack` → `true`, `Nack`/`NotRequested` → `false`);
//!    - the confirm future failing (session died mid-confirm): the message
//!      stays buffered with its completion open and is retried on the next
//!      session;
//!    - the inbound channel, but only while nothing is in flight;
//!    - cancellation.
//! 4. A publish error resolves the message `false`, keeps it at the head of
//!    the buffer and moves on to a new session.
//!
//! Each message's completion is written exactly once. A message that is
//! retried after its completion was already spent is still re-sent to the
//! broker, but the later verdict is only logged.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{close_within_grace, SessionSupply};
use crate::{
    //
    log_debug,
    log_info,
    log_warn,
    ConfirmFuture,
    Confirmation,
    Message,
    Result,
    SessionBox,
};

/// How a session's loop ended.
enum SessionExit {
    /// Session is gone; get a new one.
    Redial,

    /// No more work, or told to stop.
    Finished,
}

/// Publisher task state.
pub struct Publisher {
    // ---
    supply: SessionSupply,
    inbound: mpsc::Receiver<Message>,
    queue_name: String,
    token: CancellationToken,

    // capacity-one buffer: the message in flight, or waiting to be retried
    pending: Option<Message>,
}

impl Publisher {
    pub fn new(
        supply: SessionSupply,
        inbound: mpsc::Receiver<Message>,
        queue_name: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        // ---
        Self {
            supply,
            inbound,
            queue_name: queue_name.into(),
            token,
            pending: None,
        }
    }

    /// Run on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the inbound channel is closed and drained, the session
    /// supply shuts down, or the token is cancelled.
    pub async fn run(mut self) {
        // ---
        let token = self.token.clone();
        log_info!("publisher started for queue {}", self.queue_name);

        loop {
            let session = tokio::select! {
                biased;
                () = token.cancelled() => break,
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

        self.abandon();
        log_info!("publisher for queue {} stopped", self.queue_name);
    }

    async fn drive(&mut self, mut session: SessionBox) -> SessionExit {
        // ---
        let token = self.token.clone();
        let sid = session.session_id().to_string();

        // Session calls stall while the broker is blocked; each one races the token.
        let armed = tokio::select! {
            biased;
            () = token.cancelled() => {
                close_within_grace(&sid, session.close()).await;
                return SessionExit::Finished;
            }
            armed = session.enable_confirms() => armed,
        };

        let confirms = match armed {
            Ok(()) => true,
            Err(err) => {
                log_warn!("[{sid}] {err}; every publish on this session will be reported failed");
                false
            }
        };

        let mut in_flight: Option<ConfirmFuture> = None;

        loop {
            if in_flight.is_none() {
                if let Some(msg) = self.pending.as_mut() {
                    let published = tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            close_within_grace(&sid, session.close()).await;
                            return SessionExit::Finished;
                        }
                        published = session.publish(msg.body().clone()) => published,
                    };

                    match published {
                        Ok(confirm) => in_flight = Some(confirm),
                        Err(err) => {
                            log_warn!("[{sid}] publish failed, retrying on a new session: {err}");
                            msg.resolve(false);
                            close_within_grace(&sid, session.close()).await;
                            return SessionExit::Redial;
                        }
                    }
                }
            }

            tokio::select! {
                biased;

                () = token.cancelled() => {
                    close_within_grace(&sid, session.close()).await;
                    return SessionExit::Finished;
                }

                confirmed = next_confirm(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    match confirmed {
                        Ok(confirmation) => self.settle(&sid, confirmation, confirms),
                        Err(err) => {
                            log_warn!("[{sid}] confirm channel closed ({err}), requeueing in-flight message");
                            close_within_grace(&sid, session.close()).await;
                            return SessionExit::Redial;
                        }
                    }
                }

                msg = self.inbound.recv(), if self.pending.is_none() => match msg {
                    Some(msg) => self.pending = Some(msg),
                    None => {
                        log_debug!("[{sid}] inbound closed, nothing in flight");
                        close_within_grace(&sid, session.close()).await;
                        return SessionExit::Finished;
                    }
                },
            }
        }
    }

    /// Resolve the in-flight message from the broker's verdict.
    fn settle(&mut self, sid: &str, confirmation: Confirmation, confirms: bool) {
        // ---
        let Some(mut msg) = self.pending.take() else {
            return;
        };

        let delivered = match confirmation {
            Confirmation::Ack => confirms,
            Confirmation::Nack => {
                log_warn!("[{sid}] broker nacked message, body: {:?}", msg.body());
                false
            }
            Confirmation::NotRequested => false,
        };

        if !msg.resolve(delivered) {
            log_debug!("[{sid}] retried message settled ({delivered}) after its outcome was reported");
        }
    }

    /// Fail everything still owned by the publisher.
    fn abandon(&mut self) {
        // ---
        if let Some(mut msg) = self.pending.take() {
            msg.resolve(false);
        }

        self.inbound.close();
        let mut dropped = 0usize;
        while let Ok(mut msg) = self.inbound.try_recv() {
            msg.resolve(false);
            dropped += 1;
        }

        if dropped > 0 {
            log_info!("publisher shut down with {dropped} queued messages unpublished");
        }
    }
}

/// Await the in-flight confirm, or never resolve if there is none.
async fn next_confirm(in_flight: &mut Option<ConfirmFuture>) -> Result<Confirmation> {
    // ---
    match in_flight {
        Some(confirm) => confirm.await,
        None => std::future::pending().await,
    }
}
