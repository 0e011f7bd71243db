//! Downstream sinks.
//!
//! The consumer forwards raw payloads onto a channel; [`dispatch`] drains
//! that channel and hands each payload to every configured [`Sink`]. A slow
//! sink slows `dispatch`, which fills the channel, which stops the consumer
//! from acknowledging further deliveries.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Environment,
    RelayError,
    Result,
};

/// Something that takes consumed payloads.
#[async_trait::async_trait]
pub trait Sink: Send {
    // ---
    /// Identifier used in log lines.
    fn name(&self) -> &str;

    async fn accept(&mut self, payload: &Bytes) -> Result<()>;
}

/// Writes each payload as one line to an [`AsyncWrite`].
pub struct WriterSink<W> {
    // ---
    name: String,
    writer: W,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<tokio::io::Stdout> {
    pub fn stdout(name: impl Into<String>) -> Self {
        Self::new(name, tokio::io::stdout())
    }
}

impl WriterSink<tokio::io::Sink> {
    /// Accepts and drops everything.
    pub fn discard() -> Self {
        Self::new("discard", tokio::io::sink())
    }
}

#[async_trait::async_trait]
impl<W> Sink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&mut self, payload: &Bytes) -> Result<()> {
        // ---
        let written = async {
            self.writer.write_all(payload).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        };

        written.await.map_err(|e| RelayError::Sink {
            sink: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Sinks the worker forwards to in `environment`.
pub fn sinks_for(environment: Environment) -> Vec<Box<dyn Sink>> {
    // ---
    match environment {
        Environment::Development => vec![Box::new(WriterSink::stdout("stdout"))],
        Environment::Staging => vec![Box::new(WriterSink::discard())],
        Environment::Production => vec![Box::new(WriterSink::stdout("event-log"))],
    }
}

/// Hand every payload from `rx` to every sink until the channel closes or
/// `token` is cancelled.
///
/// A failing sink is logged and skipped; the payload is still offered to the
/// remaining sinks and the loop keeps going.
pub async fn dispatch(
    mut rx: mpsc::Receiver<Bytes>,
    mut sinks: Vec<Box<dyn Sink>>,
    token: CancellationToken,
) {
    // ---
    log_info!("dispatching to {} sink(s)", sinks.len());

    loop {
        let payload = tokio::select! {
            biased;
            () = token.cancelled() => break,
            payload = rx.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        for sink in sinks.iter_mut() {
            if let Err(err) = sink.accept(&payload).await {
                log_error!("{err}");
            }
        }
    }

    log_debug!("sink dispatch stopped");
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Recording {
        seen: Arc<Mutex<Vec<Bytes>>>,
    }

    #[async_trait::async_trait]
    impl Sink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn accept(&mut self, payload: &Bytes) -> Result<()> {
            self.seen.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl Sink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn accept(&mut self, _payload: &Bytes) -> Result<()> {
            Err(RelayError::Sink {
                sink: "broken".into(),
                reason: "always fails".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_writer_sink_writes_lines() {
        // ---
        let mut sink = WriterSink::new("mem", Vec::new());

        sink.accept(&Bytes::from_static(b"{\"a\":1}")).await.unwrap();
        sink.accept(&Bytes::from_static(b"{\"b\":2}")).await.unwrap();

        assert_eq!(sink.into_inner(), b"{\"a\":1}\n{\"b\":2}\n".to_vec());
    }

    #[tokio::test]
    async fn test_dispatch_survives_failing_sink() {
        // ---
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn Sink>> = vec![
            Box::new(Broken),
            Box::new(Recording {
                seen: Arc::clone(&seen),
            }),
        ];
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();

        let task = tokio::spawn(dispatch(rx, sinks, token));
        tx.send(Bytes::from_static(b"one")).await.unwrap();
        tx.send(Bytes::from_static(b"two")).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatch did not stop")
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_cancel() {
        // ---
        let (_tx, rx) = mpsc::channel::<Bytes>(1);
        let token = CancellationToken::new();
        let task = tokio::spawn(dispatch(rx, vec![Box::new(WriterSink::discard())], token.clone()));

        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatch ignored cancel")
            .unwrap();
    }
}
