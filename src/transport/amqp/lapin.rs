//! AMQP broker implementation using `lapin`.
//!
//! Maps the session traits onto AMQP 0-9-1:
//!
//! - [`LapinConnector`] dials the broker (with a timeout) and yields a
//!   connection.
//! - Every session is its own AMQP channel. Opening one declares the bound
//!   queue as durable, so declaring it again from another process is
//!   harmless.
//! - Publishing goes through the default exchange with the queue name as
//!   routing key and persistent delivery mode. In confirm mode the lapin
//!   `PublisherConfirm` is handed back as the session's confirm future.
//! - Consuming sets a prefetch of one, then a small pump task moves lapin
//!   deliveries into the session inbox. The inbox closes when the lapin
//!   consumer stream ends, which is how a dead channel surfaces to the
//!   consumer loop.
//!
//! ## Scope and limitations
//!
//! - No exchanges or bindings; routing is always "default exchange, routing
//!   key = queue name".
//! - Connection recovery is not delegated to lapin. A failed channel or
//!   connection is dropped and the session supply dials a new one.

use std::time::Duration;

use bytes::Bytes;
use futures_lite::stream::StreamExt;
use lapin::{
    //
    acker::Acker,
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        BasicQosOptions,
        ConfirmSelectOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation as AmqpConfirmation,
    types::FieldTable,
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::relay_config::mask_credentials;
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Acknowledge,
    BrokerConnection,
    ConfirmFuture,
    Confirmation,
    ConnectionBox,
    ConsumeHandle,
    Connector,
    Delivery,
    RelayError,
    Result,
    Session,
    SessionBox,
};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Dials an AMQP broker with lapin.
pub struct LapinConnector {
    // ---
    uri: String,
    label: String,
    connect_timeout: Duration,
}

impl LapinConnector {
    /// `uri` is an `amqp://` or `amqps://` URI. Credentials never show up in
    /// logs; see [`Connector::broker_label`].
    pub fn new(uri: impl Into<String>, connect_timeout: Duration) -> Self {
        // ---
        let uri = uri.into();
        let label = mask_credentials(&uri);
        Self {
            uri,
            label,
            connect_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Connector for LapinConnector {
    // ---
    fn broker_label(&self) -> &str {
        &self.label
    }

    async fn connect(&self) -> Result<ConnectionBox> {
        // ---
        log_debug!("dialing AMQP broker {}", self.label);

        let dial = Connection::connect(&self.uri, ConnectionProperties::default());
        let connection = match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                return Err(RelayError::Connect(format!("amqp: connection failed: {e}")));
            }
            Err(_) => {
                return Err(RelayError::Connect(format!(
                    "amqp: no answer from {} within {:?}",
                    self.label, self.connect_timeout
                )));
            }
        };

        Ok(Box::new(LapinConnection { connection }))
    }
}

struct LapinConnection {
    connection: Connection,
}

#[async_trait::async_trait]
impl BrokerConnection for LapinConnection {
    // ---
    async fn open_session(&mut self, queue: &str) -> Result<SessionBox> {
        // ---
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| RelayError::Session(format!("amqp: channel creation failed: {e}")))?;

        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            nowait: false,
        };

        channel
            .queue_declare(queue.into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| RelayError::Session(format!("amqp: queue declare failed: {e}")))?;

        let session_id = format!("amqp-ch{}", channel.id());
        log_debug!("[{session_id}] declared queue {queue}");

        Ok(Box::new(LapinSession {
            session_id,
            queue: queue.to_string(),
            channel,
            pump: None,
        }))
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn close(&mut self) {
        // ---
        if self.connection.status().connected() {
            if let Err(e) = self.connection.close(200, "Normal shutdown".into()).await {
                log_debug!("amqp: connection close: {e}");
            }
        }
    }
}

struct LapinSession {
    session_id: String,
    queue: String,
    channel: Channel,
    pump: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl Session for LapinSession {
    // ---
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn enable_confirms(&mut self) -> Result<()> {
        // ---
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| RelayError::ConfirmsUnsupported(format!("amqp: confirm.select refused: {e}")))
    }

    async fn publish(&mut self, body: Bytes) -> Result<ConfirmFuture> {
        // ---
        let confirm = self
            .channel
            .basic_publish(
                "".into(),                 // default exchange
                self.queue.as_str().into(), // routing key = queue name
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(|e| RelayError::Publish(format!("amqp: publish failed: {e}")))?;

        Ok(Box::pin(async move {
            match confirm.await {
                Ok(AmqpConfirmation::Ack(_)) => Ok(Confirmation::Ack),
                Ok(AmqpConfirmation::Nack(_)) => Ok(Confirmation::Nack),
                Ok(AmqpConfirmation::NotRequested) => Ok(Confirmation::NotRequested),
                Err(e) => Err(RelayError::Publish(format!("amqp: confirm lost: {e}"))),
            }
        }))
    }

    async fn consume(&mut self) -> Result<ConsumeHandle> {
        // ---
        if self.pump.is_some() {
            return Err(RelayError::Consume("session is already consuming".into()));
        }

        self.channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| RelayError::Consume(format!("amqp: basic.qos failed: {e}")))?;

        let mut consumer = self
            .channel
            .basic_consume(
                self.queue.as_str().into(),
                &format!("{}-consumer", self.session_id),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::Consume(format!("amqp: consume failed: {e}")))?;

        log_info!("[{}] started consuming queue {}", self.session_id, self.queue);

        let (tx, rx) = mpsc::channel(1);
        let sid = self.session_id.clone();

        self.pump = Some(tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        let body = Bytes::from(delivery.data);
                        let acker = LapinAcker {
                            acker: delivery.acker,
                        };
                        if tx.send(Delivery::new(body, Box::new(acker))).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log_error!("[{sid}] consumer error: {e}");
                        break;
                    }
                }
            }
            log_debug!("[{sid}] consumer stream ended");
        }));

        Ok(ConsumeHandle { inbox: rx })
    }

    async fn close(&mut self) {
        // ---
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "Normal shutdown".into()).await {
                log_debug!("[{}] channel close: {e}", self.session_id);
            }
        }
    }
}

struct LapinAcker {
    acker: Acker,
}

#[async_trait::async_trait]
impl Acknowledge for LapinAcker {
    async fn ack(&self) -> Result<()> {
        // ---
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Ack(format!("amqp: ack failed: {e}")))
    }
}
