//! AMQP consumer for resource usage updates
//!
//! Owns the receive loop for the bound queue. Every delivery is acked before
//! any processing is attempted: usage-update failures are not broker-retryable
//! in this design, so a bad payload must leave the queue instead of recycling
//! through it. Decode failures get one requeue on the first attempt and are
//! discarded on redelivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::config::AmqpConfig;
use crate::error::Result;
use crate::models::UsageUpdate;

/// One message instance received from the broker
///
/// Acknowledgment is one-shot: the transport does not guarantee idempotence,
/// so callers must invoke exactly one of `ack`/`reject` per delivery.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn body(&self) -> &[u8];
    fn redelivered(&self) -> bool;
    fn exchange(&self) -> &str;
    fn routing_key(&self) -> &str;
    async fn ack(&self) -> Result<()>;
    async fn reject(&self, requeue: bool) -> Result<()>;
}

#[async_trait]
impl Delivery for lapin::message::Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    fn exchange(&self) -> &str {
        self.exchange.as_str()
    }

    fn routing_key(&self) -> &str {
        self.routing_key.as_str()
    }

    async fn ack(&self) -> Result<()> {
        Ok(self.acker.ack(BasicAckOptions { multiple: false }).await?)
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        Ok(self.acker.reject(BasicRejectOptions { requeue }).await?)
    }
}

/// Callback invoked with every successfully decoded usage update
///
/// The handler returns nothing: any failure it encounters is its own
/// responsibility to log and report. The consumer never retries on the
/// handler's behalf.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: &UsageUpdate);
}

/// Per-delivery acknowledgment policy and dispatch
///
/// Deliveries are processed sequentially in arrival order; the handler call
/// blocks the receive loop until it returns (or until the optional deadline
/// expires).
pub struct UsageConsumer<H> {
    handler: Arc<H>,
    handler_timeout: Option<Duration>,
}

impl<H: UpdateHandler> UsageConsumer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            handler_timeout: None,
        }
    }

    /// Set a deadline for each handler invocation
    ///
    /// Without one, a handler that never returns stalls the receive loop
    /// indefinitely.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Apply the acknowledgment policy to one delivery
    ///
    /// Exactly one of {dispatch to handler, discard} happens per delivery:
    /// 1. Ack unconditionally. If the ack call fails, log and abandon the
    ///    delivery; the transport layer owns connection recovery.
    /// 2. Decode the body. On failure, reject with `requeue = !redelivered`:
    ///    a first attempt gets one retry for transient glitches, a redelivery
    ///    that still fails to decode is permanently malformed and is dropped.
    /// 3. On success, dispatch to the handler in this loop frame.
    pub async fn process_delivery<D: Delivery>(&self, delivery: &D) {
        tracing::debug!(
            exchange = %delivery.exchange(),
            routing_key = %delivery.routing_key(),
            body = %String::from_utf8_lossy(delivery.body()),
            "message received"
        );

        if let Err(e) = delivery.ack().await {
            tracing::error!(
                error = %e,
                routing_key = %delivery.routing_key(),
                "failed to ack delivery, abandoning it"
            );
            return;
        }

        let redelivered = delivery.redelivered();
        let update = match serde_json::from_slice::<UsageUpdate>(delivery.body()) {
            Ok(update) => update,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    routing_key = %delivery.routing_key(),
                    redelivered,
                    body = %String::from_utf8_lossy(delivery.body()),
                    "failed to decode usage update"
                );
                // The delivery is already acked off the primary queue; on a
                // single-ack broker this reject is best-effort signaling, so
                // its failure is harmless.
                if let Err(e) = delivery.reject(!redelivered).await {
                    tracing::error!(error = %e, "failed to reject undecodable delivery");
                }
                return;
            }
        };

        match self.handler_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, self.handler.handle(&update))
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        attribute = %update.attribute,
                        timeout_secs = limit.as_secs(),
                        "handler exceeded deadline, moving on"
                    );
                }
            }
            None => self.handler.handle(&update).await,
        }
    }

    /// Drain a delivery stream until it ends
    ///
    /// The stream ends when the channel or connection closes; there is no
    /// per-message cancellation.
    pub async fn run<D, S>(&self, mut deliveries: S)
    where
        D: Delivery,
        S: futures::Stream<Item = lapin::Result<D>> + Unpin,
    {
        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => self.process_delivery(&delivery).await,
                Err(e) => {
                    tracing::warn!(error = %e, "error receiving delivery");
                }
            }
        }

        tracing::info!("delivery stream closed, consumer loop exiting");
    }
}

fn exchange_kind(exchange_type: &str) -> ExchangeKind {
    match exchange_type {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

/// Encapsulates the AMQP connection and the consumer bound to it
pub struct AmqpAdapter {
    connection: Connection,
    channel: Channel,
}

impl AmqpAdapter {
    /// Connect, bind the queue, and start the receive loop
    ///
    /// Declares the exchange and queue (durable), binds them with the
    /// configured routing key, applies the prefetch limit, and spawns the
    /// consumer loop as a background task. Returns once the bind succeeds;
    /// a rejected bind (e.g. mismatched exchange type) surfaces here as a
    /// setup error.
    pub async fn new<H>(config: &AmqpConfig, handler: Arc<H>) -> Result<Self>
    where
        H: UpdateHandler + 'static,
    {
        tracing::debug!("connecting to the AMQP broker");
        let connection =
            Connection::connect(&config.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        tracing::debug!("done connecting to the AMQP broker");

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await?;

        channel
            .exchange_declare(
                &config.exchange,
                exchange_kind(&config.exchange_type),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let deliveries = channel
            .basic_consume(
                &config.queue,
                "qms-adapter",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            exchange = %config.exchange,
            queue = %config.queue,
            routing_key = %config.routing_key,
            prefetch_count = config.prefetch_count,
            "consumer bound"
        );

        let mut consumer = UsageConsumer::new(handler);
        if let Some(secs) = config.handler_timeout_secs {
            consumer = consumer.with_handler_timeout(Duration::from_secs(secs));
        }

        tokio::spawn(async move {
            consumer.run(deliveries).await;
        });

        Ok(Self {
            connection,
            channel,
        })
    }

    /// Close the connection to the AMQP broker
    ///
    /// Ends the receive loop; no new handler invocations are started once
    /// close begins, but in-flight ones are not cancelled.
    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "shutting down").await {
            tracing::warn!(error = %e, "error closing AMQP channel");
        }
        if let Err(e) = self.connection.close(200, "shutting down").await {
            tracing::warn!(error = %e, "error closing AMQP connection");
        }
    }
}

impl std::fmt::Debug for AmqpAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpAdapter")
            .field("status", &self.connection.status().state())
            .finish()
    }
}
