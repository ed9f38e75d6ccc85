//! AMQP adapter: one consumer on the command routing key, responses
//! published back on the UI topic.
//!
//! The adapter owns reconnection only. Message semantics live in the
//! dispatcher; every delivery is acknowledged exactly once, after the
//! response (if any) has been published. Deliveries are never requeued —
//! registry moves are not idempotent across redelivery.

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Connection, ConnectionProperties, ExchangeKind,
};

use conductor_core::Dispatcher;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub exchange: String,
    pub inbound_routing_key: String,
    pub outbound_routing_key: String,
    pub consumer_tag: String,
}

impl BusConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            exchange: "pht".to_string(),
            inbound_routing_key: "tr".to_string(),
            outbound_routing_key: "ui.tr.event".to_string(),
            consumer_tag: "train-router".to_string(),
        }
    }
}

pub struct BusAdapter {
    config: BusConfig,
}

impl BusAdapter {
    pub fn new(config: BusConfig) -> Self {
        Self { config }
    }

    /// Consume forever. Transport loss is retried with exponential back-off;
    /// the loop only returns if the runtime is shutting down.
    pub async fn run(&self, dispatcher: &Dispatcher) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.consume(dispatcher, &mut backoff).await {
                Ok(()) => {
                    tracing::warn!("Bus consumer stream ended, reconnecting");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Bus connection lost, reconnecting in {backoff:?}");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn consume(&self, dispatcher: &Dispatcher, backoff: &mut Duration) -> Result<()> {
        let connection =
            Connection::connect(&self.config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        // Broker-named exclusive queue bound to the command routing key.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                queue.name().as_str(),
                &self.config.exchange,
                &self.config.inbound_routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                queue.name().as_str(),
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            exchange = %self.config.exchange,
            routing_key = %self.config.inbound_routing_key,
            "Connected to message bus, consuming"
        );
        // A live consumer means the outage is over.
        *backoff = INITIAL_BACKOFF;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;

            if let Some(payload) = dispatcher.handle(&delivery.data).await {
                let publish = channel
                    .basic_publish(
                        &self.config.exchange,
                        &self.config.outbound_routing_key,
                        BasicPublishOptions::default(),
                        &payload,
                        BasicProperties::default(),
                    )
                    .await;
                match publish {
                    Ok(confirm) => {
                        if let Err(e) = confirm.await {
                            tracing::error!(error = %e, "Response publish not confirmed");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to publish response");
                    }
                }
            }

            // Ack unconditionally: handled, malformed, and publish-failed
            // messages alike must not come back.
            delivery.ack(BasicAckOptions::default()).await?;
        }

        Ok(())
    }
}
