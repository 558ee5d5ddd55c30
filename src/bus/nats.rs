//! NATS-backed bus client.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};

use crate::bus::{BusError, BusMessage, MessageBus, Subscription};
use crate::config::NatsConfig;

/// Bus client over a single NATS connection.
///
/// Reconnects are handled inside `async_nats`; callers only see publish and
/// subscribe failures.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the configured server.
    pub async fn connect(config: &NatsConfig) -> Result<Self, BusError> {
        let options = if config.user.is_empty() {
            async_nats::ConnectOptions::new()
        } else {
            async_nats::ConnectOptions::with_user_and_password(
                config.user.clone(),
                config.pass.clone(),
            )
        };

        let client = options
            .name("edge-router")
            .connect(config.host.as_str())
            .await
            .map_err(|e| BusError::Connect {
                host: config.host.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(host = %config.host, "Connected to message bus");
        Ok(Self { client })
    }
}

impl MessageBus for NatsBus {
    fn publish(&self, topic: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>> {
        let topic = topic.to_string();
        async move {
            self.client
                .publish(topic.clone(), payload)
                .await
                .map_err(|e| BusError::Publish {
                    topic,
                    reason: e.to_string(),
                })
        }
        .boxed()
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<Subscription, BusError>> {
        let topic = topic.to_string();
        async move {
            let subscriber = self
                .client
                .subscribe(topic.clone())
                .await
                .map_err(|e| BusError::Subscribe {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;

            tracing::debug!(topic = %topic, "Subscribed");

            let stream = subscriber.map(|message| BusMessage {
                topic: message.subject.to_string(),
                reply: message.reply.map(|r| r.to_string()),
                payload: message.payload,
            });
            Ok(stream.boxed())
        }
        .boxed()
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("state", &self.client.connection_state())
            .finish()
    }
}
