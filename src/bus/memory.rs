//! In-process bus.
//!
//! Delivers published messages to local subscribers and keeps a log of every
//! publish attempt. Used by tests and for running the router without a bus
//! server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt};
use tokio::sync::mpsc;

use crate::bus::{BusError, BusMessage, MessageBus, Subscription};

/// A publish attempt recorded by [`MemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub accepted: bool,
}

#[derive(Debug, Default)]
pub struct MemoryBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>>,
    log: Mutex<Vec<Published>>,
    fail_publishes: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (they are still recorded).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Deliver a message to subscribers as if it came from a remote peer.
    ///
    /// Returns the number of subscribers reached.
    pub fn inject(&self, message: BusMessage) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(senders) = subscribers.get_mut(&message.topic) else {
            return 0;
        };
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        senders.len()
    }

    /// Deliver a payload on a topic without a reply subject.
    pub fn inject_payload(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        self.inject(BusMessage {
            topic: topic.to_string(),
            reply: None,
            payload: payload.into(),
        })
    }

    /// Every publish attempt so far, in order.
    pub fn published(&self) -> Vec<Published> {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Publish attempts on one topic.
    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers
            .get(topic)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn record(&self, published: Published) {
        match self.log.lock() {
            Ok(mut log) => log.push(published),
            Err(poisoned) => poisoned.into_inner().push(published),
        }
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, payload: Bytes) -> BoxFuture<'_, Result<(), BusError>> {
        let accepted = !self.fail_publishes.load(Ordering::SeqCst);
        self.record(Published {
            topic: topic.to_string(),
            payload: payload.clone(),
            accepted,
        });

        let result = if accepted {
            self.inject(BusMessage {
                topic: topic.to_string(),
                reply: None,
                payload,
            });
            Ok(())
        } else {
            Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "publishing disabled".to_string(),
            })
        };
        futures_util::future::ready(result).boxed()
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<Subscription, BusError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.entry(topic.to_string()).or_default().push(tx),
            Err(poisoned) => poisoned
                .into_inner()
                .entry(topic.to_string())
                .or_default()
                .push(tx),
        }

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        futures_util::future::ready(Ok(stream.boxed())).boxed()
    }
}
