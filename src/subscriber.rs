//! Consumer-group subscription: claim, decode, dispatch, ack/retry/dead-letter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::BrokerClient;
use crate::envelope::Envelope;
use crate::error::SubscribeError;

/// A handler invoked for every envelope delivered to a subscriber. The
/// broker handle lets a handler publish replies or further messages without
/// needing its own reference to the bus.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, envelope: Envelope, broker: &dyn BrokerClient) -> anyhow::Result<()>;
}

/// Pulls envelopes off a stream's consumer group and drives each one
/// through decode → handle → ack/retry/dead-letter. One subscriber owns one
/// `(stream, group, consumer)` triple and its own retry counters.
pub struct ConsumerGroupSubscriber<H: Handler> {
    broker: Arc<dyn BrokerClient>,
    stream: String,
    group: String,
    consumer: String,
    handler: H,
    block_ms: u64,
    dead_letter_max: u32,
}

impl<H: Handler + 'static> ConsumerGroupSubscriber<H> {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        handler: H,
    ) -> Self {
        Self {
            broker,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            handler,
            block_ms: crate::constants::DEFAULT_READ_BLOCK_MS,
            dead_letter_max: crate::constants::DEFAULT_DEAD_LETTER_MAX_RETRIES,
        }
    }

    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms;
        self
    }

    pub fn with_dead_letter_max(mut self, max: u32) -> Self {
        self.dead_letter_max = max;
        self
    }

    /// Spawns the read loop. The returned `JoinHandle` completes once the
    /// cancel channel fires and the loop observes it; in-flight un-acked
    /// entries are left for another consumer to claim.
    pub fn spawn(self) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(cancel_rx));
        (handle, cancel_tx)
    }

    async fn run(self, mut cancel: watch::Receiver<bool>) {
        self.broker
            .ensure_group(&self.stream, &self.group)
            .await
            .ok();

        let mut retry_counts: HashMap<String, u32> = HashMap::new();

        loop {
            if *cancel.borrow() {
                return;
            }

            let entries = tokio::select! {
                biased;
                _ = cancel.changed() => {
                    return;
                }
                result = self.broker.read_group(&self.group, &self.consumer, &self.stream, 1, self.block_ms) => result,
            };

            let entries = match entries {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(stream = %self.stream, error = %e, "transient broker error, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            for entry in entries {
                let Some(payload) = entry.payload() else {
                    tracing::warn!(stream = %self.stream, id = %entry.id, "entry has no payload field, acking and skipping");
                    let _ = self.broker.ack(&self.stream, &self.group, &entry.id).await;
                    continue;
                };

                let mut envelope = match Envelope::from_bytes(payload) {
                    Ok(env) => env,
                    Err(e) => {
                        let err = SubscribeError::from(e);
                        tracing::warn!(stream = %self.stream, id = %entry.id, error = %err, "failed to decode envelope, acking and dropping");
                        let _ = self.broker.ack(&self.stream, &self.group, &entry.id).await;
                        continue;
                    }
                };
                envelope.add_hop("bus_subscribe");

                // Retries happen in-process against the same delivered
                // entry rather than through broker redelivery: the broker
                // only hands a pending entry back via an explicit claim,
                // not on the next `read_group` call.
                loop {
                    if *cancel.borrow() {
                        return;
                    }

                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.changed() => {
                            return;
                        }
                        result = self.handler.handle(envelope.clone(), self.broker.as_ref()) => result,
                    };

                    match outcome {
                        Ok(()) => {
                            let _ = self.broker.ack(&self.stream, &self.group, &entry.id).await;
                            retry_counts.remove(&entry.id);
                            break;
                        }
                        Err(e) => {
                            let count = retry_counts.entry(entry.id.clone()).or_insert(0);
                            *count += 1;
                            if *count > self.dead_letter_max {
                                tracing::error!(
                                    stream = %self.stream,
                                    id = %entry.id,
                                    attempts = *count,
                                    error = %e,
                                    "dead-lettering entry after exceeding retry bound"
                                );
                                let _ = self.broker.ack(&self.stream, &self.group, &entry.id).await;
                                retry_counts.remove(&entry.id);
                                break;
                            }
                            tracing::warn!(
                                stream = %self.stream,
                                id = %entry.id,
                                attempts = *count,
                                error = %e,
                                "handler failed, retrying"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail_until: u32,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _envelope: Envelope, _broker: &dyn BrokerClient) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_until {
                anyhow::bail!("synthetic failure {n}");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn successful_handler_acks_and_clears_retry_count() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let env = Envelope::new("user");
        broker.ensure_group("s1", "g1").await.unwrap();
        broker.append("s1", "data", &env.to_bytes().unwrap(), 100).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let handler = CountingHandler {
            calls: calls.clone(),
            fail_until: 0,
        };
        let sub = ConsumerGroupSubscriber::new(broker.clone(), "s1", "g1", "c1", handler)
            .with_block_ms(50);
        let (task, cancel) = sub.spawn();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let _ = cancel.send(true);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_is_invoked_exactly_dead_letter_max_plus_one_times() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let env = Envelope::new("user");
        broker.ensure_group("s1", "g1").await.unwrap();
        broker.append("s1", "data", &env.to_bytes().unwrap(), 100).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let handler = CountingHandler {
            calls: calls.clone(),
            fail_until: u32::MAX,
        };
        let sub = ConsumerGroupSubscriber::new(broker.clone(), "s1", "g1", "c1", handler)
            .with_block_ms(20)
            .with_dead_letter_max(3);
        let (task, cancel) = sub.spawn();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let _ = cancel.send(true);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    struct HangingHandler {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler for HangingHandler {
        async fn handle(&self, _envelope: Envelope, _broker: &dyn BrokerClient) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Never resolves on its own; only cancellation can end this.
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_hanging_handler_mid_retry() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let env = Envelope::new("user");
        broker.ensure_group("s1", "g1").await.unwrap();
        broker.append("s1", "data", &env.to_bytes().unwrap(), 100).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let handler = HangingHandler {
            calls: calls.clone(),
        };
        let sub = ConsumerGroupSubscriber::new(broker.clone(), "s1", "g1", "c1", handler)
            .with_block_ms(50);
        let (task, cancel) = sub.spawn();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let _ = cancel.send(true);

        // The bounded join must complete promptly; if the inner retry loop
        // ignored cancellation this would hang until the timeout fires.
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;
        assert!(result.is_ok(), "subscriber did not observe cancellation while handler was hanging");
    }
}
